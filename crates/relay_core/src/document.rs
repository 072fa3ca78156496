//! Host document seam.
//!
//! The relay never owns the page it works on. Everything it needs from the
//! host (element lookup, property writes and delegated listener registration)
//! goes through [`Document`], so a browser binding and [`MemoryDocument`] are
//! interchangeable.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{ElementId, EventKind, MarkerClass},
    protocol::{PropValue, Props, UpdateInstruction},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: ElementId,
}

pub trait DomListener: Send + Sync {
    fn handle(&self, event: &DomEvent);
}

impl<F> DomListener for F
where
    F: Fn(&DomEvent) + Send + Sync,
{
    fn handle(&self, event: &DomEvent) {
        self(event)
    }
}

pub trait Document: Send + Sync {
    fn element(&self, id: &ElementId) -> Option<ElementSnapshot>;

    /// Returns `false` when no element carries `id`.
    fn set_property(&self, id: &ElementId, key: &str, value: PropValue) -> bool;

    /// Registers `listener` for `events` on every element carrying `marker`,
    /// including elements added after the call.
    fn add_delegated_listener(
        &self,
        marker: &MarkerClass,
        events: &[EventKind],
        listener: Arc<dyn DomListener>,
    ) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// What an element can report about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text inputs, text areas and selects.
    ValueBearing,
    /// Checkbox and radio inputs.
    Checkable,
    Inert,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    pub id: ElementId,
    pub tag: String,
    pub input_type: Option<String>,
    pub classes: Vec<String>,
    pub properties: Props,
}

impl ElementSnapshot {
    pub fn new(id: impl Into<ElementId>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into().to_ascii_lowercase(),
            input_type: None,
            classes: Vec::new(),
            properties: Props::new(),
        }
    }

    pub fn text_input(id: impl Into<ElementId>) -> Self {
        Self::new(id, "input").with_type("text").with_property("value", "")
    }

    pub fn checkbox(id: impl Into<ElementId>) -> Self {
        Self::new(id, "input")
            .with_type("checkbox")
            .with_property("value", "on")
            .with_property("checked", false)
    }

    pub fn with_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into().to_ascii_lowercase());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_class(&self, class: &MarkerClass) -> bool {
        self.classes.iter().any(|candidate| candidate == class.as_str())
    }

    pub fn property(&self, key: &str) -> Option<&PropValue> {
        self.properties.get(key)
    }

    pub fn capability(&self) -> Capability {
        match (self.tag.as_str(), self.input_type.as_deref()) {
            ("input", Some("checkbox" | "radio")) => Capability::Checkable,
            ("input" | "textarea" | "select", _) => Capability::ValueBearing,
            _ => Capability::Inert,
        }
    }
}

struct Registration {
    marker: MarkerClass,
    events: Vec<EventKind>,
    listener: Arc<dyn DomListener>,
}

#[derive(Default)]
struct MemoryDocumentState {
    elements: BTreeMap<ElementId, ElementSnapshot>,
    listeners: BTreeMap<ListenerId, Registration>,
    next_listener_id: u64,
    writes: Vec<UpdateInstruction>,
}

/// In-process [`Document`] with a flat element table.
#[derive(Default)]
pub struct MemoryDocument {
    inner: Mutex<MemoryDocumentState>,
}

impl fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryDocument")
            .field("elements", &state.elements.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(elements: impl IntoIterator<Item = ElementSnapshot>) -> Self {
        let document = Self::new();
        for element in elements {
            document.insert(element);
        }
        document
    }

    fn state(&self) -> MutexGuard<'_, MemoryDocumentState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces the element keyed by its id.
    pub fn insert(&self, element: ElementSnapshot) -> Option<ElementSnapshot> {
        self.state().elements.insert(element.id.clone(), element)
    }

    pub fn remove(&self, id: &ElementId) -> Option<ElementSnapshot> {
        self.state().elements.remove(id)
    }

    pub fn property(&self, id: &ElementId, key: &str) -> Option<PropValue> {
        self.state()
            .elements
            .get(id)
            .and_then(|element| element.property(key).cloned())
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Every successful property write, in application order.
    pub fn write_log(&self) -> Vec<UpdateInstruction> {
        self.state().writes.clone()
    }

    /// Fires `kind` on `target`, returning how many listeners saw it.
    pub fn dispatch(&self, target: &ElementId, kind: EventKind) -> usize {
        let matching: Vec<Arc<dyn DomListener>> = {
            let state = self.state();
            let Some(element) = state.elements.get(target) else {
                debug!(%target, event = %kind, "dispatch to unknown element ignored");
                return 0;
            };
            state
                .listeners
                .values()
                .filter(|registration| {
                    registration.events.contains(&kind) && element.has_class(&registration.marker)
                })
                .map(|registration| Arc::clone(&registration.listener))
                .collect()
        };

        let event = DomEvent {
            kind,
            target: target.clone(),
        };
        for listener in &matching {
            listener.handle(&event);
        }
        matching.len()
    }
}

impl Document for MemoryDocument {
    fn element(&self, id: &ElementId) -> Option<ElementSnapshot> {
        self.state().elements.get(id).cloned()
    }

    fn set_property(&self, id: &ElementId, key: &str, value: PropValue) -> bool {
        let mut state = self.state();
        let Some(element) = state.elements.get_mut(id) else {
            return false;
        };
        element.properties.insert(key.to_string(), value.clone());
        state.writes.push(UpdateInstruction {
            id: id.clone(),
            key: key.to_string(),
            value,
        });
        true
    }

    fn add_delegated_listener(
        &self,
        marker: &MarkerClass,
        events: &[EventKind],
        listener: Arc<dyn DomListener>,
    ) -> ListenerId {
        let mut state = self.state();
        state.next_listener_id += 1;
        let id = ListenerId(state.next_listener_id);
        state.listeners.insert(
            id,
            Registration {
                marker: marker.clone(),
                events: events.to_vec(),
                listener,
            },
        );
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.state().listeners.remove(&id).is_some()
    }
}
