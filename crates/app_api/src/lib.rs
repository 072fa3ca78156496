use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::Path,
};

use anyhow::{bail, Context};
use shared::{
    domain::{ElementId, EventKind},
    error::{ApiError, ErrorCode},
    protocol::{EventPayload, PropValue, UpdateBatch, UpdateInstruction},
};
use tracing::{debug, error};

pub mod template;
pub mod widget;

pub use template::{Segment, Template, TemplateError};
pub use widget::{escape_html, Widget, WidgetKind};

pub type Handler = Box<dyn Fn(&mut EventContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// What a handler sees while it runs: widget state plus the update queue
/// that becomes the response body.
pub struct EventContext<'a> {
    source: ElementId,
    event: EventKind,
    widgets: &'a mut BTreeMap<ElementId, Widget>,
    updates: UpdateBatch,
}

impl<'a> EventContext<'a> {
    fn new(
        source: ElementId,
        event: EventKind,
        widgets: &'a mut BTreeMap<ElementId, Widget>,
    ) -> Self {
        Self {
            source,
            event,
            widgets,
            updates: Vec::new(),
        }
    }

    pub fn source(&self) -> &ElementId {
        &self.source
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    pub fn get(&self, id: &str, key: &str) -> Option<&PropValue> {
        self.widgets.get(id).and_then(|widget| widget.get(key))
    }

    pub fn value(&self, id: &str) -> Option<&PropValue> {
        self.get(id, "value")
    }

    /// Updates server state and queues the same write for the client.
    pub fn set(&mut self, id: &str, key: &str, value: impl Into<PropValue>) -> anyhow::Result<()> {
        let Some(widget) = self.widgets.get_mut(id) else {
            bail!("no widget '{id}' on this page");
        };
        let value = value.into();
        widget.set(key, value.clone());
        self.updates
            .push(UpdateInstruction::new(widget.id.clone(), key, value));
        Ok(())
    }

    fn into_updates(self) -> UpdateBatch {
        self.updates
    }
}

pub struct App {
    title: String,
    template: Template,
    widgets: BTreeMap<ElementId, Widget>,
    handlers: HashMap<(ElementId, EventKind), Handler>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("title", &self.title)
            .field("widgets", &self.widgets.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl App {
    pub fn new(title: impl Into<String>, template_source: &str) -> Result<Self, TemplateError> {
        let template = Template::parse(template_source)?;
        let widgets = template
            .widgets()
            .map(|(kind, id)| (id.clone(), Widget::new(id.clone(), kind)))
            .collect();
        Ok(Self {
            title: title.into(),
            template,
            widgets,
            handlers: HashMap::new(),
        })
    }

    pub fn from_template_file(
        title: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read template '{}'", path.display()))?;
        Self::new(title, &source)
            .with_context(|| format!("invalid template '{}'", path.display()))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.get(id)
    }

    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.widgets.values()
    }

    /// Registers `handler` for `event` on widget `id`, replacing any earlier one.
    pub fn on<F>(&mut self, id: &str, event: EventKind, handler: F) -> anyhow::Result<()>
    where
        F: Fn(&mut EventContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let Some(widget) = self.widgets.get(id) else {
            bail!("no widget '{id}' in template");
        };
        self.handlers
            .insert((widget.id.clone(), event), Box::new(handler));
        Ok(())
    }

    /// Applies the client's props to the source widget, runs its handler and
    /// returns the updates the handler queued, in write order.
    pub fn handle_event(&mut self, payload: &EventPayload) -> Result<UpdateBatch, ApiError> {
        let event = payload
            .event_kind()
            .map_err(|e| ApiError::new(ErrorCode::Validation, e.to_string()))?;
        let props = payload
            .decode_props()
            .map_err(|e| ApiError::new(ErrorCode::Validation, format!("invalid props: {e}")))?;
        let widget = self.widgets.get_mut(&payload.id).ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("unknown widget '{}'", payload.id),
            )
        })?;
        for (key, value) in props {
            widget.set(key, value);
        }

        let Some(handler) = self.handlers.get(&(payload.id.clone(), event)) else {
            debug!(widget = %payload.id, %event, "no handler registered");
            return Ok(Vec::new());
        };
        let mut ctx = EventContext::new(payload.id.clone(), event, &mut self.widgets);
        if let Err(e) = handler(&mut ctx) {
            error!(widget = %payload.id, %event, error = %e, "handler failed");
            return Err(ApiError::new(
                ErrorCode::Internal,
                format!("handler for {event} on '{}' failed: {e}", payload.id),
            ));
        }
        Ok(ctx.into_updates())
    }

    /// Full page: the template with every placeholder replaced by its widget.
    pub fn render_page(&self, script_url: &str) -> String {
        let mut body = String::new();
        for segment in self.template.segments() {
            match segment {
                Segment::Text(text) => body.push_str(text),
                Segment::Widget { id, .. } => {
                    if let Some(widget) = self.widgets.get(id) {
                        body.push_str(&widget.render());
                    }
                }
            }
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}\n<script src=\"{}\"></script>\n</body>\n</html>\n",
            escape_html(&self.title),
            escape_html(script_url),
        )
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
