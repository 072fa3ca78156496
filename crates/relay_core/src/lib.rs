use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::{
    domain::{ElementId, EventKind, MarkerClass},
    protocol::{EventPayload, UpdateBatch, UpdateInstruction},
};
use tokio::{runtime::Handle, sync::broadcast};
use tracing::{debug, info, warn};

pub mod document;
pub mod error;
pub mod extract;
pub mod transport;

pub use document::{
    Capability, Document, DomEvent, DomListener, ElementSnapshot, ListenerId, MemoryDocument,
};
pub use error::RelayError;
pub use extract::{CapabilityExtractor, PropertyExtractor, ValueExtractor};
pub use transport::{HttpTransport, RelayTransport};

const RELAY_EVENT_CAPACITY: usize = 256;

/// How responses racing each other are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseOrdering {
    /// Every response is applied when it arrives; the last one to arrive wins.
    #[default]
    ArrivalOrder,
    /// An instruction is dropped when a later request already wrote to the
    /// same element.
    LatestRequest,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub marker: MarkerClass,
    pub events: Vec<EventKind>,
    pub ordering: ResponseOrdering,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            marker: MarkerClass::default(),
            events: EventKind::ALL.to_vec(),
            ordering: ResponseOrdering::default(),
        }
    }
}

/// Outcome of applying one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub sequence: u64,
    pub applied: Vec<UpdateInstruction>,
    /// Targets that were not in the document.
    pub missing: Vec<ElementId>,
    /// Targets already written by a later request.
    pub stale: Vec<ElementId>,
}

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Applied {
        source: ElementId,
        event: EventKind,
        report: ApplyReport,
    },
    Failed {
        source: ElementId,
        event: EventKind,
        sequence: u64,
        message: String,
    },
}

pub struct EventRelay {
    document: Arc<dyn Document>,
    transport: Arc<dyn RelayTransport>,
    extractor: Arc<dyn PropertyExtractor>,
    config: RelayConfig,
    next_sequence: AtomicU64,
    registration: Mutex<Option<ListenerId>>,
    highest_applied: Mutex<HashMap<ElementId, u64>>,
    events: broadcast::Sender<RelayEvent>,
}

impl EventRelay {
    pub fn new(document: Arc<dyn Document>, transport: Arc<dyn RelayTransport>) -> Arc<Self> {
        Self::new_with_dependencies(
            document,
            transport,
            Arc::new(CapabilityExtractor),
            RelayConfig::default(),
        )
    }

    pub fn new_with_dependencies(
        document: Arc<dyn Document>,
        transport: Arc<dyn RelayTransport>,
        extractor: Arc<dyn PropertyExtractor>,
        config: RelayConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(RELAY_EVENT_CAPACITY);
        Arc::new(Self {
            document,
            transport,
            extractor,
            config,
            next_sequence: AtomicU64::new(0),
            registration: Mutex::new(None),
            highest_applied: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Registers the delegated listener on the document.
    ///
    /// Returns `Ok(false)` when the relay is already attached. Must be called
    /// from within a tokio runtime; each event the listener sees is relayed
    /// on its own task.
    pub fn attach(self: &Arc<Self>) -> Result<bool, RelayError> {
        let mut registration = lock(&self.registration);
        if registration.is_some() {
            debug!(marker = %self.config.marker, "relay already attached");
            return Ok(false);
        }
        let runtime = Handle::try_current().map_err(|_| RelayError::NoRuntime)?;

        let relay = Arc::downgrade(self);
        let listener: Arc<dyn DomListener> = Arc::new(move |event: &DomEvent| {
            let Some(relay) = relay.upgrade() else {
                return;
            };
            let event = event.clone();
            runtime.spawn(async move {
                relay.relay_dom_event(event).await;
            });
        });

        let id = self
            .document
            .add_delegated_listener(&self.config.marker, &self.config.events, listener);
        *registration = Some(id);
        info!(marker = %self.config.marker, listener = id.0, "relay attached");
        Ok(true)
    }

    /// Releases the listener registration. Returns `false` when not attached.
    pub fn detach(&self) -> bool {
        let Some(id) = lock(&self.registration).take() else {
            return false;
        };
        self.document.remove_listener(id);
        info!(listener = id.0, "relay detached");
        true
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.registration).is_some()
    }

    pub fn build_payload(
        &self,
        source: &ElementId,
        event: EventKind,
    ) -> Result<EventPayload, RelayError> {
        let element = self
            .document
            .element(source)
            .ok_or_else(|| RelayError::MissingSource(source.clone()))?;
        let props = self.extractor.extract(&element);
        EventPayload::new(event, source.clone(), &props).map_err(RelayError::Encode)
    }

    /// Sends one event for `source` and applies whatever the server answers.
    pub async fn on_event(
        &self,
        source: &ElementId,
        event: EventKind,
    ) -> Result<ApplyReport, RelayError> {
        let sequence = self.issue_sequence();
        self.relay(sequence, source, event).await
    }

    /// Parses the whole body before touching the document, so a malformed
    /// response applies nothing.
    pub fn on_response(&self, sequence: u64, raw_body: &str) -> Result<ApplyReport, RelayError> {
        let batch: UpdateBatch = serde_json::from_str(raw_body)?;
        Ok(self.apply(sequence, &batch))
    }

    pub fn apply(&self, sequence: u64, batch: &[UpdateInstruction]) -> ApplyReport {
        let mut report = ApplyReport {
            sequence,
            ..ApplyReport::default()
        };
        let ordered = self.config.ordering == ResponseOrdering::LatestRequest;
        let mut highest = lock(&self.highest_applied);

        for instruction in batch {
            if ordered {
                if let Some(&seen) = highest.get(&instruction.id) {
                    if seen > sequence {
                        debug!(target_id = %instruction.id, sequence, seen, "stale update dropped");
                        report.stale.push(instruction.id.clone());
                        continue;
                    }
                }
            }

            if self.document.set_property(
                &instruction.id,
                &instruction.key,
                instruction.value.clone(),
            ) {
                if ordered {
                    highest.insert(instruction.id.clone(), sequence);
                }
                report.applied.push(instruction.clone());
            } else {
                debug!(
                    target_id = %instruction.id,
                    key = %instruction.key,
                    "update target missing"
                );
                report.missing.push(instruction.id.clone());
            }
        }
        report
    }

    fn issue_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn relay(
        &self,
        sequence: u64,
        source: &ElementId,
        event: EventKind,
    ) -> Result<ApplyReport, RelayError> {
        let payload = self.build_payload(source, event)?;
        let body = self.transport.post_event(&payload).await?;
        self.on_response(sequence, &body)
    }

    async fn relay_dom_event(&self, dom_event: DomEvent) {
        let sequence = self.issue_sequence();
        let DomEvent { kind, target } = dom_event;
        match self.relay(sequence, &target, kind).await {
            Ok(report) => {
                info!(
                    source = %target,
                    event = %kind,
                    sequence,
                    applied = report.applied.len(),
                    missing = report.missing.len(),
                    stale = report.stale.len(),
                    "relayed event applied"
                );
                let _ = self.events.send(RelayEvent::Applied {
                    source: target,
                    event: kind,
                    report,
                });
            }
            Err(error) => {
                warn!(source = %target, event = %kind, sequence, %error, "relayed event failed");
                let _ = self.events.send(RelayEvent::Failed {
                    source: target,
                    event: kind,
                    sequence,
                    message: error.to_string(),
                });
            }
        }
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
