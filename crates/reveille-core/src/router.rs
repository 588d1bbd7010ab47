//! Typed pub/sub dispatch over decoded hub events.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::events::{Event, EventKind, HubFrame};
use crate::util::compact_text;

/// Error a handler reports back to the router
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Registration handle returned by [`EventRouter::add_event_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RouterInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<(ListenerId, Handler)>>>,
}

/// Ordered handler lists keyed by event kind. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`
    pub fn add_event_listener<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a registration. Unknown or already-removed ids are a no-op.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            if let Some(position) = list.iter().position(|(listener, _)| *listener == id) {
                list.remove(position);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Run every handler for the event's kind in registration order.
    ///
    /// A failing or panicking handler is logged and skipped; the rest still run.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let kind = event.kind();
        // Snapshot so handlers may (un)register listeners while running
        let handlers: Vec<(ListenerId, Handler)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(handler_error)) => {
                    report.failed += 1;
                    warn!(event = kind.as_str(), listener = id.0, error = %handler_error, "Event handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    error!(event = kind.as_str(), listener = id.0, "Event handler panicked");
                }
            }
        }
        report
    }

    /// Decode and dispatch a raw hub frame. Undecodable frames are dropped.
    pub fn dispatch_frame(&self, frame: &HubFrame) -> Option<DispatchReport> {
        match Event::decode(frame) {
            Ok(event) => Some(self.dispatch(&event)),
            Err(decode_error) => {
                debug!(
                    payload = %compact_text(&frame.arguments.to_string()),
                    "Dropping hub frame"
                );
                warn!(target_name = %frame.target, error = %decode_error, "Undecodable hub frame");
                None
            }
        }
    }
}
