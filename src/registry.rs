//! Event listener registry - typed fan-out from the upstream dispatch path
//!
//! Handlers are invoked synchronously, in registration order, on the thread
//! that calls [`ListenerRegistry::dispatch`]. A failing or panicking handler is
//! reported and skipped; it never stops the others.

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

use crate::core::Error;
use crate::events::{Event, EventCategory};

/// Something that reacts to upstream events.
pub trait EventHandler: Send + Sync {
    /// Name used when reporting failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    Arc::new(FnHandler { name: name.into(), f })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    categories: Vec<EventCategory>,
    handler: Arc<dyn EventHandler>,
}

/// Outcome of one dispatch
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that ran to completion without error
    pub delivered: usize,
    /// One `HandlerFailure` per failed handler
    pub failures: Vec<Error>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every category in `categories`.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>, categories: &[EventCategory]) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut categories = categories.to_vec();
        categories.dedup();
        trace!("Registering handler {} for {:?}", handler.name(), categories);
        self.handlers.write().push(Registration {
            id,
            categories,
            handler,
        });
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver `event` to every handler registered for its category.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let category = event.category();
        // Snapshot so handlers may (un)subscribe from inside a callback
        let targets: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .iter()
            .filter(|r| r.categories.contains(&category))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        let mut report = DispatchReport::default();
        for handler in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_event(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };
            let failure = Error::HandlerFailure {
                handler: handler.name().to_string(),
                category,
                message,
            };
            warn!("{} (event: {})", failure, event.kind());
            report.failures.push(failure);
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
