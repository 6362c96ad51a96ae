//! Synchronous publish/subscribe bus.
//!
//! Handlers run on the publishing thread, before [`EventBus::publish`]
//! returns: first the handlers registered for the event's type, then the
//! handlers registered for every type, each group in registration order.
//! Nothing is buffered, so late subscribers never see earlier events.

use crate::event::{Event, EventType};
use crate::ids::{TaskId, WorkerId};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Callback invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` matches every event type.
    filter: Option<EventType>,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Registration>,
}

#[derive(Default)]
struct BusInner {
    registry: Mutex<Registry>,
    next_event_id: AtomicU64,
}

/// Process-wide event bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(event_type), Arc::new(handler))
    }

    /// Register `handler` for every event type.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, filter: Option<EventType>, handler: EventHandler) -> Subscription {
        let mut registry = self.inner.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(Registration {
            id,
            filter,
            handler,
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching handler.
    ///
    /// The handler list is snapshotted before the first call, so handlers may
    /// subscribe or unsubscribe while being invoked; such changes apply from
    /// the next publication on. A panicking handler is logged and skipped.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: &Event) -> usize {
        let handlers: Vec<EventHandler> = {
            let registry = self.inner.registry.lock();
            let typed = registry
                .entries
                .iter()
                .filter(|r| r.filter == Some(event.event_type()));
            let all = registry.entries.iter().filter(|r| r.filter.is_none());
            typed.chain(all).map(|r| Arc::clone(&r.handler)).collect()
        };

        for handler in &handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    event_id = event.id(),
                    event_type = %event.event_type(),
                    "Event handler panicked; continuing with remaining handlers"
                );
            }
        }

        handlers.len()
    }

    /// Build an event with the next sequential id, publish it and return it.
    pub fn emit(
        &self,
        event_type: EventType,
        agent_id: Option<WorkerId>,
        task_id: Option<TaskId>,
        data: serde_json::Value,
    ) -> Event {
        let mut event = Event::new(self.next_event_id(), event_type).with_data(data);
        if let Some(agent_id) = agent_id {
            event = event.with_agent(agent_id);
        }
        if let Some(task_id) = task_id {
            event = event.with_task(task_id);
        }
        self.publish(&event);
        event
    }

    /// Reserve the next event id (ids start at 1).
    pub fn next_event_id(&self) -> u64 {
        self.inner.next_event_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().entries.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle to one registration, returned by `subscribe`/`subscribe_all`.
///
/// Dropping it keeps the registration alive; call [`Subscription::unsubscribe`]
/// to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove this registration. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.registry.lock().entries.retain(|r| r.id != self.id);
        }
    }
}
