//! In-process publish/subscribe.

use crate::event::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Anything that can publish events.
///
/// [`EventBus`] publishes locally; [`crate::BroadcastBridge`] additionally
/// relays across processes. Components take this trait so single-process
/// and fleet deployments wire up the same way.
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    fn publish(&self, event: Event);
}

/// Synchronous in-process event bus.
///
/// Delivery is synchronous and in subscription order; handlers must be
/// cheap (the synchronizer's `should_fetch` predicate is the intended
/// shape).
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Handler>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, returning its subscription id.
    pub fn subscribe(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(id, Arc::new(handler));
        SubscriptionId(id)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().remove(&id.0);
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: Event) {
        // Handlers run outside the lock so they may subscribe/unsubscribe.
        let handlers: Vec<Handler> = self.subscribers.read().values().cloned().collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use weave_model::{RecordId, Revision, RootId};

    fn event(root: &str) -> Event {
        Event::RecordUpdated {
            root_id: RootId::new(root),
            record_id: RecordId::new("rec-1"),
            revision: Revision::new(1),
        }
    }

    #[test]
    fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(event("root-1"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let id = {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.publish(event("root-1"));
        bus.unsubscribe(id);
        bus.publish(event("root-1"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn handler_sees_the_event() {
        let bus = EventBus::new();
        let seen = Arc::new(RwLock::new(None));

        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |e| {
                *seen.write() = Some(e.clone());
            });
        }

        bus.publish(event("root-42"));
        let got = seen.read().clone().unwrap();
        assert_eq!(got.root_id(), &RootId::new("root-42"));
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());

        {
            let inner = Arc::clone(&bus);
            bus.subscribe(move |_| {
                inner.subscribe(|_| {});
            });
        }

        bus.publish(event("root-1"));
        assert_eq!(bus.subscriber_count(), 2);
    }
}
