//! Live query invalidation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weave_bus::{Event, EventBus, SubscriptionId};
use weave_model::{Dataset, RootId};

/// Handle returned by [`LiveQueryRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

type Invalidate = Arc<dyn Fn() + Send + Sync>;

struct LiveQuery {
    root_id: RootId,
    datasets: Vec<Dataset>,
    invalidate: Invalidate,
}

impl LiveQuery {
    fn matches(&self, event: &Event) -> bool {
        event.root_id() == &self.root_id && self.datasets.contains(&event.dataset())
    }
}

/// Tracks live local queries and invalidates them as data arrives.
///
/// A query registers the root and datasets it reads; whenever a matching
/// event lands on the local bus the query's invalidation callback fires,
/// telling the caller to re-run it. The registry holds one bus
/// subscription for all queries.
pub struct LiveQueryRegistry {
    bus: Arc<EventBus>,
    queries: Arc<RwLock<HashMap<u64, LiveQuery>>>,
    subscription: SubscriptionId,
    next_id: AtomicU64,
}

impl LiveQueryRegistry {
    /// Creates a registry listening on the given bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let queries: Arc<RwLock<HashMap<u64, LiveQuery>>> = Arc::new(RwLock::new(HashMap::new()));

        let subscription = {
            let queries = Arc::clone(&queries);
            bus.subscribe(move |event| {
                for query in queries.read().values() {
                    if query.matches(event) {
                        (query.invalidate)();
                    }
                }
            })
        };

        Self {
            bus,
            queries,
            subscription,
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a query over one root and the datasets it reads.
    pub fn register(
        &self,
        root_id: RootId,
        datasets: Vec<Dataset>,
        invalidate: impl Fn() + Send + Sync + 'static,
    ) -> QueryId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.queries.write().insert(
            id,
            LiveQuery {
                root_id,
                datasets,
                invalidate: Arc::new(invalidate),
            },
        );
        QueryId(id)
    }

    /// Removes a query.
    pub fn unregister(&self, id: QueryId) {
        self.queries.write().remove(&id.0);
    }

    /// Returns the number of registered queries.
    pub fn query_count(&self) -> usize {
        self.queries.read().len()
    }

    /// Detaches from the bus; no further invalidations fire.
    pub fn dispose(&self) {
        self.bus.unsubscribe(self.subscription);
        self.queries.write().clear();
    }
}

impl Drop for LiveQueryRegistry {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}
