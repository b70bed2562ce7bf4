//! Collapse concurrent computations of the same key into one.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// In-flight computations keyed by `K`.
///
/// The first caller for a key computes; callers arriving while it runs
/// await the same cell. The entry is dropped once settled, so a later call
/// computes afresh. A failed computation is not shared: the next waiter
/// retries.
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash, V> {
    flights: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K: Eq + Hash, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub async fn run<E, F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.flights.entry(key.clone()).or_default().clone();
        let result = cell.get_or_try_init(compute).await.cloned();
        self.flights
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}
