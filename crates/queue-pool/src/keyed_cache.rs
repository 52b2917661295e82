//! Concurrent key-to-cell map with get-or-create semantics.

use crate::cell::{AsyncLazyCell, LazyCell};
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "keyed_cache_tests.rs"]
mod tests;

/// Map from key to a lazily initialized cell.
///
/// For any key at most one cell is ever published. The cell for an absent key
/// is built inside the map's atomic entry operation, so concurrent callers
/// racing on the same key all receive the same cell and only one closure
/// builds it. No map guard is held while a cell initializes, so keys never
/// block one another.
///
/// `C` is normally [`LazyCell`] or [`AsyncLazyCell`]; entries are never
/// evicted.
pub struct KeyedLazyCache<K, C> {
    cells: DashMap<K, Arc<C>>,
}

impl<K, C> KeyedLazyCache<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Return the cell published for `key`, creating it with `make_cell` if
    /// the key is absent. `make_cell` must not have side effects beyond
    /// building the cell.
    pub fn cell<Q, F>(&self, key: &Q, make_cell: F) -> Arc<C>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(&K) -> C,
    {
        if let Some(existing) = self.cells.get(key) {
            return Arc::clone(existing.value());
        }

        let owned = key.to_owned();
        let entry = self.cells.entry(owned.clone()).or_insert_with(|| {
            debug!(key = ?owned, "Creating lazy cell for key");
            Arc::new(make_cell(&owned))
        });
        Arc::clone(entry.value())
    }

    /// Number of keys with a published cell
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell has been published yet
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Check if a cell exists for `key` (initialized or not)
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cells.contains_key(key)
    }

    /// Snapshot of the keys currently in the map
    pub fn keys(&self) -> Vec<K> {
        self.cells.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<K, V, E> KeyedLazyCache<K, LazyCell<V, E>>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Return the value for `key`, running its initializer if needed.
    ///
    /// `make_init` is only called when the key has no cell yet; the
    /// initializer it returns is bound to the new cell and re-run by later
    /// calls after a failure.
    pub fn get_or_create<Q, F, I>(&self, key: &Q, make_init: F) -> Result<V, E>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(&K) -> I,
        I: Fn() -> Result<V, E> + Send + Sync + 'static,
    {
        self.cell(key, |key| LazyCell::new(make_init(key))).get()
    }

    /// Return the value for `key` if it is already initialized
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let cell = self.cells.get(key).map(|entry| Arc::clone(entry.value()))?;
        cell.peek()
    }
}

impl<K, V, E> KeyedLazyCache<K, AsyncLazyCell<V, E>>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Return the value for `key`, starting or joining its initialization.
    ///
    /// The map guard is released before awaiting.
    pub async fn get_or_create<Q, F, I, Fut>(&self, key: &Q, make_init: F) -> Result<V, E>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(&K) -> I,
        I: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let cell = self.cell(key, |key| AsyncLazyCell::new(make_init(key)));
        cell.get().await
    }

    /// Return the value for `key` if it is already initialized
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let cell = self.cells.get(key).map(|entry| Arc::clone(entry.value()))?;
        cell.peek()
    }
}

impl<K, C> Default for KeyedLazyCache<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C> fmt::Debug for KeyedLazyCache<K, C>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLazyCache")
            .field("len", &self.cells.len())
            .finish()
    }
}
