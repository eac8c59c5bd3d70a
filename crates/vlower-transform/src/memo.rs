//! Single-flight memoization
//!
//! Each key owns a `OnceCell`. The map lock is held only long enough to
//! fetch (or create) the cell; the computation itself runs inside
//! `OnceCell::get_or_init`, which makes every concurrent caller for the
//! same key block until the first caller publishes its value.
//!
//! A computation must not request its own key again; that is a cycle and
//! would never complete.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Memoized<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
    computations: AtomicUsize,
}

impl<K, V> Default for Memoized<K, V> {
    fn default() -> Self {
        Self { cells: Mutex::new(HashMap::new()), computations: AtomicUsize::new(0) }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Memoized<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`, computing it first if nobody has.
    pub fn get_or_compute(&self, key: &K, compute: impl FnOnce() -> V) -> V {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(key.clone()).or_default())
        };
        cell.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::SeqCst);
            compute()
        })
        .clone()
    }

    /// Stored value, without computing.
    pub fn get(&self, key: &K) -> Option<V> {
        let cell = self.cells.lock().get(key).cloned()?;
        cell.get().cloned()
    }

    /// Number of computations that have run, over all keys.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Keys with a published value.
    pub fn keys(&self) -> Vec<K> {
        self.cells
            .lock()
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_computes_once_per_key() {
        let memo: Memoized<u32, Arc<String>> = Memoized::new();
        let a = memo.get_or_compute(&1, || Arc::new("one".to_string()));
        let b = memo.get_or_compute(&1, || Arc::new("uno".to_string()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memo.computations(), 1);
        assert_eq!(memo.get(&2), None);
        memo.get_or_compute(&2, || Arc::new("two".to_string()));
        assert_eq!(memo.computations(), 2);
    }

    #[test]
    fn test_concurrent_callers_wait_for_first_result() {
        let memo: Memoized<u32, Arc<u64>> = Memoized::new();
        let results: Vec<Arc<u64>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        memo.get_or_compute(&7, || {
                            thread::sleep(Duration::from_millis(20));
                            Arc::new(42)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(memo.computations(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn test_nested_keys_do_not_block_each_other() {
        let memo: Memoized<u32, u32> = Memoized::new();
        let outer = memo.get_or_compute(&1, || memo.get_or_compute(&2, || 20) + 1);
        assert_eq!(outer, 21);
        assert_eq!(memo.keys().len(), 2);
    }
}
