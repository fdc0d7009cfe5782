//! Dependency-aware cache for cell evaluation results.
//!
//! Validity is gated solely by the dependency graph's dirty flags: an entry
//! for `k` is usable iff `k` is not dirty and no transitive dependency of
//! `k` is dirty. Entries are kept on invalidation (useful when debugging);
//! only the dirty flags decide.
//!
//! Absence in the map is the miss sentinel, which keeps "no entry" distinct
//! from "entry holding the empty-cell value".

use std::collections::HashMap;

use log::debug;

use super::coord::CellKey;
use super::graph::DepGraph;
use super::value::Value;

#[derive(Debug, Default)]
pub struct SmartCache {
    entries: HashMap<CellKey, Value>,
}

impl SmartCache {
    pub fn new() -> SmartCache {
        SmartCache::default()
    }

    /// A usable entry exists for `key`: present, not dirty, and no
    /// transitive dependency dirty.
    pub fn is_valid(&self, key: CellKey, graph: &DepGraph) -> bool {
        if !self.entries.contains_key(&key) {
            return false;
        }
        if graph.is_dirty(key) {
            return false;
        }
        graph
            .transitive_deps(key)
            .iter()
            .all(|dep| !graph.is_dirty(*dep))
    }

    /// Deep clone of the cached value, or None on a miss. Mutations of the
    /// returned value never corrupt the stored one.
    pub fn get(&self, key: CellKey, graph: &DepGraph) -> Option<Value> {
        if !self.is_valid(key, graph) {
            debug!("cache miss for {key:?}");
            return None;
        }
        debug!("cache hit for {key:?}");
        self.entries.get(&key).map(Value::deep_clone)
    }

    /// Store a value and clear the dirty flag for `key`.
    pub fn put(&mut self, key: CellKey, value: Value, graph: &mut DepGraph) {
        self.entries.insert(key, value);
        graph.clear_dirty(key);
        debug!("cache set for {key:?}");
    }

    /// Mark `key` (and transitively its dependents) dirty. The stored value
    /// stays; validity is gated by the dirty flags alone.
    pub fn invalidate(&mut self, key: CellKey, graph: &mut DepGraph) {
        graph.mark_dirty(key);
    }

    /// Remove a single entry without touching dirty flags.
    pub fn drop_entry(&mut self, key: CellKey) {
        self.entries.remove(&key);
    }

    /// Stored value regardless of validity.
    pub fn raw(&self, key: CellKey) -> Option<&Value> {
        self.entries.get(&key)
    }

    /// Drop all entries and every dirty flag.
    pub fn clear(&mut self, graph: &mut DepGraph) {
        self.entries.clear();
        graph.clear_all_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Dynamic;

    fn key(row: u32, col: u32) -> CellKey {
        CellKey::new(row, col, 0)
    }

    fn int_value(n: i64) -> Value {
        Value::Scalar(Dynamic::from(n))
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let cache = SmartCache::new();
        let graph = DepGraph::new();
        assert!(cache.get(key(0, 0), &graph).is_none());
    }

    #[test]
    fn test_put_clears_dirty_and_hits() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        graph.mark_dirty(key(0, 0));

        cache.put(key(0, 0), int_value(7), &mut graph);
        assert!(!graph.is_dirty(key(0, 0)));
        assert_eq!(cache.get(key(0, 0), &graph).unwrap().as_int(), Some(7));
    }

    #[test]
    fn test_dirty_cell_misses() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        cache.put(key(0, 0), int_value(7), &mut graph);
        graph.mark_dirty(key(0, 0));
        assert!(cache.get(key(0, 0), &graph).is_none());
        // The entry itself is retained.
        assert!(cache.raw(key(0, 0)).is_some());
    }

    #[test]
    fn test_dirty_transitive_dependency_misses() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        // A3 -> A2 -> A1
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();

        cache.put(key(2, 0), int_value(3), &mut graph);
        assert!(cache.get(key(2, 0), &graph).is_some());

        // Dirty A1 only: A3's entry must stop being usable even though A3
        // itself was not marked.
        graph.mark_dirty(key(0, 0));
        graph.clear_dirty(key(1, 0));
        graph.clear_dirty(key(2, 0));
        assert!(cache.get(key(2, 0), &graph).is_none());
    }

    #[test]
    fn test_cached_empty_is_a_hit() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        cache.put(key(0, 0), Value::Empty, &mut graph);
        assert!(matches!(cache.get(key(0, 0), &graph), Some(Value::Empty)));
    }

    #[test]
    fn test_returned_value_is_isolated() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        let array = Dynamic::from_array(vec![Dynamic::from(1i64)]);
        cache.put(key(0, 0), Value::Scalar(array), &mut graph);

        if let Some(Value::Scalar(d)) = cache.get(key(0, 0), &graph) {
            let mut arr = d.into_array().unwrap();
            arr[0] = Dynamic::from(99i64);
        }

        let again = cache.get(key(0, 0), &graph).unwrap();
        if let Value::Scalar(d) = again {
            assert_eq!(d.into_array().unwrap()[0].as_int().unwrap(), 1);
        } else {
            panic!("expected scalar");
        }
    }

    #[test]
    fn test_clear_drops_entries_and_dirty() {
        let mut cache = SmartCache::new();
        let mut graph = DepGraph::new();
        cache.put(key(0, 0), int_value(1), &mut graph);
        graph.mark_dirty(key(1, 1));
        cache.clear(&mut graph);
        assert!(cache.raw(key(0, 0)).is_none());
        assert!(!graph.is_dirty(key(1, 1)));
    }
}
