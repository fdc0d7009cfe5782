//! Dependency graph: forward/reverse edges, dirty flags, cycle detection.
//!
//! Two invariants hold after every public mutation:
//!
//! - `a ∈ forward[b]` iff `b ∈ reverse[a]`
//! - no node reaches itself through `forward` (an insertion that would close
//!   a cycle is rolled back and reported)
//!
//! Empty edge sets are never stored.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::coord::CellKey;

/// A discovered dependency cycle: the path runs from the first re-encounter
/// back to itself, in traversal order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CyclePath(pub Vec<CellKey>);

/// Tracks dependencies between cells and manages dirty flags.
///
/// - forward: `forward[A2] = {A1}` means A2 depends on A1
/// - reverse: `reverse[A1] = {A2}` means A1 is depended on by A2
#[derive(Debug, Default)]
pub struct DepGraph {
    forward: HashMap<CellKey, HashSet<CellKey>>,
    reverse: HashMap<CellKey, HashSet<CellKey>>,
    dirty: HashSet<CellKey>,
}

impl DepGraph {
    pub fn new() -> DepGraph {
        DepGraph::default()
    }

    /// Insert the edge `dependent -> dependency` and immediately check for a
    /// cycle reachable from `dependent`. On detection the insertion is
    /// rolled back and the discovered path is returned; both edge maps are
    /// left exactly as they were.
    pub fn add_edge(&mut self, dependent: CellKey, dependency: CellKey) -> Result<(), CyclePath> {
        let fwd_inserted = self.forward.entry(dependent).or_default().insert(dependency);
        let rev_inserted = self.reverse.entry(dependency).or_default().insert(dependent);

        if let Some(path) = self.find_cycle_from(dependent) {
            if fwd_inserted {
                self.discard_forward(dependent, dependency);
            }
            if rev_inserted {
                self.discard_reverse(dependency, dependent);
            }
            debug!("edge {dependent:?} -> {dependency:?} rejected: cycle {path:?}");
            return Err(CyclePath(path));
        }

        debug!("added edge {dependent:?} -> {dependency:?}");
        Ok(())
    }

    /// Drop the forward edges of `key` (what it depends on). Reverse edges
    /// (what depends on it) are preserved unless `drop_reverse` is set, so
    /// downstream recomputation still knows its upstream set.
    pub fn remove_cell(&mut self, key: CellKey, drop_reverse: bool) {
        if let Some(deps) = self.forward.remove(&key) {
            for dependency in deps {
                self.discard_reverse(dependency, key);
            }
        }
        if drop_reverse {
            if let Some(dependents) = self.reverse.remove(&key) {
                for dependent in dependents {
                    self.discard_forward(dependent, key);
                }
            }
        }
        debug!("removed cell {key:?} (drop_reverse={drop_reverse})");
    }

    /// Mark `key` and all transitive dependents (via reverse edges) dirty.
    pub fn mark_dirty(&mut self, key: CellKey) {
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if !self.dirty.insert(current) {
                continue;
            }
            debug!("marked {current:?} dirty");
            if let Some(dependents) = self.reverse.get(&current) {
                stack.extend(dependents.iter().copied());
            }
        }
    }

    pub fn clear_dirty(&mut self, key: CellKey) {
        self.dirty.remove(&key);
    }

    pub fn clear_all_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn is_dirty(&self, key: CellKey) -> bool {
        self.dirty.contains(&key)
    }

    pub fn all_dirty(&self) -> Vec<CellKey> {
        self.dirty.iter().copied().collect()
    }

    /// Direct dependencies of `key`.
    pub fn direct_deps(&self, key: CellKey) -> Vec<CellKey> {
        self.forward
            .get(&key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `key`.
    pub fn direct_dependents(&self, key: CellKey) -> Vec<CellKey> {
        self.reverse
            .get(&key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Transitive closure over forward edges.
    pub fn transitive_deps(&self, key: CellKey) -> HashSet<CellKey> {
        self.closure(key, &self.forward)
    }

    /// Transitive closure over reverse edges.
    pub fn transitive_dependents(&self, key: CellKey) -> HashSet<CellKey> {
        self.closure(key, &self.reverse)
    }

    fn closure(
        &self,
        key: CellKey,
        edges: &HashMap<CellKey, HashSet<CellKey>>,
    ) -> HashSet<CellKey> {
        let mut result = HashSet::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if let Some(nexts) = edges.get(&current) {
                for next in nexts {
                    if result.insert(*next) {
                        stack.push(*next);
                    }
                }
            }
        }
        result
    }

    /// Depth-first search over forward edges with an explicit recursion
    /// stack; returns the cycle path if one is reachable from `start`.
    fn find_cycle_from(&self, start: CellKey) -> Option<Vec<CellKey>> {
        let mut visited: HashSet<CellKey> = HashSet::new();
        let mut rec_stack: Vec<CellKey> = Vec::new();
        let mut rec_set: HashSet<CellKey> = HashSet::new();

        let pending_deps = |graph: &DepGraph, key: CellKey| -> Vec<CellKey> {
            graph
                .forward
                .get(&key)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default()
        };

        let mut stack: Vec<(CellKey, Vec<CellKey>)> = vec![(start, pending_deps(self, start))];

        while !stack.is_empty() {
            let (key, next) = {
                let top = stack.last_mut().expect("stack is non-empty");
                (top.0, top.1.pop())
            };
            if visited.insert(key) {
                rec_stack.push(key);
                rec_set.insert(key);
            }

            match next {
                None => {
                    stack.pop();
                    rec_stack.pop();
                    rec_set.remove(&key);
                }
                Some(dependency) => {
                    if rec_set.contains(&dependency) {
                        let cycle_start = rec_stack
                            .iter()
                            .position(|k| *k == dependency)
                            .unwrap_or(0);
                        let mut cycle: Vec<CellKey> = rec_stack[cycle_start..].to_vec();
                        cycle.push(dependency);
                        return Some(cycle);
                    }
                    if !visited.contains(&dependency) {
                        stack.push((dependency, pending_deps(self, dependency)));
                    }
                }
            }
        }
        None
    }

    fn discard_forward(&mut self, from: CellKey, to: CellKey) {
        if let Some(set) = self.forward.get_mut(&from) {
            set.remove(&to);
            if set.is_empty() {
                self.forward.remove(&from);
            }
        }
    }

    fn discard_reverse(&mut self, from: CellKey, to: CellKey) {
        if let Some(set) = self.reverse.get_mut(&from) {
            set.remove(&to);
            if set.is_empty() {
                self.reverse.remove(&from);
            }
        }
    }

    /// Edge-symmetry check used by tests: `a ∈ forward[b]` iff
    /// `b ∈ reverse[a]`, with no empty sets stored.
    pub fn edges_consistent(&self) -> bool {
        let no_empty = self.forward.values().all(|s| !s.is_empty())
            && self.reverse.values().all(|s| !s.is_empty());
        let fwd_mirrored = self.forward.iter().all(|(dependent, deps)| {
            deps.iter().all(|dep| {
                self.reverse
                    .get(dep)
                    .is_some_and(|s| s.contains(dependent))
            })
        });
        let rev_mirrored = self.reverse.iter().all(|(dependency, dependents)| {
            dependents.iter().all(|dep| {
                self.forward
                    .get(dep)
                    .is_some_and(|s| s.contains(dependency))
            })
        });
        no_empty && fwd_mirrored && rev_mirrored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(row: u32, col: u32) -> CellKey {
        CellKey::new(row, col, 0)
    }

    #[test]
    fn test_add_edge_mirrors_both_maps() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        assert_eq!(graph.direct_deps(key(1, 0)), vec![key(0, 0)]);
        assert_eq!(graph.direct_dependents(key(0, 0)), vec![key(1, 0)]);
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let mut graph = DepGraph::new();
        let err = graph.add_edge(key(0, 0), key(0, 0)).unwrap_err();
        assert_eq!(err.0, vec![key(0, 0), key(0, 0)]);
        assert!(graph.direct_deps(key(0, 0)).is_empty());
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_cycle_insert_rolls_back_cleanly() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();

        let err = graph.add_edge(key(0, 0), key(2, 0)).unwrap_err();
        assert!(err.0.len() >= 3);
        assert!(!graph.direct_deps(key(0, 0)).contains(&key(2, 0)));
        assert!(!graph.direct_dependents(key(2, 0)).contains(&key(0, 0)));
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_cycle_rollback_keeps_preexisting_edge() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        // Re-adding the same edge after a cycle attempt must not erase it.
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        assert!(graph.add_edge(key(0, 0), key(1, 0)).is_err());
        assert_eq!(graph.direct_deps(key(1, 0)), vec![key(0, 0)]);
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_remove_cell_preserves_reverse_edges_by_default() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();

        graph.remove_cell(key(1, 0), false);
        assert!(graph.direct_deps(key(1, 0)).is_empty());
        // A3 still knows it depends on A2.
        assert_eq!(graph.direct_deps(key(2, 0)), vec![key(1, 0)]);
        assert_eq!(graph.direct_dependents(key(1, 0)), vec![key(2, 0)]);
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_remove_cell_can_drop_reverse_edges() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();

        graph.remove_cell(key(1, 0), true);
        assert!(graph.direct_deps(key(2, 0)).is_empty());
        assert!(graph.direct_dependents(key(1, 0)).is_empty());
        assert!(graph.edges_consistent());
    }

    #[test]
    fn test_mark_dirty_propagates_transitively() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();

        graph.mark_dirty(key(0, 0));
        assert!(graph.is_dirty(key(0, 0)));
        assert!(graph.is_dirty(key(1, 0)));
        assert!(graph.is_dirty(key(2, 0)));
    }

    #[test]
    fn test_transitive_deps_closure() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(2, 0), key(1, 0)).unwrap();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();

        let deps = graph.transitive_deps(key(2, 0));
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&key(1, 0)));
        assert!(deps.contains(&key(0, 0)));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut graph = DepGraph::new();
        graph.add_edge(key(1, 0), key(0, 0)).unwrap();
        graph.add_edge(key(2, 0), key(0, 0)).unwrap();
        graph.add_edge(key(3, 0), key(1, 0)).unwrap();
        graph.add_edge(key(3, 0), key(2, 0)).unwrap();
        assert!(graph.edges_consistent());
    }
}
