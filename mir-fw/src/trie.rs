//! Concurrent name trie backing every forwarding table.
//!
//! Each node carries its own lock, so work on one branch never blocks a
//! sibling branch. Writers that create nodes couple locks top-down (the
//! parent stays locked until the child is locked) and pruning locks a parent
//! before its child, so all lock acquisition follows the same order and a
//! node is only detached while nobody is about to write into it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mir_core::Component;

/// Outcome of an exact-match lookup.
///
/// Keeps "no node at this path" apart from "a node exists but holds no
/// payload" (an intermediate node on the way to a deeper entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExactMatch<T> {
    Missing,
    Empty,
    Value(T),
}

impl<T> ExactMatch<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            ExactMatch::Value(value) => Some(value),
            ExactMatch::Missing | ExactMatch::Empty => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ExactMatch::Missing)
    }
}

struct Slot<T> {
    value: Option<T>,
    children: HashMap<Component, Arc<Node<T>>>,
}

impl<T> Slot<T> {
    fn is_vacant(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

struct Node<T> {
    slot: RwLock<Slot<T>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                value: None,
                children: HashMap::new(),
            }),
        }
    }

    // A panic inside a merge closure must not wedge the table, so poisoned
    // locks are recovered rather than propagated.
    fn read(&self) -> RwLockReadGuard<'_, Slot<T>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot<T>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map from component sequences to one payload type per table.
pub struct PrefixTrie<T> {
    root: Arc<Node<T>>,
}

impl<T> Default for PrefixTrie<T> {
    fn default() -> Self {
        Self {
            root: Arc::new(Node::new()),
        }
    }
}

impl<T: Clone> PrefixTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact_match(&self, path: &[Component]) -> ExactMatch<T> {
        let Some(nodes) = self.path_nodes(path) else {
            return ExactMatch::Missing;
        };
        let slot = nodes[path.len()].read();
        let found = match &slot.value {
            Some(value) => ExactMatch::Value(value.clone()),
            None => ExactMatch::Empty,
        };
        found
    }

    /// Deepest payload found on the way down `path`, with the depth it was found at.
    pub fn longest_prefix_match(&self, path: &[Component]) -> Option<(usize, T)> {
        let mut node = Arc::clone(&self.root);
        let mut best = None;
        let mut depth = 0;
        loop {
            let next = {
                let slot = node.read();
                if let Some(value) = &slot.value {
                    best = Some((depth, value.clone()));
                }
                match path.get(depth) {
                    Some(component) => slot.children.get(component).cloned(),
                    None => None,
                }
            };
            match next {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => return best,
            }
        }
    }

    /// Store `value` at `path`, returning the payload it replaced.
    pub fn insert(&self, path: &[Component], value: T) -> Option<T> {
        self.with_slot_created(path, |slot| slot.replace(value))
    }

    /// Merge-or-create at `path`: `merge` sees the current payload (if any)
    /// and its result is stored and returned. `merge` runs under the node's
    /// write lock and must not call back into this trie.
    pub fn add_or_update<F>(&self, path: &[Component], merge: F) -> T
    where
        F: FnOnce(Option<&T>) -> T,
    {
        self.with_slot_created(path, |slot| {
            let merged = merge(slot.as_ref());
            *slot = Some(merged.clone());
            merged
        })
    }

    /// Rewrite an existing payload in place; returning `None` from `update`
    /// clears it and prunes the path. Returns false when there was nothing to update.
    pub fn update_existing<F>(&self, path: &[Component], update: F) -> bool
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let Some(nodes) = self.path_nodes(path) else {
            return false;
        };
        let vacated = {
            let mut slot = nodes[path.len()].write();
            let updated = match slot.value.as_ref() {
                Some(current) => update(current),
                None => return false,
            };
            slot.value = updated;
            slot.is_vacant()
        };
        if vacated {
            Self::prune(path, &nodes);
        }
        true
    }

    pub fn delete(&self, path: &[Component]) -> Option<T> {
        self.remove_if(path, |_| true)
    }

    /// Clear the payload at `path` only if `predicate` accepts it.
    pub fn remove_if<F>(&self, path: &[Component], predicate: F) -> Option<T>
    where
        F: FnOnce(&T) -> bool,
    {
        let nodes = self.path_nodes(path)?;
        let (removed, vacated) = {
            let mut slot = nodes[path.len()].write();
            if !slot.value.as_ref().is_some_and(predicate) {
                return None;
            }
            let removed = slot.value.take();
            (removed, slot.is_vacant())
        };
        if vacated {
            Self::prune(path, &nodes);
        }
        removed
    }

    /// Visit every payload once, summing what `visit` returns.
    ///
    /// `visit` receives the node's path and may clear the payload; emptied
    /// nodes are pruned before the traversal returns. Order is unspecified.
    pub fn traverse<F>(&self, mut visit: F) -> u64
    where
        F: FnMut(&[Component], &mut Option<T>) -> u64,
    {
        let mut prefix = Vec::new();
        Self::traverse_node(&self.root, &mut prefix, &mut visit)
    }

    /// Number of payloads stored.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.payload_depths(|_| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        let slot = self.root.read();
        slot.is_vacant()
    }

    /// Length of the longest path that carries a payload.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        self.payload_depths(|depth| deepest = deepest.max(depth));
        deepest
    }

    /// Number of nodes below the root, with or without payload.
    pub fn node_count(&self) -> usize {
        fn count<T>(node: &Node<T>) -> usize {
            let children: Vec<Arc<Node<T>>> = node.read().children.values().cloned().collect();
            children.iter().map(|child| 1 + count(child)).sum()
        }
        count(&self.root)
    }

    // Read-only walk: nodes are read-locked one at a time and nothing is pruned.
    fn payload_depths<F>(&self, mut visit: F)
    where
        F: FnMut(usize),
    {
        fn walk<T, F: FnMut(usize)>(node: &Node<T>, depth: usize, visit: &mut F) {
            let children: Vec<Arc<Node<T>>> = {
                let slot = node.read();
                if slot.value.is_some() {
                    visit(depth);
                }
                slot.children.values().cloned().collect()
            };
            for child in &children {
                walk(child, depth + 1, visit);
            }
        }
        walk(&self.root, 0, &mut visit);
    }

    fn path_nodes(&self, path: &[Component]) -> Option<Vec<Arc<Node<T>>>> {
        let mut nodes = Vec::with_capacity(path.len() + 1);
        nodes.push(Arc::clone(&self.root));
        for component in path {
            let next = match nodes[nodes.len() - 1].read().children.get(component) {
                Some(child) => Arc::clone(child),
                None => return None,
            };
            nodes.push(next);
        }
        Some(nodes)
    }

    fn with_slot_created<R, F>(&self, path: &[Component], f: F) -> R
    where
        F: FnOnce(&mut Option<T>) -> R,
    {
        Self::descend_creating(self.root.write(), path, f)
    }

    fn descend_creating<R, F>(mut guard: RwLockWriteGuard<'_, Slot<T>>, path: &[Component], f: F) -> R
    where
        F: FnOnce(&mut Option<T>) -> R,
    {
        match path.split_first() {
            None => f(&mut guard.value),
            Some((head, rest)) => {
                let child = Arc::clone(
                    guard
                        .children
                        .entry(head.clone())
                        .or_insert_with(|| Arc::new(Node::new())),
                );
                let child_guard = child.write();
                drop(guard);
                Self::descend_creating(child_guard, rest, f)
            }
        }
    }

    fn prune(path: &[Component], nodes: &[Arc<Node<T>>]) {
        for depth in (1..nodes.len()).rev() {
            let component = &path[depth - 1];
            let mut parent = nodes[depth - 1].write();
            let attached = parent
                .children
                .get(component)
                .is_some_and(|child| Arc::ptr_eq(child, &nodes[depth]));
            if !attached || !nodes[depth].read().is_vacant() {
                break;
            }
            parent.children.remove(component);
        }
    }

    fn traverse_node<F>(node: &Arc<Node<T>>, prefix: &mut Vec<Component>, visit: &mut F) -> u64
    where
        F: FnMut(&[Component], &mut Option<T>) -> u64,
    {
        let (mut total, children) = {
            let mut slot = node.write();
            let visited = if slot.value.is_some() {
                visit(prefix.as_slice(), &mut slot.value)
            } else {
                0
            };
            let children: Vec<(Component, Arc<Node<T>>)> = slot
                .children
                .iter()
                .map(|(component, child)| (component.clone(), Arc::clone(child)))
                .collect();
            (visited, children)
        };

        for (component, child) in &children {
            prefix.push(component.clone());
            total += Self::traverse_node(child, prefix, visit);
            prefix.pop();
        }

        if !children.is_empty() {
            let mut slot = node.write();
            for (component, child) in &children {
                let attached = slot
                    .children
                    .get(component)
                    .is_some_and(|current| Arc::ptr_eq(current, child));
                if attached && child.read().is_vacant() {
                    slot.children.remove(component);
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir_core::Name;
    use std::thread;

    fn path(uri: &str) -> Vec<Component> {
        Name::from_str(uri).components
    }

    fn vacant_nodes<T: Clone>(trie: &PrefixTrie<T>) -> usize {
        fn walk<T>(node: &Node<T>, is_root: bool) -> usize {
            let slot = node.read();
            let own = usize::from(!is_root && slot.is_vacant());
            own + slot.children.values().map(|child| walk(child, false)).sum::<usize>()
        }
        walk(&trie.root, true)
    }

    #[test]
    fn test_exact_match_distinguishes_missing_and_empty() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/a/b/c"), 3);

        assert_eq!(trie.exact_match(&path("/a/b/c")), ExactMatch::Value(3));
        assert_eq!(trie.exact_match(&path("/a/b")), ExactMatch::Empty);
        assert_eq!(trie.exact_match(&path("/a/x")), ExactMatch::Missing);
        assert_eq!(trie.exact_match(&path("/a/b/c/d")), ExactMatch::Missing);
    }

    #[test]
    fn test_longest_prefix_match() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/"), "root");
        trie.insert(&path("/a"), "a");
        trie.insert(&path("/a/b"), "ab");

        assert_eq!(trie.longest_prefix_match(&path("/a/b/c")), Some((2, "ab")));
        assert_eq!(trie.longest_prefix_match(&path("/a/x")), Some((1, "a")));
        assert_eq!(trie.longest_prefix_match(&path("/z")), Some((0, "root")));

        trie.delete(&path("/"));
        assert_eq!(trie.longest_prefix_match(&path("/z")), None);
    }

    #[test]
    fn test_add_or_update_merges() {
        let trie: PrefixTrie<u32> = PrefixTrie::new();
        let first = trie.add_or_update(&path("/n"), |current| current.copied().unwrap_or(0) + 1);
        let second = trie.add_or_update(&path("/n"), |current| current.copied().unwrap_or(0) + 1);

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_delete_prunes_empty_branch() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/a"), 1);
        trie.insert(&path("/a/b/c/d"), 2);
        assert_eq!(trie.node_count(), 4);

        assert_eq!(trie.delete(&path("/a/b/c/d")), Some(2));
        assert_eq!(trie.node_count(), 1);
        assert_eq!(trie.exact_match(&path("/a/b")), ExactMatch::Missing);
        assert_eq!(vacant_nodes(&trie), 0);

        assert_eq!(trie.delete(&path("/a")), Some(1));
        assert!(trie.is_empty());
        assert_eq!(trie.delete(&path("/a")), None);
    }

    #[test]
    fn test_delete_keeps_nodes_with_children() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/a/b"), 1);
        trie.insert(&path("/a/b/c"), 2);

        trie.delete(&path("/a/b"));
        assert_eq!(trie.exact_match(&path("/a/b")), ExactMatch::Empty);
        assert_eq!(trie.exact_match(&path("/a/b/c")), ExactMatch::Value(2));
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/a"), 5);

        assert_eq!(trie.remove_if(&path("/a"), |v| *v == 6), None);
        assert_eq!(trie.remove_if(&path("/a"), |v| *v == 5), Some(5));
        assert!(trie.is_empty());
    }

    #[test]
    fn test_update_existing() {
        let trie = PrefixTrie::new();
        assert!(!trie.update_existing(&path("/a"), |v: &u32| Some(v + 1)));
        assert!(trie.is_empty());

        trie.insert(&path("/a/b"), 1u32);
        assert!(trie.update_existing(&path("/a/b"), |v| Some(v + 1)));
        assert_eq!(trie.exact_match(&path("/a/b")), ExactMatch::Value(2));

        assert!(trie.update_existing(&path("/a/b"), |_| None));
        assert!(trie.is_empty());
    }

    #[test]
    fn test_traverse_sums_and_prunes() {
        let trie = PrefixTrie::new();
        for (uri, value) in [("/a", 1u64), ("/a/b", 2), ("/c/d/e", 3), ("/c/f", 4)] {
            trie.insert(&path(uri), value);
        }

        assert_eq!(trie.traverse(|_, value| value.unwrap_or(0)), 10);
        assert_eq!(trie.depth(), 3);

        let removed = trie.traverse(|_, value| {
            if value.is_some_and(|v| v >= 3) {
                *value = None;
                1
            } else {
                0
            }
        });
        assert_eq!(removed, 2);
        assert_eq!(trie.len(), 2);
        assert_eq!(vacant_nodes(&trie), 0);
        assert_eq!(trie.exact_match(&path("/c")), ExactMatch::Missing);
    }

    #[test]
    fn test_size_accessors_leave_structure_alone() {
        let trie = PrefixTrie::new();
        trie.insert(&path("/a/b"), 1);
        trie.insert(&path("/a/b/c/d"), 2);
        trie.insert(&path("/e"), 3);
        let nodes = trie.node_count();

        assert_eq!(trie.len(), 3);
        assert_eq!(trie.depth(), 4);
        assert_eq!(trie.node_count(), nodes);

        trie.delete(&path("/a/b/c/d"));
        assert_eq!(trie.len(), 2);
        assert_eq!(trie.depth(), 2);
    }

    #[test]
    fn test_concurrent_insert_delete_leaves_no_vacant_nodes() {
        let trie = Arc::new(PrefixTrie::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let trie = Arc::clone(&trie);
                thread::spawn(move || {
                    for round in 0..200 {
                        let uri = format!("/shared/{}/{}", round % 5, worker % 3);
                        trie.insert(&path(&uri), round);
                        trie.longest_prefix_match(&path(&format!("{}/x", uri)));
                        trie.delete(&path(&uri));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(trie.is_empty());
        assert_eq!(trie.node_count(), 0);
    }
}
