use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use mir_core::{FaceId, Name};

use crate::trie::PrefixTrie;

/// Next hop information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextHop {
    pub face: FaceId,
    pub cost: u64,
}

/// FIB entry: the next hops registered under one name prefix.
///
/// Entries are immutable snapshots; every mutation stores a new entry, so a
/// caller holding one keeps a consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    name: Name,
    next_hops: BTreeMap<FaceId, u64>,
}

impl FibEntry {
    fn new(name: Name) -> Self {
        Self {
            name,
            next_hops: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Next hops ordered by face id.
    pub fn next_hops(&self) -> Vec<NextHop> {
        self.next_hops
            .iter()
            .map(|(&face, &cost)| NextHop { face, cost })
            .collect()
    }

    pub fn cost(&self, face: FaceId) -> Option<u64> {
        self.next_hops.get(&face).copied()
    }

    pub fn has_next_hop(&self, face: FaceId) -> bool {
        self.next_hops.contains_key(&face)
    }

    pub fn len(&self) -> usize {
        self.next_hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }

    /// Strictly cheapest next hop accepted by `eligible`; equal costs go to the lowest face id.
    pub fn lowest_cost_next_hop<F>(&self, mut eligible: F) -> Option<NextHop>
    where
        F: FnMut(FaceId) -> bool,
    {
        let mut best: Option<NextHop> = None;
        for (&face, &cost) in &self.next_hops {
            if !eligible(face) {
                continue;
            }
            if best.map_or(true, |current| cost < current.cost) {
                best = Some(NextHop { face, cost });
            }
        }
        best
    }

    fn with_next_hop(&self, face: FaceId, cost: u64) -> Self {
        let mut entry = self.clone();
        entry.next_hops.insert(face, cost);
        entry
    }

    fn without_next_hop(&self, face: FaceId) -> Self {
        let mut entry = self.clone();
        entry.next_hops.remove(&face);
        entry
    }
}

/// One (prefix, face, cost) triple, as listed by management
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub prefix: String,
    pub face: FaceId,
    pub cost: u64,
}

/// Forwarding Information Base (FIB) for NDN routing
pub struct Fib {
    trie: PrefixTrie<Arc<FibEntry>>,
    version: AtomicU64,
}

impl Default for Fib {
    fn default() -> Self {
        Self::new()
    }
}

impl Fib {
    pub fn new() -> Self {
        Self {
            trie: PrefixTrie::new(),
            version: AtomicU64::new(0),
        }
    }

    pub fn find_longest_prefix_match(&self, name: &Name) -> Option<Arc<FibEntry>> {
        let found = self
            .trie
            .longest_prefix_match(name.components())
            .map(|(_, entry)| entry);
        debug!(
            "FIB lookup for {}: {}",
            name,
            found
                .as_ref()
                .map_or_else(|| "no route".to_string(), |entry| entry.name().to_string())
        );
        found
    }

    pub fn find_exact_match(&self, name: &Name) -> Option<Arc<FibEntry>> {
        self.trie.exact_match(name.components()).into_value()
    }

    /// Register `face` under `name` with `cost`, replacing any previous cost for that face.
    pub fn add_or_update(&self, name: &Name, face: FaceId, cost: u64) -> Arc<FibEntry> {
        let entry = self.trie.add_or_update(name.components(), |current| {
            let base = current.map_or_else(|| FibEntry::new(name.clone()), |entry| (**entry).clone());
            Arc::new(base.with_next_hop(face, cost))
        });
        self.bump_version();
        info!("FIB route added: {} -> {} (cost: {})", name, face, cost);
        entry
    }

    /// Remove one next hop; the entry disappears with its last next hop.
    pub fn remove_next_hop(&self, name: &Name, face: FaceId) -> bool {
        let mut removed = false;
        self.trie.update_existing(name.components(), |entry| {
            if !entry.has_next_hop(face) {
                return Some(Arc::clone(entry));
            }
            removed = true;
            let remaining = entry.without_next_hop(face);
            (!remaining.is_empty()).then(|| Arc::new(remaining))
        });
        self.bump_version();
        if removed {
            info!("FIB route removed: {} -> {}", name, face);
        }
        removed
    }

    pub fn erase_by_name(&self, name: &Name) -> bool {
        let erased = self.trie.delete(name.components()).is_some();
        self.bump_version();
        if erased {
            info!("FIB entry erased: {}", name);
        }
        erased
    }

    pub fn erase_by_entry(&self, entry: &FibEntry) -> bool {
        self.erase_by_name(entry.name())
    }

    /// Drop `face` from every entry; returns how many next hops were removed.
    pub fn remove_next_hop_by_endpoint(&self, face: FaceId) -> u64 {
        let removed = self.trie.traverse(|_, slot| {
            let Some(entry) = slot.as_ref() else {
                return 0;
            };
            if !entry.has_next_hop(face) {
                return 0;
            }
            let remaining = entry.without_next_hop(face);
            *slot = (!remaining.is_empty()).then(|| Arc::new(remaining));
            1
        });
        self.bump_version();
        if removed > 0 {
            info!("Removed {} FIB next hops referencing {}", removed, face);
        }
        removed
    }

    /// Every (prefix, face, cost) triple, sorted by prefix then face.
    pub fn routes(&self) -> Vec<Route> {
        let mut routes = Vec::new();
        self.trie.traverse(|_, slot| {
            if let Some(entry) = slot.as_ref() {
                let prefix = entry.name().to_string();
                routes.extend(entry.next_hops().into_iter().map(|hop| Route {
                    prefix: prefix.clone(),
                    face: hop.face,
                    cost: hop.cost,
                }));
            }
            0
        });
        routes.sort_by(|a, b| a.prefix.cmp(&b.prefix).then(a.face.cmp(&b.face)));
        routes
    }

    /// Number of prefixes with at least one next hop.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.trie.depth()
    }

    /// Bumped on every mutating call, for cheap change detection.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_str(uri)
    }

    #[test]
    fn test_fib_longest_prefix_match() {
        let fib = Fib::new();
        fib.add_or_update(&name("/a"), FaceId(1), 10);
        fib.add_or_update(&name("/a/b"), FaceId(2), 10);

        let hit = fib.find_longest_prefix_match(&name("/a/b/c")).unwrap();
        assert_eq!(hit.name(), &name("/a/b"));

        let hit = fib.find_longest_prefix_match(&name("/a/x")).unwrap();
        assert_eq!(hit.name(), &name("/a"));

        assert!(fib.find_longest_prefix_match(&name("/z")).is_none());
    }

    #[test]
    fn test_add_or_update_is_idempotent() {
        let fib = Fib::new();
        fib.add_or_update(&name("/n"), FaceId(3), 10);
        fib.add_or_update(&name("/n"), FaceId(3), 10);
        let entry = fib.add_or_update(&name("/n"), FaceId(3), 25);

        assert_eq!(entry.len(), 1);
        assert_eq!(entry.cost(FaceId(3)), Some(25));
        assert_eq!(fib.find_exact_match(&name("/n")).unwrap().len(), 1);
        assert_eq!(fib.len(), 1);
    }

    #[test]
    fn test_exact_match_ignores_intermediate_nodes() {
        let fib = Fib::new();
        fib.add_or_update(&name("/a/b"), FaceId(1), 1);

        assert!(fib.find_exact_match(&name("/a")).is_none());
        assert!(fib.find_exact_match(&name("/a/b")).is_some());
    }

    #[test]
    fn test_lowest_cost_next_hop() {
        let fib = Fib::new();
        fib.add_or_update(&name("/p"), FaceId(4), 5);
        fib.add_or_update(&name("/p"), FaceId(2), 5);
        fib.add_or_update(&name("/p"), FaceId(7), 1);
        let entry = fib.find_exact_match(&name("/p")).unwrap();

        let best = entry.lowest_cost_next_hop(|_| true).unwrap();
        assert_eq!(best, NextHop { face: FaceId(7), cost: 1 });

        // Equal costs resolve to the lowest face id
        let best = entry.lowest_cost_next_hop(|face| face != FaceId(7)).unwrap();
        assert_eq!(best.face, FaceId(2));

        assert!(entry.lowest_cost_next_hop(|_| false).is_none());
    }

    #[test]
    fn test_remove_next_hop_prunes_empty_entry() {
        let fib = Fib::new();
        fib.add_or_update(&name("/a/b"), FaceId(1), 1);
        fib.add_or_update(&name("/a/b"), FaceId(2), 1);

        assert!(fib.remove_next_hop(&name("/a/b"), FaceId(1)));
        assert!(!fib.remove_next_hop(&name("/a/b"), FaceId(1)));
        assert_eq!(fib.len(), 1);

        assert!(fib.remove_next_hop(&name("/a/b"), FaceId(2)));
        assert!(fib.is_empty());
        assert!(fib.find_longest_prefix_match(&name("/a/b")).is_none());
    }

    #[test]
    fn test_remove_next_hop_by_endpoint() {
        let fib = Fib::new();
        fib.add_or_update(&name("/a"), FaceId(1), 1);
        fib.add_or_update(&name("/a"), FaceId(2), 1);
        fib.add_or_update(&name("/b/c"), FaceId(1), 1);
        fib.add_or_update(&name("/d"), FaceId(3), 1);

        assert_eq!(fib.remove_next_hop_by_endpoint(FaceId(1)), 2);
        assert_eq!(fib.len(), 2);
        assert!(fib.find_exact_match(&name("/b/c")).is_none());
        assert_eq!(
            fib.find_exact_match(&name("/a")).unwrap().next_hops(),
            vec![NextHop { face: FaceId(2), cost: 1 }]
        );
    }

    #[test]
    fn test_version_and_routes() {
        let fib = Fib::new();
        let before = fib.version();
        fib.add_or_update(&name("/b"), FaceId(2), 3);
        fib.add_or_update(&name("/a"), FaceId(1), 7);
        assert_eq!(fib.version(), before + 2);

        let routes = fib.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].prefix, "/a");
        assert_eq!(routes[0].cost, 7);
        assert_eq!(routes[1].face, FaceId(2));

        assert!(fib.erase_by_name(&name("/a")));
        assert!(!fib.erase_by_name(&name("/a")));
        assert_eq!(fib.version(), before + 4);
        assert_eq!(fib.depth(), 1);
    }
}
