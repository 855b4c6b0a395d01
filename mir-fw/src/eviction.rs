//! Eviction policies for the bounded Content Store.
//!
//! Every cache is keyed by the canonical name string of the Data it holds
//! and behaves as get-or-create on insertion: an entry already present is
//! returned unmodified and only its recency/frequency is updated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Fixed-capacity key/value cache with a replacement policy
pub trait EvictionCache<V>: Send {
    /// Look `key` up, counting the access for the replacement policy.
    fn get(&mut self, key: &str) -> Option<V>;

    /// Return the value cached under `key`, inserting `value` when absent.
    fn get_or_insert(&mut self, key: String, value: V) -> V;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keys ordered from least to most recently used
#[derive(Debug, Default)]
struct RecencyList {
    order: BTreeMap<u64, String>,
    ticks: HashMap<String, u64>,
    next_tick: u64,
}

impl RecencyList {
    fn push_mru(&mut self, key: String) {
        if let Some(tick) = self.ticks.remove(&key) {
            self.order.remove(&tick);
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        self.ticks.insert(key, tick);
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.ticks.remove(key) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.ticks.contains_key(key)
    }

    fn len(&self) -> usize {
        self.ticks.len()
    }
}

/// Least-recently-used replacement
#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    values: HashMap<String, V>,
    recency: RecencyList,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: HashMap::new(),
            recency: RecencyList::default(),
        }
    }
}

impl<V: Clone + Send> EvictionCache<V> for LruCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let value = self.values.get(key)?.clone();
        self.recency.push_mru(key.to_string());
        Some(value)
    }

    fn get_or_insert(&mut self, key: String, value: V) -> V {
        if let Some(existing) = self.values.get(&key) {
            let existing = existing.clone();
            self.recency.push_mru(key);
            return existing;
        }
        if self.capacity == 0 {
            return value;
        }
        while self.values.len() >= self.capacity {
            match self.recency.pop_lru() {
                Some(victim) => {
                    self.values.remove(&victim);
                }
                None => break,
            }
        }
        self.values.insert(key.clone(), value.clone());
        self.recency.push_mru(key);
        value
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Least-frequently-used replacement; ties evict the least recently used.
#[derive(Debug)]
pub struct LfuCache<V> {
    capacity: usize,
    values: HashMap<String, (V, u64, u64)>,
    order: BTreeSet<(u64, u64, String)>,
    next_tick: u64,
}

impl<V> LfuCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: HashMap::new(),
            order: BTreeSet::new(),
            next_tick: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}

impl<V: Clone + Send> EvictionCache<V> for LfuCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let tick = self.tick();
        let (value, frequency, last) = self.values.get_mut(key)?;
        self.order.remove(&(*frequency, *last, key.to_string()));
        *frequency += 1;
        *last = tick;
        self.order.insert((*frequency, tick, key.to_string()));
        Some(value.clone())
    }

    fn get_or_insert(&mut self, key: String, value: V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        if self.capacity == 0 {
            return value;
        }
        while self.values.len() >= self.capacity {
            match self.order.pop_first() {
                Some((_, _, victim)) => {
                    self.values.remove(&victim);
                }
                None => break,
            }
        }
        let tick = self.tick();
        self.order.insert((1, tick, key.clone()));
        self.values.insert(key, (value.clone(), 1, tick));
        value
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Adaptive replacement cache.
///
/// Residents are split between `t1` (seen once recently) and `t2` (seen at
/// least twice); `b1`/`b2` remember keys recently evicted from each and steer
/// the target size `p` of `t1`.
#[derive(Debug)]
pub struct ArcCache<V> {
    capacity: usize,
    p: usize,
    values: HashMap<String, V>,
    t1: RecencyList,
    t2: RecencyList,
    b1: RecencyList,
    b2: RecencyList,
}

impl<V> ArcCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            p: 0,
            values: HashMap::new(),
            t1: RecencyList::default(),
            t2: RecencyList::default(),
            b1: RecencyList::default(),
            b2: RecencyList::default(),
        }
    }

    /// Current target size of the recency side.
    pub fn target(&self) -> usize {
        self.p
    }

    fn replace(&mut self, hit_in_b2: bool) {
        if self.values.len() < self.capacity {
            return;
        }
        let t1_len = self.t1.len();
        let from_t1 = t1_len > 0 && ((hit_in_b2 && t1_len == self.p) || t1_len > self.p);
        let victim = if from_t1 {
            self.t1.pop_lru().map(|key| (key, true))
        } else {
            self.t2
                .pop_lru()
                .map(|key| (key, false))
                .or_else(|| self.t1.pop_lru().map(|key| (key, true)))
        };
        if let Some((victim, from_t1)) = victim {
            self.values.remove(&victim);
            if from_t1 {
                self.b1.push_mru(victim);
            } else {
                self.b2.push_mru(victim);
            }
        }
    }
}

impl<V: Clone + Send> EvictionCache<V> for ArcCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let value = self.values.get(key)?.clone();
        self.t1.remove(key);
        self.t2.push_mru(key.to_string());
        Some(value)
    }

    fn get_or_insert(&mut self, key: String, value: V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        if self.capacity == 0 {
            return value;
        }

        if self.b1.contains(&key) {
            let delta = (self.b2.len() / self.b1.len()).max(1);
            self.p = (self.p + delta).min(self.capacity);
            self.replace(false);
            self.b1.remove(&key);
            self.t2.push_mru(key.clone());
        } else if self.b2.contains(&key) {
            let delta = (self.b1.len() / self.b2.len()).max(1);
            self.p = self.p.saturating_sub(delta);
            self.replace(true);
            self.b2.remove(&key);
            self.t2.push_mru(key.clone());
        } else {
            let l1 = self.t1.len() + self.b1.len();
            if l1 >= self.capacity {
                if self.t1.len() < self.capacity {
                    self.b1.pop_lru();
                    self.replace(false);
                } else if let Some(victim) = self.t1.pop_lru() {
                    self.values.remove(&victim);
                }
            } else {
                let total = l1 + self.t2.len() + self.b2.len();
                if total >= self.capacity {
                    if total >= 2 * self.capacity {
                        self.b2.pop_lru();
                    }
                    self.replace(false);
                }
            }
            self.t1.push_mru(key.clone());
        }

        self.values.insert(key, value.clone());
        value
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
