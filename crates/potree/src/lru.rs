//! Least-recently-used tracking of resident nodes.
//!
//! The list stores only keys and point counts; node payloads stay in the
//! octree arena. Links are kept in a hash map so insert, touch and remove are
//! all O(1).

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy)]
struct Entry<K> {
    prev: Option<K>,
    next: Option<K>,
    points: u64,
}

/// Doubly linked LRU list over copyable keys.
///
/// The head is the least recently used entry, the tail the most recent.
#[derive(Debug, Clone)]
pub struct LruCache<K> {
    entries: HashMap<K, Entry<K>>,
    head: Option<K>,
    tail: Option<K>,
    num_points: u64,
}

impl<K: Copy + Eq + Hash> Default for LruCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> LruCache<K> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            head: None,
            tail: None,
            num_points: 0,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the point counts of all entries.
    #[must_use]
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    /// Check if `key` is present.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// The least recently used key.
    #[must_use]
    pub fn least_recent(&self) -> Option<K> {
        self.head
    }

    /// Insert `key` as most recent. An existing entry has its point count
    /// replaced and is moved to the most recent end.
    pub fn insert(&mut self, key: K, points: u64) {
        if let Some(old) = self.remove(key) {
            tracing::trace!(old, points, "replacing lru entry");
        }
        self.push_back(key, points);
    }

    /// Mark `key` as most recently used. Returns `false` if it is absent.
    pub fn touch(&mut self, key: K) -> bool {
        if self.tail == Some(key) {
            return true;
        }
        match self.remove(key) {
            Some(points) => {
                self.push_back(key, points);
                true
            }
            None => false,
        }
    }

    /// Remove `key`, returning its point count.
    pub fn remove(&mut self, key: K) -> Option<u64> {
        let entry = self.entries.remove(&key)?;

        match entry.prev {
            Some(prev) => {
                if let Some(p) = self.entries.get_mut(&prev) {
                    p.next = entry.next;
                }
            }
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => {
                if let Some(n) = self.entries.get_mut(&next) {
                    n.prev = entry.prev;
                }
            }
            None => self.tail = entry.prev,
        }

        self.num_points -= entry.points;
        Some(entry.points)
    }

    /// Remove and return the least recent key for which `pinned` is false.
    pub fn pop_least_recent(&mut self, pinned: impl Fn(K) -> bool) -> Option<(K, u64)> {
        let key = self.iter().map(|(key, _)| key).find(|&key| !pinned(key))?;
        let points = self.remove(key)?;
        Some((key, points))
    }

    /// Pop unpinned keys from the least recent end until at most
    /// `max_points` remain. Stops early, over the limit, when every
    /// remaining key is pinned.
    pub fn evict_until(&mut self, max_points: u64, pinned: impl Fn(K) -> bool) -> Vec<(K, u64)> {
        let mut evicted = Vec::new();
        while self.num_points > max_points {
            let Some(popped) = self.pop_least_recent(&pinned) else {
                break;
            };
            evicted.push(popped);
        }
        evicted
    }

    /// Iterate from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (K, u64)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let key = cursor?;
            let entry = self.entries.get(&key)?;
            cursor = entry.next;
            Some((key, entry.points))
        })
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = None;
        self.tail = None;
        self.num_points = 0;
    }

    fn push_back(&mut self, key: K, points: u64) {
        let entry = Entry {
            prev: self.tail,
            next: None,
            points,
        };
        match self.tail {
            Some(tail) => {
                if let Some(t) = self.entries.get_mut(&tail) {
                    t.next = Some(key);
                }
            }
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.entries.insert(key, entry);
        self.num_points += points;
    }
}
