//! Ordered map with O(1) recency updates
//!
//! Entries live in a slab of nodes threaded by a doubly linked list; a hash
//! index maps each key to its slot. The front of the list is the oldest entry,
//! the back is the newest. Both the embedding cache and the rate-limiter store
//! are built on it.

use ahash::AHashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash map that remembers insertion/touch order
pub struct LruMap<K, V> {
    index: AHashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: AHashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up a value without changing its position
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Look up a value and move it to the newest position
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_back(idx);
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Mutable lookup that also moves the entry to the newest position
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.move_to_back(idx);
        self.slots[idx].as_mut().map(|node| &mut node.value)
    }

    /// Insert at the newest position. An existing entry is replaced and
    /// moved; its previous value is returned.
    pub fn push_back(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            self.move_to_back(idx);
            return self.slots[idx]
                .as_mut()
                .map(|node| std::mem::replace(&mut node.value, value));
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.link_back(idx);
        None
    }

    /// Oldest entry, without removing it
    pub fn peek_front(&self) -> Option<(&K, &V)> {
        let idx = self.head?;
        self.slots[idx].as_ref().map(|node| (&node.key, &node.value))
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let idx = self.head?;
        self.take_slot(idx)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = *self.index.get(key)?;
        self.take_slot(idx).map(|(_, value)| value)
    }

    /// Keep only the entries for which `keep` returns true, visiting from
    /// oldest to newest. Surviving entries keep their relative order.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let (next, keep_entry) = match self.slots[idx].as_mut() {
                Some(node) => (node.next, keep(&node.key, &mut node.value)),
                None => break,
            };
            if !keep_entry {
                self.take_slot(idx);
            }
            cursor = next;
        }
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            cursor: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn take_slot(&mut self, idx: usize) -> Option<(K, V)> {
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value))
    }

    fn move_to_back(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_back(idx);
    }

    fn links(&self, idx: usize) -> (Option<usize>, Option<usize>) {
        self.slots[idx]
            .as_ref()
            .map(|node| (node.prev, node.next))
            .unwrap_or((None, None))
    }

    fn set_prev(&mut self, idx: usize, prev: Option<usize>) {
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = prev;
        }
    }

    fn set_next(&mut self, idx: usize, next: Option<usize>) {
        if let Some(node) = self.slots[idx].as_mut() {
            node.next = next;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = self.links(idx);
        match prev {
            Some(p) => self.set_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.set_prev(n, prev),
            None => self.tail = prev,
        }
        self.set_prev(idx, None);
        self.set_next(idx, None);
    }

    fn link_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        self.set_prev(idx, old_tail);
        self.set_next(idx, None);
        match old_tail {
            Some(t) => self.set_next(t, Some(idx)),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}

impl<K, V> Default for LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Oldest-to-newest iterator over an [`LruMap`]
pub struct Iter<'a, K, V> {
    map: &'a LruMap<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.map.slots[idx].as_ref()?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &LruMap<&'static str, i32>) -> Vec<&'static str> {
        map.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_push_keeps_insertion_order() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        map.push_back("b", 2);
        map.push_back("c", 3);

        assert_eq!(keys(&map), vec!["a", "b", "c"]);
        assert_eq!(map.peek_front(), Some((&"a", &1)));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_get_moves_to_back() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        map.push_back("b", 2);
        map.push_back("c", 3);

        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(keys(&map), vec!["b", "c", "a"]);

        // peek does not reorder
        assert_eq!(map.peek(&"b"), Some(&2));
        assert_eq!(keys(&map), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_push_existing_replaces_and_moves() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        map.push_back("b", 2);

        assert_eq!(map.push_back("a", 10), Some(1));
        assert_eq!(keys(&map), vec!["b", "a"]);
        assert_eq!(map.peek(&"a"), Some(&10));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_pop_front_and_slot_reuse() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        map.push_back("b", 2);

        assert_eq!(map.pop_front(), Some(("a", 1)));
        map.push_back("c", 3);

        assert_eq!(keys(&map), vec!["b", "c"]);
        assert!(!map.contains_key(&"a"));
        assert_eq!(map.slots.len(), 2);
    }

    #[test]
    fn test_remove_middle() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        map.push_back("b", 2);
        map.push_back("c", 3);

        assert_eq!(map.remove(&"b"), Some(2));
        assert_eq!(keys(&map), vec!["a", "c"]);
        assert_eq!(map.remove(&"b"), None);
    }

    #[test]
    fn test_retain() {
        let mut map = LruMap::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            map.push_back(k, v);
        }

        map.retain(|_, v| {
            *v *= 10;
            *v != 20 && *v != 40
        });

        assert_eq!(keys(&map), vec!["a", "c"]);
        assert_eq!(map.peek(&"c"), Some(&30));
    }

    #[test]
    fn test_pop_until_empty() {
        let mut map = LruMap::new();
        map.push_back("a", 1);
        if let Some(v) = map.get_mut(&"a") {
            *v += 1;
        }

        assert_eq!(map.pop_front(), Some(("a", 2)));
        assert_eq!(map.pop_front(), None);
        assert!(map.is_empty());
        assert!(map.peek_front().is_none());
    }
}
