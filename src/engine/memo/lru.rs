//! Bounded least-recently-used memo table
//!
//! Entries live in a slab threaded by an intrusive recency list; a hash index
//! maps keys to slots. Lookups and insertions are O(1). Edits rebuild the
//! whole table, which is fine for the small capacities this table is meant
//! for.

use super::{invalidated_by, Entry, Key, MemoStats, MemoTable};
use crate::engine::incremental::Edit;
use hashbrown::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Default number of entries kept by [`LruTable`]
pub const DEFAULT_LRU_CAPACITY: usize = 4096;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot {
    key: Key,
    entry: Entry,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Lru {
    slots: Vec<Slot>,
    index: HashMap<Key, usize>,
    // most recently used
    head: usize,
    // least recently used
    tail: usize,
    capacity: usize,
    stats: MemoStats,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            capacity: capacity.max(1),
            stats: MemoStats::default(),
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.slots[i].prev, self.slots[i].next);
        match prev {
            NIL => self.head = next,
            p => self.slots[p].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.slots[n].prev = prev,
        }
    }

    fn push_front(&mut self, i: usize) {
        self.slots[i].prev = NIL;
        self.slots[i].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = i;
        }
        self.head = i;
        if self.tail == NIL {
            self.tail = i;
        }
    }

    fn get(&mut self, key: Key) -> Option<Entry> {
        let Some(&i) = self.index.get(&key) else {
            self.stats.misses += 1;
            return None;
        };
        self.stats.hits += 1;
        self.unlink(i);
        self.push_front(i);
        Some(self.slots[i].entry.clone())
    }

    fn put(&mut self, key: Key, entry: Entry) {
        self.stats.inserts += 1;
        if let Some(&i) = self.index.get(&key) {
            self.slots[i].entry = entry;
            self.unlink(i);
            self.push_front(i);
            return;
        }

        let i = if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                key,
                entry,
                prev: NIL,
                next: NIL,
            });
            self.slots.len() - 1
        } else {
            // Reuse the least recently used slot
            let i = self.tail;
            self.unlink(i);
            let old = std::mem::replace(
                &mut self.slots[i],
                Slot {
                    key,
                    entry,
                    prev: NIL,
                    next: NIL,
                },
            );
            self.index.remove(&old.key);
            self.stats.evicted += 1;
            i
        };
        self.index.insert(key, i);
        self.push_front(i);
    }

    // Keeps recency order: rebuilt from least to most recent
    fn apply_edit(&mut self, edit: &Edit) -> usize {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut cursor = self.tail;
        while cursor != NIL {
            order.push(cursor);
            cursor = self.slots[cursor].prev;
        }

        let shift = edit.shift();
        let mut slots: Vec<Option<Slot>> = std::mem::take(&mut self.slots)
            .into_iter()
            .map(Some)
            .collect();
        let mut survivors = Vec::with_capacity(order.len());
        let mut removed = 0;
        for i in order {
            let Some(slot) = slots[i].take() else {
                continue;
            };
            if invalidated_by(slot.key.start, slot.entry.examined, edit) {
                removed += 1;
                continue;
            }
            let mut key = slot.key;
            if key.start >= edit.start {
                key.start = key.start.checked_add_signed(shift).unwrap_or(0);
            }
            survivors.push((key, slot.entry));
        }

        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
        for (key, entry) in survivors {
            let i = self.slots.len();
            self.slots.push(Slot {
                key,
                entry,
                prev: NIL,
                next: NIL,
            });
            self.index.insert(key, i);
            self.push_front(i);
        }
        self.stats.evicted += removed as u64;
        removed
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// Memo table with a fixed capacity, evicting the least recently used entry
#[derive(Debug)]
pub struct LruTable {
    inner: Mutex<Lru>,
    min_examined: usize,
}

impl Default for LruTable {
    fn default() -> Self {
        Self::new(DEFAULT_LRU_CAPACITY, super::DEFAULT_MIN_EXAMINED)
    }
}

impl LruTable {
    /// Create a table holding at most `capacity` entries
    pub fn new(capacity: usize, min_examined: usize) -> Self {
        Self {
            inner: Mutex::new(Lru::new(capacity)),
            min_examined: min_examined.max(1),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    fn lock(&self) -> MutexGuard<'_, Lru> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoTable for LruTable {
    fn get(&self, key: Key) -> Option<Entry> {
        self.lock().get(key)
    }

    fn put(&self, key: Key, entry: Entry) {
        self.lock().put(key, entry);
    }

    fn apply_edit(&self, edit: &Edit) -> usize {
        self.lock().apply_edit(edit)
    }

    fn len(&self) -> usize {
        self.lock().index.len()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn min_examined(&self) -> usize {
        self.min_examined
    }

    fn stats(&self) -> MemoStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(len: usize, examined: usize) -> Entry {
        Entry::success(len, examined, Vec::new())
    }

    #[test]
    fn test_get_put() {
        let table = LruTable::new(4, 1);
        table.put(Key::new(1, 0), entry(3, 3));
        assert_eq!(table.get(Key::new(1, 0)).and_then(|e| e.length), Some(3));
        assert!(table.get(Key::new(1, 1)).is_none());
        table.put(Key::new(1, 0), entry(4, 4));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(Key::new(1, 0)).and_then(|e| e.length), Some(4));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let table = LruTable::new(2, 1);
        table.put(Key::new(1, 0), entry(1, 1));
        table.put(Key::new(1, 1), entry(1, 1));
        // touch 0 so that 1 becomes the oldest
        assert!(table.get(Key::new(1, 0)).is_some());
        table.put(Key::new(1, 2), entry(1, 1));
        assert_eq!(table.len(), 2);
        assert!(table.get(Key::new(1, 1)).is_none());
        assert!(table.get(Key::new(1, 0)).is_some());
        assert!(table.get(Key::new(1, 2)).is_some());
        assert_eq!(table.stats().evicted, 1);
    }

    #[test]
    fn test_edit_rebuilds_and_keeps_order() {
        let table = LruTable::new(3, 1);
        table.put(Key::new(1, 0), entry(2, 2)); // [0, 2)
        table.put(Key::new(1, 4), entry(2, 3)); // [4, 7)
        table.put(Key::new(1, 10), entry(1, 1)); // [10, 11)

        assert_eq!(table.apply_edit(&Edit::new(5, 6, 3)), 1);
        assert_eq!(table.len(), 2);
        assert!(table.get(Key::new(1, 0)).is_some());
        assert!(table.get(Key::new(1, 12)).is_some());

        // 0 was touched before 12, so 0 is evicted first
        table.put(Key::new(1, 20), entry(1, 1));
        table.put(Key::new(1, 21), entry(1, 1));
        assert!(table.get(Key::new(1, 0)).is_none());
    }
}
