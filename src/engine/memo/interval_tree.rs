//! AVL interval tree of memo entries
//!
//! Nodes are keyed by start offset and hold every entry recorded at that
//! offset (one per memo id, in practice). Each node is augmented with the
//! largest examined end in its subtree, so an edit finds the entries it
//! invalidates without visiting the rest of the tree.
//!
//! # Lazy shifting
//!
//! After an edit, every entry past the edit point has to move by the edit's
//! shift. Instead of walking the whole tree, the edit is recorded as a
//! descriptor `{index, amount, ts}` and applied to a node the next time the
//! node is visited:
//!
//! ```text
//! for each descriptor newer than node.stamp:
//!     if start >= index: start += amount      (both tests use the values
//!     if max   >  index: max   += amount       from before this descriptor)
//! node.stamp = now
//! ```
//!
//! Shifts preserve order (entries before the edit end at or before `index`,
//! entries after it start at or after it), so a stale subtree is still a valid
//! search tree. Once more than `flush_threshold` descriptors are pending every
//! node is brought up to date and the list is dropped.

use super::{invalidated_by, Entry, Key, MemoStats, DEFAULT_FLUSH_THRESHOLD};
use crate::engine::incremental::Edit;
use crate::engine::pattern::MemoId;
use std::cmp::Ordering;

type NodeId = usize;

#[derive(Debug, Clone, Copy)]
struct Shift {
    index: usize,
    amount: isize,
    ts: u64,
}

#[derive(Debug, Clone)]
struct Node {
    start: usize,
    // Largest examined length in the bucket
    span: usize,
    // Largest examined end in the subtree
    max: usize,
    height: u32,
    left: Option<NodeId>,
    right: Option<NodeId>,
    stamp: u64,
    bucket: Vec<(MemoId, Entry)>,
}

/// Memo entries indexed by start offset, with lazily shifted positions
#[derive(Debug)]
pub struct IntervalTree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    pending: Vec<Shift>,
    clock: u64,
    flush_threshold: usize,
    entries: usize,
    stats: MemoStats,
}

impl Default for IntervalTree {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn shifted(pos: usize, amount: isize) -> usize {
    pos.checked_add_signed(amount).unwrap_or(0)
}

impl IntervalTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::with_flush_threshold(DEFAULT_FLUSH_THRESHOLD)
    }

    /// Create an empty tree that flushes after `threshold` pending shifts
    pub fn with_flush_threshold(threshold: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            pending: Vec::new(),
            clock: 0,
            flush_threshold: threshold.max(1),
            entries: 0,
            stats: MemoStats::default(),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries
    }

    /// True when the tree holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of shift descriptors not yet applied to every node
    pub fn pending_shifts(&self) -> usize {
        self.pending.len()
    }

    /// Counters
    pub fn stats(&self) -> MemoStats {
        self.stats
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.pending.clear();
        self.entries = 0;
    }

    /// Store an entry
    pub fn insert(&mut self, key: Key, entry: Entry) {
        self.stats.inserts += 1;
        self.entries += 1;
        let root = self.root;
        self.root = Some(self.insert_at(root, key, entry));
    }

    /// Entry for `key`; among duplicates the one whose match ends last
    pub fn get(&mut self, key: Key) -> Option<Entry> {
        let mut cursor = self.root;
        while let Some(id) = cursor {
            self.refresh(id);
            let node = &self.nodes[id];
            cursor = match key.start.cmp(&node.start) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => {
                    let found = node
                        .bucket
                        .iter()
                        .filter(|(id, _)| *id == key.id)
                        .max_by_key(|(_, e)| e.length.unwrap_or(0))
                        .map(|(_, e)| e.clone());
                    match found {
                        Some(_) => self.stats.hits += 1,
                        None => self.stats.misses += 1,
                    }
                    return found;
                }
            };
        }
        self.stats.misses += 1;
        None
    }

    /// Every entry whose examined range intersects `[lo, hi)`, by start offset
    pub fn overlapping(&mut self, lo: usize, hi: usize) -> Vec<(Key, Entry)> {
        let mut out = Vec::new();
        let root = self.root;
        self.collect_overlapping(root, lo, hi, &mut out);
        out
    }

    /// Drop every entry whose examined range intersects `[lo, hi)`.
    /// Returns the number dropped.
    pub fn remove_overlapping(&mut self, lo: usize, hi: usize) -> usize {
        let probe = Edit::new(lo, hi.max(lo), hi.max(lo) - lo);
        self.remove_invalidated(&probe)
    }

    /// Drop the entries the edit invalidates and shift the rest.
    /// Returns the number dropped.
    pub fn apply_edit(&mut self, edit: &Edit) -> usize {
        let removed = self.remove_invalidated(edit);
        let amount = edit.shift();
        if amount != 0 && self.root.is_some() {
            self.clock += 1;
            self.pending.push(Shift {
                index: edit.start,
                amount,
                ts: self.clock,
            });
            if self.pending.len() > self.flush_threshold {
                self.flush();
            }
        }
        log_debug!(
            "memo edit {}..{} (+{}): removed {}, {} entries left, {} shifts pending",
            edit.start,
            edit.end,
            edit.new_length,
            removed,
            self.entries,
            self.pending.len()
        );
        removed
    }

    /// Apply every pending shift to every node
    pub fn flush(&mut self) {
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            self.refresh(id);
            stack.extend(self.nodes[id].left);
            stack.extend(self.nodes[id].right);
        }
        self.pending.clear();
        self.stats.flushes += 1;
        log_trace!("memo tree flushed at clock {}", self.clock);
    }

    fn remove_invalidated(&mut self, edit: &Edit) -> usize {
        let mut touched = Vec::new();
        let root = self.root;
        self.collect_touched(root, edit, &mut touched);

        let mut removed = 0;
        for start in touched {
            let mut bucket = None;
            let root = self.root;
            self.root = self.remove_at(root, start, &mut bucket);
            for (id, entry) in bucket.unwrap_or_default() {
                if invalidated_by(start, entry.examined, edit) {
                    removed += 1;
                } else {
                    let root = self.root;
                    self.root = Some(self.insert_at(root, Key::new(id, start), entry));
                }
            }
        }
        self.entries -= removed;
        self.stats.evicted += removed as u64;
        removed
    }

    // Bring a node into current coordinates
    fn refresh(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        if node.stamp == self.clock {
            return;
        }
        let first = self.pending.partition_point(|s| s.ts <= node.stamp);
        for shift in &self.pending[first..] {
            let (start, max) = (node.start, node.max);
            if start >= shift.index {
                node.start = shifted(start, shift.amount);
            }
            if max > shift.index {
                node.max = shifted(max, shift.amount);
            }
        }
        node.stamp = self.clock;
    }

    fn alloc(&mut self, key: Key, entry: Entry) -> NodeId {
        let span = entry.examined;
        let node = Node {
            start: key.start,
            span,
            max: key.start + span,
            height: 1,
            left: None,
            right: None,
            stamp: self.clock,
            bucket: vec![(key.id, entry)],
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id].bucket = Vec::new();
        self.nodes[id].left = None;
        self.nodes[id].right = None;
        self.free.push(id);
    }

    #[inline]
    fn height(&self, node: Option<NodeId>) -> u32 {
        node.map_or(0, |id| self.nodes[id].height)
    }

    // Recompute height and max from refreshed children
    fn update(&mut self, id: NodeId) {
        let (left, right) = (self.nodes[id].left, self.nodes[id].right);
        let mut max = self.nodes[id].start + self.nodes[id].span;
        for child in [left, right].into_iter().flatten() {
            self.refresh(child);
            max = max.max(self.nodes[child].max);
        }
        let height = 1 + self.height(left).max(self.height(right));
        let node = &mut self.nodes[id];
        node.max = max;
        node.height = height;
    }

    fn rotate_right(&mut self, y: NodeId) -> NodeId {
        let Some(x) = self.nodes[y].left else {
            return y;
        };
        self.refresh(x);
        self.nodes[y].left = self.nodes[x].right;
        self.nodes[x].right = Some(y);
        self.update(y);
        self.update(x);
        x
    }

    fn rotate_left(&mut self, x: NodeId) -> NodeId {
        let Some(y) = self.nodes[x].right else {
            return x;
        };
        self.refresh(y);
        self.nodes[x].right = self.nodes[y].left;
        self.nodes[y].left = Some(x);
        self.update(x);
        self.update(y);
        y
    }

    // `id` must be refreshed
    fn balance(&mut self, id: NodeId) -> NodeId {
        self.update(id);
        let (left, right) = (self.nodes[id].left, self.nodes[id].right);
        let factor = self.height(left) as i64 - self.height(right) as i64;
        if factor > 1 {
            if let Some(l) = left {
                if self.height(self.nodes[l].left) < self.height(self.nodes[l].right) {
                    self.nodes[id].left = Some(self.rotate_left(l));
                }
            }
            return self.rotate_right(id);
        }
        if factor < -1 {
            if let Some(r) = right {
                if self.height(self.nodes[r].right) < self.height(self.nodes[r].left) {
                    self.nodes[id].right = Some(self.rotate_right(r));
                }
            }
            return self.rotate_left(id);
        }
        id
    }

    fn insert_at(&mut self, node: Option<NodeId>, key: Key, entry: Entry) -> NodeId {
        let Some(id) = node else {
            return self.alloc(key, entry);
        };
        self.refresh(id);
        match key.start.cmp(&self.nodes[id].start) {
            Ordering::Less => {
                let left = self.nodes[id].left;
                let child = self.insert_at(left, key, entry);
                self.nodes[id].left = Some(child);
            }
            Ordering::Greater => {
                let right = self.nodes[id].right;
                let child = self.insert_at(right, key, entry);
                self.nodes[id].right = Some(child);
            }
            Ordering::Equal => {
                let node = &mut self.nodes[id];
                // A repeat of an identical outcome replaces the old one
                match node
                    .bucket
                    .iter_mut()
                    .find(|(mid, e)| *mid == key.id && e.length == entry.length)
                {
                    Some(slot) => {
                        slot.1 = entry;
                        self.entries -= 1;
                    }
                    None => node.bucket.push((key.id, entry)),
                }
                // A replacement may have examined less than the entry it replaced
                node.span = node.bucket.iter().map(|(_, e)| e.examined).max().unwrap_or(0);
            }
        }
        self.balance(id)
    }

    fn remove_at(
        &mut self,
        node: Option<NodeId>,
        start: usize,
        out: &mut Option<Vec<(MemoId, Entry)>>,
    ) -> Option<NodeId> {
        let id = node?;
        self.refresh(id);
        match start.cmp(&self.nodes[id].start) {
            Ordering::Less => {
                let left = self.nodes[id].left;
                self.nodes[id].left = self.remove_at(left, start, out);
            }
            Ordering::Greater => {
                let right = self.nodes[id].right;
                self.nodes[id].right = self.remove_at(right, start, out);
            }
            Ordering::Equal => {
                *out = Some(std::mem::take(&mut self.nodes[id].bucket));
                match (self.nodes[id].left, self.nodes[id].right) {
                    (None, None) => {
                        self.release(id);
                        return None;
                    }
                    (Some(child), None) | (None, Some(child)) => {
                        self.release(id);
                        return Some(child);
                    }
                    (Some(_), Some(right)) => {
                        let (rest, successor) = self.take_min(right);
                        let moved = std::mem::take(&mut self.nodes[successor].bucket);
                        let (s_start, s_span) =
                            (self.nodes[successor].start, self.nodes[successor].span);
                        self.release(successor);
                        let node = &mut self.nodes[id];
                        node.start = s_start;
                        node.span = s_span;
                        node.bucket = moved;
                        node.right = rest;
                    }
                }
            }
        }
        Some(self.balance(id))
    }

    // Detach the leftmost node of a subtree: (new subtree root, detached node)
    fn take_min(&mut self, id: NodeId) -> (Option<NodeId>, NodeId) {
        self.refresh(id);
        match self.nodes[id].left {
            None => (self.nodes[id].right, id),
            Some(left) => {
                let (rest, min) = self.take_min(left);
                self.nodes[id].left = rest;
                (Some(self.balance(id)), min)
            }
        }
    }

    fn collect_touched(&mut self, node: Option<NodeId>, edit: &Edit, out: &mut Vec<usize>) {
        let Some(id) = node else {
            return;
        };
        self.refresh(id);
        if self.nodes[id].max <= edit.start {
            return;
        }
        let left = self.nodes[id].left;
        self.collect_touched(left, edit, out);

        let node = &self.nodes[id];
        if node.start >= edit.end {
            return;
        }
        let start = node.start;
        if node
            .bucket
            .iter()
            .any(|(_, e)| invalidated_by(start, e.examined, edit))
        {
            out.push(start);
        }
        let right = node.right;
        self.collect_touched(right, edit, out);
    }

    fn collect_overlapping(
        &mut self,
        node: Option<NodeId>,
        lo: usize,
        hi: usize,
        out: &mut Vec<(Key, Entry)>,
    ) {
        let Some(id) = node else {
            return;
        };
        self.refresh(id);
        if self.nodes[id].max <= lo {
            return;
        }
        let left = self.nodes[id].left;
        self.collect_overlapping(left, lo, hi, out);

        let node = &self.nodes[id];
        if node.start >= hi {
            return;
        }
        let start = node.start;
        out.extend(
            node.bucket
                .iter()
                .filter(|(_, e)| start + e.examined > lo)
                .map(|(mid, e)| (Key::new(*mid, start), e.clone())),
        );
        let right = node.right;
        self.collect_overlapping(right, lo, hi, out);
    }

    /// Check ordering, balance and augmentation of the whole tree
    #[cfg(test)]
    fn check(&mut self) -> bool {
        fn walk(t: &mut IntervalTree, node: Option<NodeId>, lo: Option<usize>, hi: Option<usize>) -> Option<(u32, usize)> {
            let Some(id) = node else {
                return Some((0, 0));
            };
            t.refresh(id);
            let start = t.nodes[id].start;
            if lo.is_some_and(|l| start <= l) || hi.is_some_and(|h| start >= h) {
                return None;
            }
            let (left, right) = (t.nodes[id].left, t.nodes[id].right);
            let (hl, ml) = walk(t, left, lo, Some(start))?;
            let (hr, mr) = walk(t, right, Some(start), hi)?;
            let node = &t.nodes[id];
            let own = node.bucket.iter().map(|(_, e)| start + e.examined).max()?;
            let max = own.max(ml).max(mr);
            if node.max != max || hl.abs_diff(hr) > 1 || node.height != 1 + hl.max(hr) {
                return None;
            }
            Some((node.height, max))
        }
        let root = self.root;
        walk(self, root, None, None).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(len: usize, examined: usize) -> Entry {
        Entry::success(len, examined, Vec::new())
    }

    fn starts(tree: &mut IntervalTree) -> Vec<usize> {
        tree.overlapping(0, usize::MAX).into_iter().map(|(k, _)| k.start).collect()
    }

    #[test]
    fn test_insert_get_and_balance() {
        let mut tree = IntervalTree::new();
        for i in 0..200 {
            tree.insert(Key::new(1, i * 3), entry(2, 4));
        }
        assert_eq!(tree.len(), 200);
        assert!(tree.check());
        assert_eq!(tree.get(Key::new(1, 33)).and_then(|e| e.length), Some(2));
        assert!(tree.get(Key::new(1, 34)).is_none());
        assert!(tree.get(Key::new(2, 33)).is_none());
    }

    #[test]
    fn test_duplicates_return_longest_match() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(5, 10), entry(2, 3));
        tree.insert(Key::new(5, 10), entry(7, 8));
        tree.insert(Key::new(6, 10), entry(1, 2));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(Key::new(5, 10)).and_then(|e| e.length), Some(7));
        // identical outcome replaces
        tree.insert(Key::new(6, 10), entry(1, 2));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_replacement_with_smaller_examined_range() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(1, 0), entry(2, 6)); // [0, 6)
        tree.insert(Key::new(1, 0), entry(2, 3)); // replaces it: [0, 3)
        assert_eq!(tree.len(), 1);
        assert!(tree.check());

        // deletion past the entry leaves it in place
        assert_eq!(tree.apply_edit(&Edit::delete(5, 4)), 0);
        assert!(tree.check());

        // byte 2 was examined, so the entry goes
        assert_eq!(tree.apply_edit(&Edit::new(2, 3, 1)), 1);
        assert!(tree.is_empty());
        assert!(tree.overlapping(0, usize::MAX).is_empty());
        assert!(tree.check());
    }

    #[test]
    fn test_replacement_inside_larger_tree() {
        let mut tree = IntervalTree::with_flush_threshold(2);
        for i in 0..20 {
            tree.insert(Key::new(1, i * 10), entry(2, 9));
        }
        // shrink the entry at 50 from [50, 59) to [50, 52)
        tree.insert(Key::new(1, 50), entry(2, 2));
        assert_eq!(tree.len(), 20);
        assert!(tree.check());

        assert_eq!(tree.apply_edit(&Edit::delete(53, 4)), 0);
        assert!(tree.check());
        assert_eq!(tree.apply_edit(&Edit::insert(51, 1)), 1);
        assert!(tree.get(Key::new(1, 50)).is_none());
        assert_eq!(tree.len(), 19);
        assert!(tree.check());
    }

    #[test]
    fn test_edit_removes_overlaps_and_shifts_rest() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(1, 0), entry(5, 5)); // [0, 5)
        tree.insert(Key::new(1, 5), entry(5, 6)); // [5, 11)
        tree.insert(Key::new(1, 20), entry(3, 3)); // [20, 23)

        let removed = tree.apply_edit(&Edit::new(8, 9, 3));
        assert_eq!(removed, 1);
        assert_eq!(tree.len(), 2);
        assert_eq!(starts(&mut tree), vec![0, 22]);
        assert!(tree.get(Key::new(1, 22)).is_some());
        assert!(tree.get(Key::new(1, 20)).is_none());
        assert!(tree.check());
    }

    #[test]
    fn test_insertion_inside_examined_range_invalidates() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(1, 4), entry(2, 4)); // [4, 8)
        tree.insert(Key::new(1, 8), entry(2, 2)); // [8, 10)
        assert_eq!(tree.apply_edit(&Edit::insert(6, 2)), 1);
        assert_eq!(starts(&mut tree), vec![10]);

        // insertion exactly at an entry start moves the entry
        assert_eq!(tree.apply_edit(&Edit::insert(10, 1)), 0);
        assert_eq!(starts(&mut tree), vec![11]);
    }

    #[test]
    fn test_shift_uses_pre_shift_values() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(1, 2), entry(1, 2)); // [2, 4)
        tree.insert(Key::new(1, 10), entry(1, 2)); // [10, 12)
        // deletion of [4, 8): the second entry lands at 6
        tree.apply_edit(&Edit::delete(4, 4));
        // the end of the first entry (4) must not shift on a later edit at 4
        tree.apply_edit(&Edit::insert(4, 10));
        assert_eq!(starts(&mut tree), vec![2, 16]);
        assert!(tree.check());
    }

    #[test]
    fn test_flush_after_threshold() {
        let mut tree = IntervalTree::with_flush_threshold(3);
        for i in 0..10 {
            tree.insert(Key::new(1, 100 + i * 10), entry(1, 2));
        }
        for _ in 0..4 {
            tree.apply_edit(&Edit::insert(0, 1));
        }
        assert_eq!(tree.pending_shifts(), 0);
        assert_eq!(tree.stats().flushes, 1);
        assert_eq!(starts(&mut tree)[0], 104);
        assert!(tree.check());
    }

    #[test]
    fn test_many_random_edits_keep_tree_valid() {
        let mut tree = IntervalTree::with_flush_threshold(5);
        let mut seed = 12345u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        for _ in 0..300 {
            let start = next() % 1000;
            tree.insert(Key::new((next() % 3) as MemoId, start), entry(1, 1 + next() % 20));
        }
        for _ in 0..50 {
            let start = next() % 1000;
            let end = start + next() % 10;
            tree.apply_edit(&Edit::new(start, end, next() % 10));
            assert!(tree.check());
        }
    }

    #[test]
    fn test_remove_overlapping() {
        let mut tree = IntervalTree::new();
        tree.insert(Key::new(1, 0), entry(1, 3));
        tree.insert(Key::new(1, 10), entry(1, 3));
        assert_eq!(tree.remove_overlapping(2, 4), 1);
        assert_eq!(starts(&mut tree), vec![10]);
    }
}
