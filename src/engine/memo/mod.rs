//! Memoization tables
//!
//! A table maps a [`Key`] (memo id, start offset) to an [`Entry`]: how many
//! bytes the memoized pattern matched there (or that it failed), how many bytes
//! the attempt examined, and the captures it produced.
//!
//! Entries are only worth their bookkeeping when the work they save is large,
//! so the VM skips insertion when fewer than [`MemoTable::min_examined`] bytes
//! were examined.
//!
//! Three tables are provided:
//!
//! | Table             | Lookup   | Edit            | Use                      |
//! |-------------------|----------|-----------------|--------------------------|
//! | [`NoopTable`]     | -        | -               | memoization off          |
//! | [`LruTable`]      | O(1)     | O(n) rebuild    | small bounded caches     |
//! | [`IntervalTable`] | O(log n) | O(k + log n)    | large, edited documents  |
//!
//! All tables lock internally, so a shared reference is enough to use them.

mod interval_tree;
mod lru;

pub use interval_tree::IntervalTree;
pub use lru::LruTable;

use super::capture::Capture;
use super::incremental::Edit;
use super::pattern::MemoId;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default minimum number of examined bytes for an entry to be stored
pub const DEFAULT_MIN_EXAMINED: usize = 4;

/// Default number of pending lazy shifts before the tree is flushed
pub const DEFAULT_FLUSH_THRESHOLD: usize = 32;

/// Table lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Memo id from the pattern
    pub id: MemoId,
    /// Offset the memoized pattern was tried at
    pub start: usize,
}

impl Key {
    /// Create a key
    #[inline]
    pub fn new(id: MemoId, start: usize) -> Self {
        Self { id, start }
    }
}

/// Outcome of trying a memoized pattern at one offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Bytes matched, or `None` when the pattern failed
    pub length: Option<usize>,
    /// Bytes looked at (including one past the last when EOF was probed)
    pub examined: usize,
    /// Captures, relative to the entry's start
    pub captures: Arc<[Capture]>,
}

impl Entry {
    /// A successful match
    pub fn success(length: usize, examined: usize, captures: Vec<Capture>) -> Self {
        Self {
            length: Some(length),
            examined: examined.max(1),
            captures: captures.into(),
        }
    }

    /// A failure
    pub fn failure(examined: usize) -> Self {
        Self {
            length: None,
            examined: examined.max(1),
            captures: Arc::from(Vec::new()),
        }
    }

    /// True when the entry records a match
    #[inline]
    pub fn is_success(&self) -> bool {
        self.length.is_some()
    }

    /// End of the examined range for an entry starting at `start`
    #[inline]
    pub fn examined_end(&self, start: usize) -> usize {
        start + self.examined
    }

    /// End of the matched range; failures end where they start
    #[inline]
    pub fn match_end(&self, start: usize) -> usize {
        start + self.length.unwrap_or(0)
    }
}

/// Table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries stored
    pub inserts: u64,
    /// Entries dropped by capacity limits or edits
    pub evicted: u64,
    /// Full flushes of pending shifts
    pub flushes: u64,
}

impl MemoStats {
    /// Fraction of lookups that hit (0.0 when nothing was looked up)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Interval table options
///
/// # Example
///
/// ```rust
/// use repeg::engine::memo::MemoConfig;
///
/// let config = MemoConfig::new().with_min_examined(1).with_flush_threshold(8);
/// assert_eq!(config.min_examined, 1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MemoConfig {
    /// Entries examining fewer bytes are not stored (never below 1)
    pub min_examined: usize,
    /// Pending shifts tolerated before every node is brought up to date
    pub flush_threshold: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            min_examined: DEFAULT_MIN_EXAMINED,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl MemoConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the insertion threshold (clamped to at least 1)
    pub fn with_min_examined(mut self, min: usize) -> Self {
        self.min_examined = min.max(1);
        self
    }

    /// Set the lazy shift flush threshold
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }
}

/// Storage for memo entries
///
/// Methods take `&self`; implementations synchronize internally.
pub trait MemoTable: Send + Sync {
    /// Look up an entry
    fn get(&self, key: Key) -> Option<Entry>;

    /// Store an entry
    fn put(&self, key: Key, entry: Entry);

    /// Drop entries invalidated by `edit` and move the rest into the new
    /// coordinates. Returns the number of entries dropped.
    fn apply_edit(&self, edit: &Edit) -> usize;

    /// Number of stored entries
    fn len(&self) -> usize;

    /// True when nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    fn clear(&self);

    /// Entries examining fewer bytes are not worth storing
    fn min_examined(&self) -> usize {
        1
    }

    /// Counters
    fn stats(&self) -> MemoStats {
        MemoStats::default()
    }
}

/// A table that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTable;

impl MemoTable for NoopTable {
    fn get(&self, _key: Key) -> Option<Entry> {
        None
    }

    fn put(&self, _key: Key, _entry: Entry) {}

    fn apply_edit(&self, _edit: &Edit) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }

    fn clear(&self) {}

    // Nothing is ever stored, so nothing is worth computing
    fn min_examined(&self) -> usize {
        usize::MAX
    }
}

/// Interval-tree backed table, the one to use for edited documents
#[derive(Debug, Default)]
pub struct IntervalTable {
    tree: Mutex<IntervalTree>,
    min_examined: usize,
}

impl IntervalTable {
    /// Create a table with default options
    pub fn new() -> Self {
        Self::with_config(MemoConfig::default())
    }

    /// Create a table with explicit options
    pub fn with_config(config: MemoConfig) -> Self {
        Self {
            tree: Mutex::new(IntervalTree::with_flush_threshold(config.flush_threshold)),
            min_examined: config.min_examined.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IntervalTree> {
        // A panic while holding the lock leaves the tree consistent: every
        // mutation completes before returning.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the tree
    pub fn with_tree<R>(&self, f: impl FnOnce(&mut IntervalTree) -> R) -> R {
        f(&mut self.lock())
    }
}

impl MemoTable for IntervalTable {
    fn get(&self, key: Key) -> Option<Entry> {
        self.lock().get(key)
    }

    fn put(&self, key: Key, entry: Entry) {
        self.lock().insert(key, entry);
    }

    fn apply_edit(&self, edit: &Edit) -> usize {
        self.lock().apply_edit(edit)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn min_examined(&self) -> usize {
        self.min_examined
    }

    fn stats(&self) -> MemoStats {
        self.lock().stats()
    }
}

/// Whether an entry's examined range `[s, s + examined)` is touched by an
/// edit of `[start, end)`. An insertion point strictly inside the range counts.
#[inline]
pub(crate) fn invalidated_by(s: usize, examined: usize, edit: &Edit) -> bool {
    s < edit.end && s + examined > edit.start
}
