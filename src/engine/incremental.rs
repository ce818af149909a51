//! Incremental reparsing
//!
//! Memo entries remember how many bytes their outcome depends on. When the
//! document changes, the table drops the entries whose examined range touches
//! the edit and moves the rest to their new offsets. Reparsing the edited
//! document with the same table then reuses every entry that survived.
//!
//! ```text
//!   before   [--Value--][--Value--][--Value--]
//!   edit                     ^^ replaced
//!   after    [--Value--]            [--Value--]   <- shifted, reused
//! ```
//!
//! # Usage
//!
//! ```rust
//! use repeg::prelude::*;
//!
//! let word = range(b'a', b'z').plus().memo(1);
//! let text = word.clone().then(lit(" ").then(word).star());
//! let mut parser = IncrementalParser::new(Parser::new(&text).unwrap());
//!
//! parser.parse("hello big world").unwrap();
//! let edit = Edit::replace(6, 3, 5);
//! let again = parser.parse_with_edit("hello large world", edit).unwrap();
//! assert!(again.result.matched);
//! assert_eq!(again.result.length, 17);
//! ```

use super::error::Error;
use super::input::Input;
use super::memo::{IntervalTable, MemoTable};
use super::parser::Parser;
use super::vm::{MatchResult, VmStats};
use std::ops::Range;

/// One change to a document: bytes `start..end` replaced by `new_length`
/// new bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edit {
    /// First replaced byte (old coordinates)
    pub start: usize,
    /// One past the last replaced byte (old coordinates)
    pub end: usize,
    /// Number of bytes inserted in their place
    pub new_length: usize,
}

impl Edit {
    /// Create an edit; `end` is raised to `start` if it is smaller
    #[inline]
    pub fn new(start: usize, end: usize, new_length: usize) -> Self {
        Self {
            start,
            end: end.max(start),
            new_length,
        }
    }

    /// Insert `length` bytes at `offset`
    #[inline]
    pub fn insert(offset: usize, length: usize) -> Self {
        Self::new(offset, offset, length)
    }

    /// Delete `length` bytes at `offset`
    #[inline]
    pub fn delete(offset: usize, length: usize) -> Self {
        Self::new(offset, offset + length, 0)
    }

    /// Replace `old_length` bytes at `offset` with `new_length` bytes
    #[inline]
    pub fn replace(offset: usize, old_length: usize, new_length: usize) -> Self {
        Self::new(offset, offset + old_length, new_length)
    }

    /// Number of bytes removed
    #[inline]
    pub fn old_length(&self) -> usize {
        self.end - self.start
    }

    /// Change in document length
    #[inline]
    pub fn shift(&self) -> isize {
        self.new_length as isize - self.old_length() as isize
    }

    /// Replaced range in old coordinates
    #[inline]
    pub fn old_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Inserted range in new coordinates
    #[inline]
    pub fn new_range(&self) -> Range<usize> {
        self.start..self.start + self.new_length
    }

    /// Map an offset from old to new coordinates.
    ///
    /// Offsets inside the replaced range map to the end of the inserted text.
    pub fn translate_position(&self, pos: usize) -> usize {
        if pos <= self.start {
            pos
        } else if pos <= self.end {
            self.start + self.new_length
        } else {
            pos.checked_add_signed(self.shift()).unwrap_or(0)
        }
    }
}

/// Outcome of a reparse
#[derive(Debug, Clone)]
pub struct IncrementalResult {
    /// The match
    pub result: MatchResult,
    /// Counters of the run
    pub stats: VmStats,
    /// Memo entries the run reused
    pub reused_entries: usize,
    /// Memo entries the edits invalidated
    pub invalidated_entries: usize,
}

impl IncrementalResult {
    /// Share of touched entries that were reused rather than invalidated
    /// (0.0 when neither happened)
    pub fn efficiency(&self) -> f64 {
        let total = self.reused_entries + self.invalidated_entries;
        if total == 0 {
            0.0
        } else {
            self.reused_entries as f64 / total as f64
        }
    }
}

/// A parser paired with the memo table it keeps across edits
///
/// The caller owns the document and reports every change with an [`Edit`]
/// before reparsing.
#[derive(Debug)]
pub struct IncrementalParser<T: MemoTable = IntervalTable> {
    parser: Parser,
    table: T,
    edits_applied: usize,
}

impl IncrementalParser<IntervalTable> {
    /// Use an interval table with default options
    pub fn new(parser: Parser) -> Self {
        Self::with_table(parser, IntervalTable::new())
    }
}

impl<T: MemoTable> IncrementalParser<T> {
    /// Use a specific table
    pub fn with_table(parser: Parser, table: T) -> Self {
        Self {
            parser,
            table,
            edits_applied: 0,
        }
    }

    /// The underlying parser
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// The memo table
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Number of edits applied since the last full parse
    pub fn edits_applied(&self) -> usize {
        self.edits_applied
    }

    /// Parse from scratch, discarding every memo entry
    pub fn parse<I: Input + ?Sized>(&mut self, input: &I) -> Result<MatchResult, Error> {
        self.table.clear();
        self.edits_applied = 0;
        self.parser.parse_with(input, &self.table)
    }

    /// Report a change to the document. Returns the number of entries dropped.
    pub fn apply_edit(&mut self, edit: Edit) -> usize {
        self.edits_applied += 1;
        self.table.apply_edit(&edit)
    }

    /// Parse again with whatever the table holds
    pub fn reparse<I: Input + ?Sized>(&self, input: &I) -> Result<IncrementalResult, Error> {
        self.run(input, 0)
    }

    /// Apply one edit, then reparse the edited document
    pub fn parse_with_edit<I: Input + ?Sized>(
        &mut self,
        input: &I,
        edit: Edit,
    ) -> Result<IncrementalResult, Error> {
        let invalidated = self.apply_edit(edit);
        self.run(input, invalidated)
    }

    /// Apply several edits in order, then reparse.
    ///
    /// Each edit is in the coordinates produced by the ones before it.
    pub fn parse_with_edits<I: Input + ?Sized>(
        &mut self,
        input: &I,
        edits: &[Edit],
    ) -> Result<IncrementalResult, Error> {
        let invalidated = edits.iter().map(|&e| self.apply_edit(e)).sum();
        self.run(input, invalidated)
    }

    /// Drop every memo entry
    pub fn clear(&mut self) {
        self.table.clear();
        self.edits_applied = 0;
    }

    fn run<I: Input + ?Sized>(&self, input: &I, invalidated: usize) -> Result<IncrementalResult, Error> {
        let (result, stats) = self.parser.parse_with_stats(input, &self.table)?;
        log_debug!(
            "reparse: {} entries invalidated, {} reused, {} recomputed",
            invalidated,
            stats.memo_hits,
            stats.memo_misses
        );
        Ok(IncrementalResult {
            result,
            stats,
            reused_entries: stats.memo_hits as usize,
            invalidated_entries: invalidated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memo::{LruTable, MemoConfig};
    use crate::engine::pattern::*;

    #[test]
    fn test_edit_creation() {
        let insert = Edit::insert(5, 3);
        assert_eq!((insert.start, insert.end, insert.new_length), (5, 5, 3));
        assert_eq!(insert.shift(), 3);

        let delete = Edit::delete(5, 3);
        assert_eq!(delete.old_length(), 3);
        assert_eq!(delete.shift(), -3);

        let replace = Edit::replace(5, 3, 4);
        assert_eq!(replace.old_range(), 5..8);
        assert_eq!(replace.new_range(), 5..9);
        assert_eq!(replace.shift(), 1);

        assert_eq!(Edit::new(9, 4, 0).end, 9);
    }

    #[test]
    fn test_translate_position() {
        let edit = Edit::insert(5, 3);
        assert_eq!(edit.translate_position(4), 4);
        assert_eq!(edit.translate_position(5), 5);
        assert_eq!(edit.translate_position(6), 9);

        let edit = Edit::delete(5, 3);
        assert_eq!(edit.translate_position(6), 5);
        assert_eq!(edit.translate_position(8), 5);
        assert_eq!(edit.translate_position(9), 6);
    }

    #[test]
    fn test_efficiency() {
        let result = IncrementalResult {
            result: MatchResult::default(),
            stats: VmStats::default(),
            reused_entries: 80,
            invalidated_entries: 20,
        };
        assert!((result.efficiency() - 0.8).abs() < 1e-9);
    }

    fn words() -> Parser {
        let word = range(b'a', b'z').plus().capture(1).memo(1);
        Parser::new(&word.clone().then(lit(" ").then(word).star())).unwrap()
    }

    #[test]
    fn test_reparse_after_edit_matches_scratch() {
        let mut inc = IncrementalParser::with_table(
            words(),
            IntervalTable::with_config(MemoConfig::new().with_min_examined(1)),
        );
        inc.parse("alpha beta gamma delta").unwrap();
        let before = inc.table().len();

        let edited = "alpha beta gam delta";
        let edit = Edit::replace(11, 5, 3);
        let again = inc.parse_with_edit(edited, edit).unwrap();

        let scratch = words().parse(edited).unwrap();
        assert_eq!(again.result, scratch);
        assert!(again.invalidated_entries >= 1);
        assert!(again.reused_entries >= 2);
        assert!(inc.table().len() <= before + 1);
    }

    #[test]
    fn test_several_edits_in_sequence() {
        let mut inc = IncrementalParser::with_table(words(), LruTable::new(64, 1));
        inc.parse("one two three").unwrap();
        let edits = [Edit::insert(0, 4), Edit::replace(8, 3, 3)];
        // "one two three" -> "zer one two three" -> "zer one six three"
        let again = inc.parse_with_edits("zer one six three", &edits).unwrap();
        let scratch = words().parse("zer one six three").unwrap();
        assert_eq!(again.result, scratch);
        assert_eq!(inc.edits_applied(), 2);
    }

    #[test]
    fn test_unedited_reparse_reuses_everything() {
        let mut inc = IncrementalParser::new(words());
        let first = inc.parse("lorem ipsum dolor").unwrap();
        let again = inc.reparse("lorem ipsum dolor").unwrap();
        assert_eq!(first, again.result);
        assert!(again.stats.memo_hits > 0);
    }
}
