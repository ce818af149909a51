//! repeg - incremental PEG parsing on a bytecode VM
//!
//! Patterns are built with a small combinator DSL, compiled to instructions
//! for a backtracking parsing machine, and encoded to a compact bytecode. The
//! VM can memoize selected sub-patterns in a table that survives document
//! edits, so a reparse after a small change only redoes the work the change
//! actually affects.
//!
//! - Ordered choice, repetition, lookahead, captures, grammars, search
//! - Peephole optimizations: fused test-and-branch, spans, tail calls, inlining
//! - Deterministic bytecode with a stable binary format
//! - Interval-tree memo table with lazily shifted positions
//!
//! ## Quick Start
//!
//! ```rust
//! use repeg::prelude::*;
//!
//! let parser = Parser::new(&lit("ana").then(lit("hi"))).unwrap();
//! let result = parser.parse("anahi").unwrap();
//! assert!(result.matched);
//! assert_eq!(result.length, 5);
//! ```
//!
//! ## Incremental Reparsing
//!
//! ```rust
//! use repeg::prelude::*;
//!
//! let digits = range(b'0', b'9').plus().memo(1);
//! let list = digits.clone().then(lit(",").then(digits).star());
//! let mut parser = IncrementalParser::new(Parser::new(&list).unwrap());
//!
//! parser.parse("1234,5678,9012").unwrap();
//! let again = parser
//!     .parse_with_edit("1234,56,9012", Edit::replace(5, 4, 2))
//!     .unwrap();
//! assert_eq!(again.result.length, 12);
//! ```
//!
//! ## Feature Flags
//!
//! - `logging` - Enable debug logging using the `log` crate

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::should_implement_trait)]

#[macro_use]
mod macros;

// Prelude module for convenient imports
pub mod prelude;

pub mod engine;

/// Re-export commonly used types for convenience
pub use engine::{
    Capture, Charset, CompileError, Compiler, CompilerConfig, DecodeError, Edit, EncodeError,
    Error, IncrementalParser, IncrementalResult, Input, IntervalTable, LruTable, MatchResult,
    MemoConfig, MemoTable, NoopTable, Parser, ParserConfig, Pattern, Program, Vm, VmCode,
    VmConfig, VmError,
};
