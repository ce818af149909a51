//! Prelude module for convenient imports
//!
//! ```
//! use repeg::prelude::*;
//! ```
//!
//! # Re-exported Items
//!
//! ## Pattern DSL
//! - [`lit()`], [`class()`], [`range()`], [`one_of()`], [`any()`], [`any_n()`]
//! - [`seq()`], [`choice()`], [`nt()`], [`search()`], [`empty()`]
//! - [`Pattern`], [`GrammarBuilder`], [`Charset`]
//!
//! ## Running
//! - [`Parser`], [`ParserConfig`], [`MatchResult`], [`Capture`]
//! - [`IncrementalParser`], [`Edit`], [`IncrementalResult`]
//! - [`MemoTable`], [`IntervalTable`], [`LruTable`], [`NoopTable`]
//!
//! ## Errors
//! - [`Error`], [`CompileError`], [`VmError`]

// ============================================================================
// Pattern DSL
// ============================================================================

pub use crate::engine::charset::Charset;
pub use crate::engine::pattern::{
    any, any_n, choice, class, empty, lit, nt, one_of, range, search, seq, GrammarBuilder,
    Pattern,
};

// ============================================================================
// Running
// ============================================================================

pub use crate::engine::capture::Capture;
pub use crate::engine::compiler::CompilerConfig;
pub use crate::engine::incremental::{Edit, IncrementalParser, IncrementalResult};
pub use crate::engine::input::{ChunkedInput, Input};
pub use crate::engine::memo::{IntervalTable, LruTable, MemoConfig, MemoTable, NoopTable};
pub use crate::engine::parser::{Parser, ParserConfig};
pub use crate::engine::vm::{MatchResult, VmConfig};

// ============================================================================
// Errors
// ============================================================================

pub use crate::engine::error::{CompileError, Error, VmError};
