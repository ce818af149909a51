//! Parsing engine
//!
//! # Module Organization
//!
//! ## Front end
//! - [`charset`] - 256-bit byte sets
//! - [`pattern`] - Pattern combinators and the grammar builder
//! - [`analysis`] - Checks run before code generation
//! - [`compiler`] - Pattern to instruction compiler
//!
//! ## Bytecode
//! - [`instruction`] - Instruction set
//! - [`encoder`] - Binary encoding, decoding and disassembly
//!
//! ## Execution
//! - [`input`] - Byte sources
//! - [`vm`] - Bytecode interpreter
//! - [`capture`] - Capture trees
//! - [`memo`] - Memo tables
//!
//! ## Facades
//! - [`parser`] - Compile once, parse many
//! - [`incremental`] - Reparse after edits

// ============================================================================
// Module Declarations
// ============================================================================

pub mod analysis;
pub mod capture;
pub mod charset;
pub mod compiler;
pub mod encoder;
pub mod error;
pub mod incremental;
pub mod input;
pub mod instruction;
pub mod memo;
pub mod parser;
pub mod pattern;
pub mod vm;

// ============================================================================
// Core Types
// ============================================================================

pub use capture::Capture;
pub use charset::Charset;
pub use compiler::{Compiler, CompilerConfig};
pub use encoder::VmCode;
pub use error::{CompileError, DecodeError, EncodeError, Error, VmError};
pub use incremental::{Edit, IncrementalParser, IncrementalResult};
pub use input::{ChunkedInput, Input};
pub use instruction::{Instruction, Label, Program};
pub use memo::{Entry, IntervalTable, Key, LruTable, MemoConfig, MemoStats, MemoTable, NoopTable};
pub use parser::{Parser, ParserConfig};
pub use pattern::{CaptureId, GrammarBuilder, MemoId, Pattern, Rule};
pub use vm::{MatchResult, Vm, VmConfig, VmStats};
