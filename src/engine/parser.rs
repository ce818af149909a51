//! Compile-once, parse-many facade
//!
//! A [`Parser`] owns the encoded program. Each parse builds a fresh [`Vm`]
//! over it, so a parser can be shared between threads.
//!
//! # Example
//!
//! ```rust
//! use repeg::prelude::*;
//!
//! let number = range(b'0', b'9').plus().capture(1);
//! let list = number.clone().then(lit(",").then(number).star());
//! let parser = Parser::new(&list).unwrap();
//!
//! let result = parser.parse("1,22,333").unwrap();
//! assert!(result.matched);
//! assert_eq!(result.find_all(1).len(), 3);
//! ```

use super::compiler::{Compiler, CompilerConfig};
use super::encoder::{encode, VmCode};
use super::error::Error;
use super::input::Input;
use super::instruction::Program;
use super::memo::{MemoTable, NoopTable};
use super::pattern::Pattern;
use super::vm::{MatchResult, Vm, VmConfig, VmStats};

/// Options for building and running a [`Parser`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserConfig {
    /// Compiler options
    pub compiler: CompilerConfig,
    /// VM options
    pub vm: VmConfig,
}

impl ParserConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compiler options
    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }

    /// Set the VM options
    pub fn with_vm(mut self, vm: VmConfig) -> Self {
        self.vm = vm;
        self
    }

    /// Set the stack depth limit
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.vm = self.vm.with_max_stack_depth(depth);
        self
    }

    /// Wrap every grammar rule in a memo region
    pub fn with_memoize_rules(mut self, memoize: bool) -> Self {
        self.compiler = self.compiler.with_memoize_rules(memoize);
        self
    }
}

/// A compiled pattern ready to run
#[derive(Debug, Clone)]
pub struct Parser {
    code: VmCode,
    vm_config: VmConfig,
}

impl Parser {
    /// Compile with default options
    pub fn new(pattern: &Pattern) -> Result<Self, Error> {
        Self::with_config(pattern, ParserConfig::default())
    }

    /// Compile with explicit options
    pub fn with_config(pattern: &Pattern, config: ParserConfig) -> Result<Self, Error> {
        let program = Compiler::with_config(config.compiler).compile(pattern)?;
        let mut parser = Self::from_program(&program)?;
        parser.vm_config = config.vm;
        Ok(parser)
    }

    /// Encode an already compiled program
    pub fn from_program(program: &Program) -> Result<Self, Error> {
        Ok(Self::from_code(encode(program)?))
    }

    /// Use encoded code as is
    pub fn from_code(code: VmCode) -> Self {
        Self {
            code,
            vm_config: VmConfig::default(),
        }
    }

    /// Load code from the binary format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_code(VmCode::from_bytes(bytes)?))
    }

    /// Set the VM options used by later parses
    pub fn set_vm_config(&mut self, config: VmConfig) {
        self.vm_config = config;
    }

    /// The encoded program
    pub fn code(&self) -> &VmCode {
        &self.code
    }

    /// Match without memoization
    pub fn parse<I: Input + ?Sized>(&self, input: &I) -> Result<MatchResult, Error> {
        self.parse_with(input, &NoopTable)
    }

    /// Match using `table` for memo regions
    pub fn parse_with<I: Input + ?Sized>(
        &self,
        input: &I,
        table: &dyn MemoTable,
    ) -> Result<MatchResult, Error> {
        self.parse_with_stats(input, table).map(|(result, _)| result)
    }

    /// Match using `table` and report the run's counters
    pub fn parse_with_stats<I: Input + ?Sized>(
        &self,
        input: &I,
        table: &dyn MemoTable,
    ) -> Result<(MatchResult, VmStats), Error> {
        let mut vm = Vm::new(&self.code, self.vm_config);
        let result = vm.run(input, table)?;
        Ok((result, vm.stats()))
    }
}
