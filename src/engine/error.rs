//! Error types
//!
//! Compilation, encoding and decoding fail with their own error enums. A run
//! of the VM that simply does not match is not an error; [`VmError`] is
//! reserved for broken bytecode or a stack discipline violation, which abort
//! the run immediately.

use std::fmt;

/// Errors raised while compiling a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A non-terminal names a rule that no enclosing grammar defines
    UndefinedNonTerminal {
        /// The unresolved name
        name: String,
    },

    /// Two rules of one grammar share a name
    DuplicateRule {
        /// The repeated name
        name: String,
    },

    /// A rule can reach itself without consuming input
    LeftRecursion {
        /// Rule where the cycle was detected
        name: String,
    },

    /// A repetition whose body can match the empty string
    EmptyLoopBody,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UndefinedNonTerminal { name } => {
                write!(f, "Undefined non-terminal: {}", name)
            }
            CompileError::DuplicateRule { name } => {
                write!(f, "Rule defined more than once: {}", name)
            }
            CompileError::LeftRecursion { name } => {
                write!(f, "Rule may be left recursive: {}", name)
            }
            CompileError::EmptyLoopBody => {
                write!(f, "Loop body may accept the empty string")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors raised while encoding a program to bytecode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// More distinct charsets than a one-byte index can address
    TooManyCharsets {
        /// Number of distinct charsets in the program
        count: usize,
    },

    /// A control-flow instruction targets a label that is never placed
    UnboundLabel {
        /// The missing label
        label: usize,
    },

    /// The stream grew past what a label operand can address
    OffsetOverflow {
        /// Offending byte offset
        offset: usize,
    },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::TooManyCharsets { count } => {
                write!(f, "Too many charsets: {} exceeds limit of 256", count)
            }
            EncodeError::UnboundLabel { label } => {
                write!(f, "Label L{} is referenced but never placed", label)
            }
            EncodeError::OffsetOverflow { offset } => {
                write!(f, "Bytecode offset {} does not fit a label operand", offset)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors raised while decoding bytecode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended inside the header, table or an instruction
    Truncated {
        /// Offset where more bytes were needed
        offset: usize,
    },

    /// An opcode byte that names no instruction
    UnknownOpcode {
        /// Offset of the opcode
        offset: usize,
        /// The opcode byte
        opcode: u8,
    },

    /// A charset operand outside the charset table
    BadCharsetIndex {
        /// Offset of the instruction
        offset: usize,
        /// The index found
        index: u8,
    },

    /// A label operand that is not the start of an instruction
    BadLabel {
        /// Offset of the instruction
        offset: usize,
        /// The target found
        target: u32,
    },

    /// The stream does not end with an End instruction
    MissingEnd,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { offset } => {
                write!(f, "Bytecode truncated at offset {}", offset)
            }
            DecodeError::UnknownOpcode { offset, opcode } => {
                write!(f, "Unknown opcode 0x{:02x} at offset {}", opcode, offset)
            }
            DecodeError::BadCharsetIndex { offset, index } => {
                write!(f, "Charset index {} out of range at offset {}", index, offset)
            }
            DecodeError::BadLabel { offset, target } => {
                write!(
                    f,
                    "Jump target {} at offset {} is not an instruction boundary",
                    target, offset
                )
            }
            DecodeError::MissingEnd => write!(f, "Bytecode does not end with End"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Fatal VM conditions
///
/// These signal a compiler or encoder defect, or corrupted bytecode. They are
/// never produced by a well-formed program on any input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// An instruction needed a frame but the stack was empty
    StackUnderflow {
        /// Instruction mnemonic
        instruction: &'static str,
        /// Bytecode offset
        offset: usize,
    },

    /// The top frame is of the wrong kind for the instruction
    FrameMismatch {
        /// Instruction mnemonic
        instruction: &'static str,
        /// Bytecode offset
        offset: usize,
        /// Kind of frame that was found
        found: &'static str,
    },

    /// Unreadable bytecode: bad opcode, operand or jump target
    CorruptCode {
        /// Bytecode offset
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// The backtrack stack grew past the configured limit
    StackOverflow {
        /// Depth reached
        depth: usize,
        /// Configured limit
        max_depth: usize,
    },
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackUnderflow {
                instruction,
                offset,
            } => {
                write!(f, "{} at offset {} found an empty stack", instruction, offset)
            }
            VmError::FrameMismatch {
                instruction,
                offset,
                found,
            } => {
                write!(
                    f,
                    "{} at offset {} found a {} frame on top of the stack",
                    instruction, offset, found
                )
            }
            VmError::CorruptCode { offset, reason } => {
                write!(f, "Corrupt bytecode at offset {}: {}", offset, reason)
            }
            VmError::StackOverflow { depth, max_depth } => {
                write!(
                    f,
                    "Stack overflow: depth {} exceeds limit of {}",
                    depth, max_depth
                )
            }
        }
    }
}

impl std::error::Error for VmError {}

/// Any error produced by the crate's facades
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Compilation failed
    Compile(CompileError),
    /// Encoding failed
    Encode(EncodeError),
    /// Decoding failed
    Decode(DecodeError),
    /// The VM aborted
    Vm(VmError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(e) => write!(f, "Compile error: {}", e),
            Error::Encode(e) => write!(f, "Encode error: {}", e),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::Vm(e) => write!(f, "VM error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Compile(e) => Some(e),
            Error::Encode(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Vm(e) => Some(e),
        }
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Error::Compile(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<VmError> for Error {
    fn from(e: VmError) -> Self {
        Error::Vm(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_message_names_identifier() {
        let e = CompileError::UndefinedNonTerminal {
            name: "Value".to_string(),
        };
        assert!(e.to_string().contains("Value"));
    }

    #[test]
    fn test_wrapping_keeps_source() {
        use std::error::Error as _;
        let e: Error = VmError::StackOverflow {
            depth: 10,
            max_depth: 5,
        }
        .into();
        assert!(e.source().is_some());
        assert!(e.to_string().contains("Stack overflow"));
    }
}
