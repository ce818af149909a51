//! Instruction set of the parsing VM
//!
//! Programs are lists of [`Instruction`]s in which control flow refers to
//! symbolic [`Label`]s. The encoder resolves labels to byte offsets; the
//! decoder turns offsets back into labels.
//!
//! # Encoding
//!
//! Every instruction is one opcode byte followed by its operands:
//!
//! | Shape                         | Layout                              | Size |
//! |-------------------------------|-------------------------------------|------|
//! | End, Fail, Return, ...        | `op`                                | 1    |
//! | Char, Set, Span               | `op b` / `op idx`                   | 2    |
//! | Any, CaptureBegin             | `op pad u16`                        | 4    |
//! | CaptureLate, CaptureFull      | `op back u16`                       | 4    |
//! | Jump, Choice, Call, Commit .. | `op pad u32`                        | 6    |
//! | TestChar, TestSet (+NoChoice) | `op b u32` / `op idx u32`           | 6    |
//! | TestAny, MemoOpen             | `op pad u16 u32`                    | 8    |
//!
//! Multi-byte operands are little-endian and start at an even offset from the
//! opcode.

use super::charset::Charset;
use super::pattern::{CaptureId, MemoId};
use std::fmt;

/// Symbolic jump target, resolved to a byte offset by the encoder
pub type Label = usize;

/// Opcode constants (8-bit)
pub mod op {
    // Matching
    pub const END: u8 = 0x00;
    pub const CHAR: u8 = 0x01;
    pub const SET: u8 = 0x02;
    pub const ANY: u8 = 0x03;
    pub const SPAN: u8 = 0x04;

    // Control flow
    pub const JUMP: u8 = 0x10;
    pub const CHOICE: u8 = 0x11;
    pub const CALL: u8 = 0x12;
    pub const COMMIT: u8 = 0x13;
    pub const RETURN: u8 = 0x14;
    pub const FAIL: u8 = 0x15;
    pub const PARTIAL_COMMIT: u8 = 0x16;
    pub const BACK_COMMIT: u8 = 0x17;
    pub const FAIL_TWICE: u8 = 0x18;

    // Fused test-and-branch
    pub const TEST_CHAR: u8 = 0x20;
    pub const TEST_CHAR_NO_CHOICE: u8 = 0x21;
    pub const TEST_SET: u8 = 0x22;
    pub const TEST_SET_NO_CHOICE: u8 = 0x23;
    pub const TEST_ANY: u8 = 0x24;

    // Captures
    pub const CAPTURE_BEGIN: u8 = 0x30;
    pub const CAPTURE_LATE: u8 = 0x31;
    pub const CAPTURE_END: u8 = 0x32;
    pub const CAPTURE_FULL: u8 = 0x33;

    // Memoization
    pub const MEMO_OPEN: u8 = 0x40;
    pub const MEMO_CLOSE: u8 = 0x41;
}

/// One VM instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Zero-width jump target
    Label(Label),
    /// Consume one byte equal to the operand
    Char(u8),
    /// Consume one byte in the set
    Set(Charset),
    /// Consume `n` bytes
    Any(u16),
    /// Consume bytes while they are in the set; never fails
    Span(Charset),
    /// Unconditional jump
    Jump(Label),
    /// Push a backtrack frame resuming at the label
    Choice(Label),
    /// Push a return frame and jump
    Call(Label),
    /// Pop a backtrack frame and jump
    Commit(Label),
    /// Pop a return frame and resume after its call
    Return,
    /// Fail
    Fail,
    /// Update the top backtrack frame's saved position and jump
    PartialCommit(Label),
    /// Pop a backtrack frame, restore its position and jump
    BackCommit(Label),
    /// Pop a backtrack frame and fail
    FailTwice,
    /// Consume the byte and push a frame if it matches, else jump
    TestChar(u8, Label),
    /// Consume the byte if it matches, else jump; no frame
    TestCharNoChoice(u8, Label),
    /// Consume the byte and push a frame if it is in the set, else jump
    TestSet(Charset, Label),
    /// Consume the byte if it is in the set, else jump; no frame
    TestSetNoChoice(Charset, Label),
    /// Consume `n` bytes and push a frame if available, else jump
    TestAny(u16, Label),
    /// Open a capture at the current position
    CaptureBegin(CaptureId),
    /// Open a capture `back` bytes before the current position
    CaptureLate(CaptureId, u8),
    /// Close the innermost open capture
    CaptureEnd,
    /// Record a complete capture of the last `back` bytes
    CaptureFull(CaptureId, u8),
    /// Consult the memo table; on a hit skip to the label
    MemoOpen(Label, MemoId),
    /// Close the innermost memo frame and record its outcome
    MemoClose,
    /// Overall success
    End,
}

impl Instruction {
    /// Mnemonic used by disassembly and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Label(_) => "label",
            Instruction::Char(_) => "char",
            Instruction::Set(_) => "set",
            Instruction::Any(_) => "any",
            Instruction::Span(_) => "span",
            Instruction::Jump(_) => "jump",
            Instruction::Choice(_) => "choice",
            Instruction::Call(_) => "call",
            Instruction::Commit(_) => "commit",
            Instruction::Return => "return",
            Instruction::Fail => "fail",
            Instruction::PartialCommit(_) => "partial_commit",
            Instruction::BackCommit(_) => "back_commit",
            Instruction::FailTwice => "fail_twice",
            Instruction::TestChar(..) => "test_char",
            Instruction::TestCharNoChoice(..) => "test_char_no_choice",
            Instruction::TestSet(..) => "test_set",
            Instruction::TestSetNoChoice(..) => "test_set_no_choice",
            Instruction::TestAny(..) => "test_any",
            Instruction::CaptureBegin(_) => "capture_begin",
            Instruction::CaptureLate(..) => "capture_late",
            Instruction::CaptureEnd => "capture_end",
            Instruction::CaptureFull(..) => "capture_full",
            Instruction::MemoOpen(..) => "memo_open",
            Instruction::MemoClose => "memo_close",
            Instruction::End => "end",
        }
    }

    /// Opcode byte; `None` for label markers
    pub fn opcode(&self) -> Option<u8> {
        let code = match self {
            Instruction::Label(_) => return None,
            Instruction::Char(_) => op::CHAR,
            Instruction::Set(_) => op::SET,
            Instruction::Any(_) => op::ANY,
            Instruction::Span(_) => op::SPAN,
            Instruction::Jump(_) => op::JUMP,
            Instruction::Choice(_) => op::CHOICE,
            Instruction::Call(_) => op::CALL,
            Instruction::Commit(_) => op::COMMIT,
            Instruction::Return => op::RETURN,
            Instruction::Fail => op::FAIL,
            Instruction::PartialCommit(_) => op::PARTIAL_COMMIT,
            Instruction::BackCommit(_) => op::BACK_COMMIT,
            Instruction::FailTwice => op::FAIL_TWICE,
            Instruction::TestChar(..) => op::TEST_CHAR,
            Instruction::TestCharNoChoice(..) => op::TEST_CHAR_NO_CHOICE,
            Instruction::TestSet(..) => op::TEST_SET,
            Instruction::TestSetNoChoice(..) => op::TEST_SET_NO_CHOICE,
            Instruction::TestAny(..) => op::TEST_ANY,
            Instruction::CaptureBegin(_) => op::CAPTURE_BEGIN,
            Instruction::CaptureLate(..) => op::CAPTURE_LATE,
            Instruction::CaptureEnd => op::CAPTURE_END,
            Instruction::CaptureFull(..) => op::CAPTURE_FULL,
            Instruction::MemoOpen(..) => op::MEMO_OPEN,
            Instruction::MemoClose => op::MEMO_CLOSE,
            Instruction::End => op::END,
        };
        Some(code)
    }

    /// Encoded size in bytes (labels are zero-width)
    pub fn encoded_len(&self) -> usize {
        match self {
            Instruction::Label(_) => 0,
            other => other.opcode().map(encoded_len).unwrap_or(0),
        }
    }

    /// Jump target, if this instruction has one
    pub fn target(&self) -> Option<Label> {
        match *self {
            Instruction::Jump(l)
            | Instruction::Choice(l)
            | Instruction::Call(l)
            | Instruction::Commit(l)
            | Instruction::PartialCommit(l)
            | Instruction::BackCommit(l)
            | Instruction::TestChar(_, l)
            | Instruction::TestCharNoChoice(_, l)
            | Instruction::TestSet(_, l)
            | Instruction::TestSetNoChoice(_, l)
            | Instruction::TestAny(_, l)
            | Instruction::MemoOpen(l, _) => Some(l),
            _ => None,
        }
    }

    /// Same instruction with its jump target (if any) passed through `f`
    pub fn map_target(&self, f: impl FnOnce(Label) -> Label) -> Instruction {
        match *self {
            Instruction::Jump(l) => Instruction::Jump(f(l)),
            Instruction::Choice(l) => Instruction::Choice(f(l)),
            Instruction::Call(l) => Instruction::Call(f(l)),
            Instruction::Commit(l) => Instruction::Commit(f(l)),
            Instruction::PartialCommit(l) => Instruction::PartialCommit(f(l)),
            Instruction::BackCommit(l) => Instruction::BackCommit(f(l)),
            Instruction::TestChar(b, l) => Instruction::TestChar(b, f(l)),
            Instruction::TestCharNoChoice(b, l) => Instruction::TestCharNoChoice(b, f(l)),
            Instruction::TestSet(s, l) => Instruction::TestSet(s, f(l)),
            Instruction::TestSetNoChoice(s, l) => Instruction::TestSetNoChoice(s, f(l)),
            Instruction::TestAny(n, l) => Instruction::TestAny(n, f(l)),
            Instruction::MemoOpen(l, id) => Instruction::MemoOpen(f(l), id),
            ref other => other.clone(),
        }
    }

    /// Number of bytes consumed when this is a fixed single-step byte test
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Instruction::Char(_) | Instruction::Set(_) => Some(1),
            Instruction::Any(n) => Some(*n as usize),
            _ => None,
        }
    }

    /// The set of bytes that can start a match, for single-byte tests
    pub fn head_set(&self) -> Option<Charset> {
        match self {
            Instruction::Char(b) => Some(Charset::single(*b)),
            Instruction::Set(s) => Some(*s),
            Instruction::Any(1) => Some(Charset::full()),
            _ => None,
        }
    }
}

/// Encoded size of an instruction given its opcode; 0 for unknown opcodes
pub fn encoded_len(opcode: u8) -> usize {
    match opcode {
        op::END
        | op::RETURN
        | op::FAIL
        | op::FAIL_TWICE
        | op::CAPTURE_END
        | op::MEMO_CLOSE => 1,
        op::CHAR | op::SET | op::SPAN => 2,
        op::ANY | op::CAPTURE_BEGIN | op::CAPTURE_LATE | op::CAPTURE_FULL => 4,
        op::JUMP
        | op::CHOICE
        | op::CALL
        | op::COMMIT
        | op::PARTIAL_COMMIT
        | op::BACK_COMMIT
        | op::TEST_CHAR
        | op::TEST_CHAR_NO_CHOICE
        | op::TEST_SET
        | op::TEST_SET_NO_CHOICE => 6,
        op::TEST_ANY | op::MEMO_OPEN => 8,
        _ => 0,
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(l) => write!(f, "L{}:", l),
            Instruction::Char(b) => write!(f, "char {}", ByteLit(*b)),
            Instruction::Set(s) | Instruction::Span(s) => write!(f, "{} {}", self.name(), s),
            Instruction::Any(n) => write!(f, "any {}", n),
            Instruction::TestChar(b, l) | Instruction::TestCharNoChoice(b, l) => {
                write!(f, "{} {} L{}", self.name(), ByteLit(*b), l)
            }
            Instruction::TestSet(s, l) | Instruction::TestSetNoChoice(s, l) => {
                write!(f, "{} {} L{}", self.name(), s, l)
            }
            Instruction::TestAny(n, l) => write!(f, "test_any {} L{}", n, l),
            Instruction::CaptureBegin(id) => write!(f, "capture_begin #{}", id),
            Instruction::CaptureLate(id, back) | Instruction::CaptureFull(id, back) => {
                write!(f, "{} #{} -{}", self.name(), id, back)
            }
            Instruction::MemoOpen(l, id) => write!(f, "memo_open #{} L{}", id, l),
            other => match other.target() {
                Some(l) => write!(f, "{} L{}", other.name(), l),
                None => write!(f, "{}", other.name()),
            },
        }
    }
}

struct ByteLit(u8);

impl fmt::Display for ByteLit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_graphic() || self.0 == b' ' {
            write!(f, "'{}'", self.0 as char)
        } else {
            write!(f, "0x{:02x}", self.0)
        }
    }
}

/// A compiled, label-addressed instruction list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    /// Instructions in execution order, labels included
    pub instructions: Vec<Instruction>,
    /// One past the highest label id used
    pub label_count: usize,
}

impl Program {
    /// Number of real (non-label) instructions
    pub fn len(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| !matches!(i, Instruction::Label(_)))
            .count()
    }

    /// True when the program has no real instructions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size in bytes of the instruction stream
    pub fn encoded_len(&self) -> usize {
        self.instructions.iter().map(Instruction::encoded_len).sum()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            match inst {
                Instruction::Label(_) => writeln!(f, "{}", inst)?,
                _ => writeln!(f, "    {}", inst)?,
            }
        }
        Ok(())
    }
}
