//! Bytecode encoding and decoding
//!
//! ```text
//! +-----------+----------------------+---------------------------+
//! | u16 count | count x 32-byte sets | instruction stream ... End |
//! +-----------+----------------------+---------------------------+
//! ```
//!
//! Label operands are `u32` byte offsets into the instruction stream (not
//! counting the header). Charset operands index the table.

use super::charset::{Charset, CHARSET_BYTES};
use super::error::{DecodeError, EncodeError};
use super::instruction::{self, op, Instruction, Label, Program};
use ahash::AHasher;
use hashbrown::HashMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

/// Largest charset table a one-byte index can address
pub const MAX_CHARSETS: usize = 256;

/// Encoded program: charset table plus instruction stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VmCode {
    /// Deduplicated charsets, in order of first use
    pub charsets: Vec<Charset>,
    /// Instruction stream
    pub code: Vec<u8>,
}

impl VmCode {
    /// Encode a program; see [`encode`]
    pub fn encode(program: &Program) -> Result<VmCode, EncodeError> {
        encode(program)
    }

    /// Decode the stream back into a label-addressed program; see [`decode`]
    pub fn decode(&self) -> Result<Program, DecodeError> {
        decode(self)
    }

    /// Serialize to the binary format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.charsets.len() * CHARSET_BYTES + self.code.len());
        out.extend_from_slice(&(self.charsets.len() as u16).to_le_bytes());
        for set in &self.charsets {
            out.extend_from_slice(&set.to_bytes());
        }
        out.extend_from_slice(&self.code);
        out
    }

    /// Parse the binary format and validate the instruction stream
    pub fn from_bytes(bytes: &[u8]) -> Result<VmCode, DecodeError> {
        let header: [u8; 2] = bytes
            .get(0..2)
            .and_then(|b| b.try_into().ok())
            .ok_or(DecodeError::Truncated { offset: 0 })?;
        let count = u16::from_le_bytes(header) as usize;

        let mut charsets = Vec::with_capacity(count);
        let mut at = 2;
        for _ in 0..count {
            let table: &[u8; CHARSET_BYTES] = bytes
                .get(at..at + CHARSET_BYTES)
                .and_then(|b| b.try_into().ok())
                .ok_or(DecodeError::Truncated { offset: at })?;
            charsets.push(Charset::from_table_bytes(table));
            at += CHARSET_BYTES;
        }

        let code = VmCode {
            charsets,
            code: bytes[at..].to_vec(),
        };
        code.validate()?;
        Ok(code)
    }

    /// Check every opcode, operand and jump target in the stream
    pub fn validate(&self) -> Result<(), DecodeError> {
        self.decode().map(|_| ())
    }

    /// Human-readable listing with byte offsets
    pub fn disassemble(&self) -> Result<String, DecodeError> {
        let mut out = String::new();
        let mut offset = 0;
        for inst in decode(self)?.instructions {
            if let Instruction::Label(_) = inst {
                let _ = writeln!(out, "{}", inst);
                continue;
            }
            let _ = writeln!(out, "{:6}  {}", offset, inst);
            offset += inst.encoded_len();
        }
        Ok(out)
    }

    /// 64-bit fingerprint of the encoded program.
    ///
    /// Equal programs fingerprint equally within one build; the value may
    /// change between `ahash` versions or platforms, so do not persist it.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Total size of the binary format
    pub fn len(&self) -> usize {
        2 + self.charsets.len() * CHARSET_BYTES + self.code.len()
    }

    /// True when there is no instruction stream
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Charset by table index
    #[inline]
    pub fn charset(&self, index: u8) -> Option<&Charset> {
        self.charsets.get(index as usize)
    }
}

/// Encode a program in two passes: label offsets, then emission.
pub fn encode(program: &Program) -> Result<VmCode, EncodeError> {
    // Charset table in order of first use
    let mut charsets: Vec<Charset> = Vec::new();
    let mut index: HashMap<Charset, u8> = HashMap::new();
    for inst in &program.instructions {
        if let Some(set) = charset_operand(inst) {
            if !index.contains_key(set) {
                if charsets.len() == MAX_CHARSETS {
                    let distinct = program
                        .instructions
                        .iter()
                        .filter_map(charset_operand)
                        .collect::<hashbrown::HashSet<_>>()
                        .len();
                    return Err(EncodeError::TooManyCharsets { count: distinct });
                }
                index.insert(*set, charsets.len() as u8);
                charsets.push(*set);
            }
        }
    }

    // Pass 1: label offsets
    let label_slots = program
        .instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::Label(l) => Some(*l + 1),
            other => other.target().map(|l| l + 1),
        })
        .max()
        .unwrap_or(0)
        .max(program.label_count);
    let mut offsets: Vec<Option<u32>> = vec![None; label_slots];
    let mut offset = 0usize;
    for inst in &program.instructions {
        if let Instruction::Label(l) = inst {
            let at = u32::try_from(offset).map_err(|_| EncodeError::OffsetOverflow { offset })?;
            offsets[*l] = Some(at);
        }
        offset += inst.encoded_len();
    }
    if u32::try_from(offset).is_err() {
        return Err(EncodeError::OffsetOverflow { offset });
    }

    // Pass 2: emission
    let resolve = |label: Label| -> Result<u32, EncodeError> {
        offsets
            .get(label)
            .copied()
            .flatten()
            .ok_or(EncodeError::UnboundLabel { label })
    };
    let set_index = |set: &Charset| index.get(set).copied().unwrap_or(0);

    let mut code = Vec::with_capacity(offset);
    for inst in &program.instructions {
        let Some(opcode) = inst.opcode() else {
            continue;
        };
        code.push(opcode);
        match *inst {
            Instruction::Char(b) => code.push(b),
            Instruction::Set(ref s) | Instruction::Span(ref s) => code.push(set_index(s)),
            Instruction::Any(n) => {
                code.push(0);
                code.extend_from_slice(&n.to_le_bytes());
            }
            Instruction::CaptureBegin(id) => {
                code.push(0);
                code.extend_from_slice(&id.to_le_bytes());
            }
            Instruction::CaptureLate(id, back) | Instruction::CaptureFull(id, back) => {
                code.push(back);
                code.extend_from_slice(&id.to_le_bytes());
            }
            Instruction::Jump(l)
            | Instruction::Choice(l)
            | Instruction::Call(l)
            | Instruction::Commit(l)
            | Instruction::PartialCommit(l)
            | Instruction::BackCommit(l) => {
                code.push(0);
                code.extend_from_slice(&resolve(l)?.to_le_bytes());
            }
            Instruction::TestChar(b, l) | Instruction::TestCharNoChoice(b, l) => {
                code.push(b);
                code.extend_from_slice(&resolve(l)?.to_le_bytes());
            }
            Instruction::TestSet(ref s, l) | Instruction::TestSetNoChoice(ref s, l) => {
                code.push(set_index(s));
                code.extend_from_slice(&resolve(l)?.to_le_bytes());
            }
            Instruction::TestAny(n, l) => {
                code.push(0);
                code.extend_from_slice(&n.to_le_bytes());
                code.extend_from_slice(&resolve(l)?.to_le_bytes());
            }
            Instruction::MemoOpen(l, id) => {
                code.push(0);
                code.extend_from_slice(&id.to_le_bytes());
                code.extend_from_slice(&resolve(l)?.to_le_bytes());
            }
            Instruction::Return
            | Instruction::Fail
            | Instruction::FailTwice
            | Instruction::CaptureEnd
            | Instruction::MemoClose
            | Instruction::End
            | Instruction::Label(_) => {}
        }
    }

    log_debug!(
        "encoded {} bytes of code, {} charsets",
        code.len(),
        charsets.len()
    );
    Ok(VmCode { charsets, code })
}

fn charset_operand(inst: &Instruction) -> Option<&Charset> {
    match inst {
        Instruction::Set(s)
        | Instruction::Span(s)
        | Instruction::TestSet(s, _)
        | Instruction::TestSetNoChoice(s, _) => Some(s),
        _ => None,
    }
}

/// An instruction decoded at a byte offset, with its target as an offset
pub(crate) fn decode_at(code: &VmCode, offset: usize) -> Result<(Instruction, usize), DecodeError> {
    let bytes = &code.code;
    let opcode = *bytes.get(offset).ok_or(DecodeError::Truncated { offset })?;
    let len = instruction::encoded_len(opcode);
    if len == 0 {
        return Err(DecodeError::UnknownOpcode { offset, opcode });
    }
    let raw = bytes
        .get(offset..offset + len)
        .ok_or(DecodeError::Truncated { offset })?;

    let u16_at = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]) as usize;
    let set_at = |i: usize| {
        code.charset(raw[i])
            .copied()
            .ok_or(DecodeError::BadCharsetIndex {
                offset,
                index: raw[i],
            })
    };

    let inst = match opcode {
        op::END => Instruction::End,
        op::CHAR => Instruction::Char(raw[1]),
        op::SET => Instruction::Set(set_at(1)?),
        op::ANY => Instruction::Any(u16_at(2)),
        op::SPAN => Instruction::Span(set_at(1)?),
        op::JUMP => Instruction::Jump(u32_at(2)),
        op::CHOICE => Instruction::Choice(u32_at(2)),
        op::CALL => Instruction::Call(u32_at(2)),
        op::COMMIT => Instruction::Commit(u32_at(2)),
        op::RETURN => Instruction::Return,
        op::FAIL => Instruction::Fail,
        op::PARTIAL_COMMIT => Instruction::PartialCommit(u32_at(2)),
        op::BACK_COMMIT => Instruction::BackCommit(u32_at(2)),
        op::FAIL_TWICE => Instruction::FailTwice,
        op::TEST_CHAR => Instruction::TestChar(raw[1], u32_at(2)),
        op::TEST_CHAR_NO_CHOICE => Instruction::TestCharNoChoice(raw[1], u32_at(2)),
        op::TEST_SET => Instruction::TestSet(set_at(1)?, u32_at(2)),
        op::TEST_SET_NO_CHOICE => Instruction::TestSetNoChoice(set_at(1)?, u32_at(2)),
        op::TEST_ANY => Instruction::TestAny(u16_at(2), u32_at(4)),
        op::CAPTURE_BEGIN => Instruction::CaptureBegin(u16_at(2)),
        op::CAPTURE_LATE => Instruction::CaptureLate(u16_at(2), raw[1]),
        op::CAPTURE_END => Instruction::CaptureEnd,
        op::CAPTURE_FULL => Instruction::CaptureFull(u16_at(2), raw[1]),
        op::MEMO_OPEN => Instruction::MemoOpen(u32_at(4), u16_at(2)),
        op::MEMO_CLOSE => Instruction::MemoClose,
        _ => return Err(DecodeError::UnknownOpcode { offset, opcode }),
    };
    Ok((inst, len))
}

/// Walk the stream: every instruction with its offset, targets as offsets.
fn scan(code: &VmCode) -> Result<Vec<(usize, Instruction)>, DecodeError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.code.len() {
        let (inst, len) = decode_at(code, offset)?;
        out.push((offset, inst));
        offset += len;
    }
    match out.last() {
        Some((_, Instruction::End)) => Ok(out),
        _ => Err(DecodeError::MissingEnd),
    }
}

/// Decode into a program whose labels are numbered in offset order.
///
/// Every jump target must be an instruction boundary (or the end of the
/// stream).
pub fn decode(code: &VmCode) -> Result<Program, DecodeError> {
    let listing = scan(code)?;
    let end = code.code.len();

    let mut boundaries: hashbrown::HashSet<usize> = listing.iter().map(|(o, _)| *o).collect();
    boundaries.insert(end);

    let mut targets: Vec<usize> = Vec::new();
    for (offset, inst) in &listing {
        if let Some(t) = inst.target() {
            if !boundaries.contains(&t) {
                return Err(DecodeError::BadLabel {
                    offset: *offset,
                    target: t as u32,
                });
            }
            targets.push(t);
        }
    }
    targets.sort_unstable();
    targets.dedup();
    let label_of: HashMap<usize, Label> = targets.iter().enumerate().map(|(l, &t)| (t, l)).collect();

    let mut instructions = Vec::with_capacity(listing.len() + targets.len());
    for (offset, inst) in listing {
        if let Some(&l) = label_of.get(&offset) {
            instructions.push(Instruction::Label(l));
        }
        instructions.push(inst.map_target(|t| label_of.get(&t).copied().unwrap_or(0)));
    }
    if let Some(&l) = label_of.get(&end) {
        instructions.push(Instruction::Label(l));
    }

    Ok(Program {
        instructions,
        label_count: targets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compiler::Compiler;
    use crate::engine::pattern::*;

    fn program(p: &Pattern) -> Program {
        Compiler::new().compile(p).unwrap()
    }

    #[test]
    fn test_layout_of_simple_program() {
        let code = encode(&program(&lit("ab"))).unwrap();
        assert!(code.charsets.is_empty());
        assert_eq!(code.code, vec![op::CHAR, b'a', op::CHAR, b'b', op::END]);
        assert_eq!(code.to_bytes(), vec![0, 0, op::CHAR, b'a', op::CHAR, b'b', op::END]);
    }

    #[test]
    fn test_labels_are_u32_offsets() {
        let p = Program {
            instructions: vec![
                Instruction::Choice(0),
                Instruction::Char(b'x'),
                Instruction::Commit(1),
                Instruction::Label(0),
                Instruction::Char(b'y'),
                Instruction::Label(1),
                Instruction::End,
            ],
            label_count: 2,
        };
        let code = encode(&p).unwrap();
        // choice(6) char(2) commit(6) | char(2) | end
        assert_eq!(&code.code[0..6], &[op::CHOICE, 0, 14, 0, 0, 0]);
        assert_eq!(&code.code[8..14], &[op::COMMIT, 0, 16, 0, 0, 0]);
    }

    #[test]
    fn test_charsets_are_deduplicated() {
        let digits = range(b'0', b'9');
        let code = encode(&program(&digits.clone().then(lit("-")).then(digits))).unwrap();
        assert_eq!(code.charsets.len(), 1);
        assert_eq!(code.code[1], 0);
        assert_eq!(code.code[5], 0);
    }

    #[test]
    fn test_unbound_label() {
        let p = Program {
            instructions: vec![Instruction::Jump(3), Instruction::End],
            label_count: 0,
        };
        assert_eq!(encode(&p), Err(EncodeError::UnboundLabel { label: 3 }));
    }

    #[test]
    fn test_too_many_charsets() {
        let mut instructions: Vec<Instruction> = (0..=255u8)
            .map(|b| Instruction::Set(Charset::single(b).with(b.wrapping_add(1))))
            .collect();
        instructions.push(Instruction::Set(Charset::range(b'a', b'c')));
        instructions.push(Instruction::End);
        let p = Program {
            instructions,
            label_count: 0,
        };
        assert_eq!(encode(&p), Err(EncodeError::TooManyCharsets { count: 257 }));
    }

    #[test]
    fn test_decode_then_encode_is_identical() {
        let g = GrammarBuilder::new()
            .rule("S", nt("B").or(any().then(nt("S"))))
            .rule("B", lit("(").then(nt("S")).then(lit(")")))
            .build();
        let code = encode(&program(&g.capture(1).memo(3))).unwrap();
        let decoded = code.decode().unwrap();
        assert_eq!(encode(&decoded).unwrap(), code);
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let code = encode(&program(&range(b'a', b'z').plus().then(one_of(b",;")))).unwrap();
        let bytes = code.to_bytes();
        assert_eq!(VmCode::from_bytes(&bytes).unwrap(), code);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            VmCode::from_bytes(&[1, 0, 0]),
            Err(DecodeError::Truncated { offset: 2 })
        );
        assert_eq!(
            VmCode::from_bytes(&[0, 0, 0xee]),
            Err(DecodeError::UnknownOpcode { offset: 0, opcode: 0xee })
        );
        assert_eq!(
            VmCode::from_bytes(&[0, 0, op::SET, 0, op::END]),
            Err(DecodeError::BadCharsetIndex { offset: 0, index: 0 })
        );
        assert_eq!(
            VmCode::from_bytes(&[0, 0, op::JUMP, 0, 3, 0, 0, 0, op::END]),
            Err(DecodeError::BadLabel { offset: 0, target: 3 })
        );
        assert_eq!(
            VmCode::from_bytes(&[0, 0, op::CHAR, b'a']),
            Err(DecodeError::MissingEnd)
        );
    }

    #[test]
    fn test_disassemble_lists_offsets() {
        let code = encode(&program(&lit("ab").star())).unwrap();
        let text = code.disassemble().unwrap();
        assert!(text.contains("choice L1"));
        assert!(text.contains("partial_commit L0"));
        assert!(text.lines().any(|l| l.trim_start().starts_with("6  char 'a'")));
    }

    #[test]
    fn test_fingerprint_matches_equal_programs() {
        let a = encode(&program(&lit("abc"))).unwrap();
        let b = encode(&program(&lit("abc"))).unwrap();
        let c = encode(&program(&lit("abd"))).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
