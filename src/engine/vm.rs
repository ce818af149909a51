//! Bytecode interpreter
//!
//! The VM runs a [`VmCode`] against an [`Input`] with a backtracking stack of
//! frames:
//!
//! - `Backtrack { ip, pos, mark }` pushed by `choice` and the `test_*` forms
//! - `Return { ip }` pushed by `call`
//! - `Capture { id, start, mark }` pushed by `capture_begin`/`capture_late`
//! - `Memo { id, start, mark, outer }` pushed by a missed `memo_open`
//!
//! Completed captures live in one list; every frame remembers the list length
//! when it was pushed, so backtracking truncates it back.
//!
//! The VM also tracks the furthest byte it has looked at. Probing end of input
//! at `pos` counts as looking at `pos`. Inside a memoized region that
//! high-water mark is reset to the region's start, so when the region closes
//! (or fails) the table learns exactly which bytes its outcome depends on.

use super::capture::{self, Capture};
use super::charset::Charset;
use super::encoder::VmCode;
use super::error::VmError;
use super::input::Input;
use super::instruction::{self, op};
use super::memo::{Entry, Key, MemoTable};
use super::pattern::{CaptureId, MemoId};
use serde::{Deserialize, Serialize};

/// Default limit on the number of frames on the stack
pub const DEFAULT_MAX_STACK_DEPTH: usize = 100_000;

/// VM options
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Largest stack depth before the run aborts with
    /// [`VmError::StackOverflow`]
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
        }
    }
}

impl VmConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stack depth limit
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth.max(1);
        self
    }
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Whether the program reached `End`
    pub matched: bool,
    /// Bytes consumed (0 on failure)
    pub length: usize,
    /// One past the furthest offset looked at
    pub examined: usize,
    /// Top-level captures, absolute offsets
    pub captures: Vec<Capture>,
}

impl MatchResult {
    /// All captures with `id`, depth-first in document order
    pub fn find_all(&self, id: CaptureId) -> Vec<&Capture> {
        capture::find_all(&self.captures, id)
    }
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// `memo_open` found an entry
    pub memo_hits: u64,
    /// `memo_open` found nothing
    pub memo_misses: u64,
    /// Entries written to the table
    pub memo_inserts: u64,
    /// Deepest stack seen
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Backtrack {
        ip: usize,
        pos: usize,
        mark: usize,
    },
    Return {
        ip: usize,
    },
    Capture {
        id: CaptureId,
        start: usize,
        mark: usize,
    },
    Memo {
        id: MemoId,
        start: usize,
        mark: usize,
        outer: usize,
    },
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Backtrack { .. } => "backtrack",
            Frame::Return { .. } => "return",
            Frame::Capture { .. } => "capture",
            Frame::Memo { .. } => "memo",
        }
    }
}

/// Interpreter for one encoded program
///
/// The stack and capture buffers are kept between runs.
///
/// ```rust
/// use repeg::engine::compiler::Compiler;
/// use repeg::engine::encoder::encode;
/// use repeg::engine::memo::NoopTable;
/// use repeg::engine::pattern::*;
/// use repeg::engine::vm::{Vm, VmConfig};
///
/// let program = Compiler::new().compile(&lit("ab").then(lit("c"))).unwrap();
/// let code = encode(&program).unwrap();
/// let mut vm = Vm::new(&code, VmConfig::default());
/// let result = vm.run("abcd", &NoopTable).unwrap();
/// assert!(result.matched);
/// assert_eq!(result.length, 3);
/// ```
#[derive(Debug)]
pub struct Vm<'c> {
    code: &'c VmCode,
    config: VmConfig,
    stack: Vec<Frame>,
    captures: Vec<Capture>,
    stats: VmStats,
}

fn corrupt(offset: usize, reason: impl Into<String>) -> VmError {
    VmError::CorruptCode {
        offset,
        reason: reason.into(),
    }
}

#[inline]
fn u16_at(code: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([code[at], code[at + 1]])
}

#[inline]
fn u32_at(code: &[u8], at: usize) -> usize {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]]) as usize
}

/// Byte at `pos`, recording that it was looked at
#[inline]
fn peek<I: Input + ?Sized>(input: &I, pos: usize, hwm: &mut usize) -> Option<u8> {
    *hwm = (*hwm).max(pos + 1);
    input.read(pos).first().copied()
}

/// Offset after `n` more bytes, or `None` if input ends first
fn advance<I: Input + ?Sized>(input: &I, pos: usize, n: usize, hwm: &mut usize) -> Option<usize> {
    let end = pos + n;
    let mut at = pos;
    while at < end {
        let chunk = input.read(at);
        if chunk.is_empty() {
            *hwm = (*hwm).max(at + 1);
            return None;
        }
        at += chunk.len().min(end - at);
    }
    *hwm = (*hwm).max(end);
    Some(end)
}

/// Offset of the first byte at or after `pos` outside `set`
fn span<I: Input + ?Sized>(input: &I, pos: usize, set: &Charset, hwm: &mut usize) -> usize {
    let stop = set.complement().single_byte();
    let mut at = pos;
    loop {
        let chunk = input.read(at);
        if chunk.is_empty() {
            break;
        }
        let run = match stop {
            Some(b) => memchr::memchr(b, chunk),
            None => chunk.iter().position(|&b| !set.has(b)),
        };
        match run {
            Some(n) => {
                at += n;
                break;
            }
            None => at += chunk.len(),
        }
    }
    *hwm = (*hwm).max(at + 1);
    at
}

impl<'c> Vm<'c> {
    /// Create a VM for `code`
    pub fn new(code: &'c VmCode, config: VmConfig) -> Self {
        Self {
            code,
            config,
            stack: Vec::new(),
            captures: Vec::new(),
            stats: VmStats::default(),
        }
    }

    /// Counters of the last run
    pub fn stats(&self) -> VmStats {
        self.stats
    }

    fn push(&mut self, frame: Frame) -> Result<(), VmError> {
        if self.stack.len() >= self.config.max_stack_depth {
            return Err(VmError::StackOverflow {
                depth: self.stack.len() + 1,
                max_depth: self.config.max_stack_depth,
            });
        }
        self.stack.push(frame);
        self.stats.max_depth = self.stats.max_depth.max(self.stack.len());
        Ok(())
    }

    fn pop_backtrack(
        &mut self,
        instruction: &'static str,
        offset: usize,
    ) -> Result<(usize, usize, usize), VmError> {
        match self.stack.pop() {
            Some(Frame::Backtrack { ip, pos, mark }) => Ok((ip, pos, mark)),
            Some(other) => Err(VmError::FrameMismatch {
                instruction,
                offset,
                found: other.kind(),
            }),
            None => Err(VmError::StackUnderflow {
                instruction,
                offset,
            }),
        }
    }

    fn charset(&self, index: u8, offset: usize) -> Result<&'c Charset, VmError> {
        let code: &'c VmCode = self.code;
        code.charset(index)
            .ok_or_else(|| corrupt(offset, format!("charset index {} out of range", index)))
    }

    /// Unwind to the nearest backtrack frame. Memo frames passed on the way
    /// record a failure. `None` means the whole run failed.
    fn fail(&mut self, table: &dyn MemoTable, min_examined: usize, hwm: &mut usize) -> Option<(usize, usize)> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Backtrack { ip, pos, mark } => {
                    self.captures.truncate(mark);
                    return Some((ip, pos));
                }
                Frame::Return { .. } | Frame::Capture { .. } => {}
                Frame::Memo {
                    id, start, outer, ..
                } => {
                    let examined = hwm.saturating_sub(start).max(1);
                    if examined >= min_examined {
                        table.put(Key::new(id, start), Entry::failure(examined));
                        self.stats.memo_inserts += 1;
                    }
                    *hwm = (*hwm).max(outer);
                }
            }
        }
        self.captures.clear();
        None
    }

    /// Match the program against `input` from offset 0.
    ///
    /// Not matching is a normal outcome; errors mean the bytecode is broken.
    pub fn run<I: Input + ?Sized>(
        &mut self,
        input: &I,
        table: &dyn MemoTable,
    ) -> Result<MatchResult, VmError> {
        let program: &'c VmCode = self.code;
        let code = program.code.as_slice();
        let min_examined = table.min_examined().max(1);

        self.stack.clear();
        self.captures.clear();
        self.stats = VmStats::default();

        let mut ip = 0usize;
        let mut pos = 0usize;
        let mut hwm = 0usize;

        loop {
            let opcode = *code
                .get(ip)
                .ok_or_else(|| corrupt(ip, "instruction pointer past end of code"))?;
            let len = instruction::encoded_len(opcode);
            if len == 0 {
                return Err(corrupt(ip, format!("unknown opcode 0x{:02x}", opcode)));
            }
            if ip + len > code.len() {
                return Err(corrupt(ip, "truncated instruction"));
            }
            let next = ip + len;
            let mut failed = false;

            match opcode {
                op::END => break,

                op::CHAR => match peek(input, pos, &mut hwm) {
                    Some(b) if b == code[ip + 1] => {
                        pos += 1;
                        ip = next;
                    }
                    _ => failed = true,
                },

                op::SET => {
                    let set = self.charset(code[ip + 1], ip)?;
                    match peek(input, pos, &mut hwm) {
                        Some(b) if set.has(b) => {
                            pos += 1;
                            ip = next;
                        }
                        _ => failed = true,
                    }
                }

                op::ANY => match advance(input, pos, u16_at(code, ip + 2) as usize, &mut hwm) {
                    Some(end) => {
                        pos = end;
                        ip = next;
                    }
                    None => failed = true,
                },

                op::SPAN => {
                    let set = self.charset(code[ip + 1], ip)?;
                    pos = span(input, pos, set, &mut hwm);
                    ip = next;
                }

                op::JUMP => ip = u32_at(code, ip + 2),

                op::CHOICE => {
                    let mark = self.captures.len();
                    self.push(Frame::Backtrack {
                        ip: u32_at(code, ip + 2),
                        pos,
                        mark,
                    })?;
                    ip = next;
                }

                op::CALL => {
                    self.push(Frame::Return { ip: next })?;
                    ip = u32_at(code, ip + 2);
                }

                op::COMMIT => {
                    self.pop_backtrack("commit", ip)?;
                    ip = u32_at(code, ip + 2);
                }

                op::RETURN => match self.stack.pop() {
                    Some(Frame::Return { ip: back }) => ip = back,
                    Some(other) => {
                        return Err(VmError::FrameMismatch {
                            instruction: "return",
                            offset: ip,
                            found: other.kind(),
                        })
                    }
                    None => {
                        return Err(VmError::StackUnderflow {
                            instruction: "return",
                            offset: ip,
                        })
                    }
                },

                op::FAIL => failed = true,

                op::PARTIAL_COMMIT => {
                    let mark_now = self.captures.len();
                    match self.stack.last_mut() {
                        Some(Frame::Backtrack { pos: saved, mark, .. }) => {
                            *saved = pos;
                            *mark = mark_now;
                        }
                        Some(other) => {
                            return Err(VmError::FrameMismatch {
                                instruction: "partial_commit",
                                offset: ip,
                                found: other.kind(),
                            })
                        }
                        None => {
                            return Err(VmError::StackUnderflow {
                                instruction: "partial_commit",
                                offset: ip,
                            })
                        }
                    }
                    ip = u32_at(code, ip + 2);
                }

                op::BACK_COMMIT => {
                    // Lookahead keeps the captures its body made
                    let (_, saved, _) = self.pop_backtrack("back_commit", ip)?;
                    pos = saved;
                    ip = u32_at(code, ip + 2);
                }

                op::FAIL_TWICE => {
                    self.pop_backtrack("fail_twice", ip)?;
                    failed = true;
                }

                op::TEST_CHAR | op::TEST_CHAR_NO_CHOICE => {
                    let target = u32_at(code, ip + 2);
                    if peek(input, pos, &mut hwm) == Some(code[ip + 1]) {
                        if opcode == op::TEST_CHAR {
                            let mark = self.captures.len();
                            self.push(Frame::Backtrack {
                                ip: target,
                                pos,
                                mark,
                            })?;
                        }
                        pos += 1;
                        ip = next;
                    } else {
                        ip = target;
                    }
                }

                op::TEST_SET | op::TEST_SET_NO_CHOICE => {
                    let set = self.charset(code[ip + 1], ip)?;
                    let target = u32_at(code, ip + 2);
                    if peek(input, pos, &mut hwm).is_some_and(|b| set.has(b)) {
                        if opcode == op::TEST_SET {
                            let mark = self.captures.len();
                            self.push(Frame::Backtrack {
                                ip: target,
                                pos,
                                mark,
                            })?;
                        }
                        pos += 1;
                        ip = next;
                    } else {
                        ip = target;
                    }
                }

                op::TEST_ANY => {
                    let target = u32_at(code, ip + 4);
                    match advance(input, pos, u16_at(code, ip + 2) as usize, &mut hwm) {
                        Some(end) => {
                            let mark = self.captures.len();
                            self.push(Frame::Backtrack {
                                ip: target,
                                pos,
                                mark,
                            })?;
                            pos = end;
                            ip = next;
                        }
                        None => ip = target,
                    }
                }

                op::CAPTURE_BEGIN => {
                    let mark = self.captures.len();
                    self.push(Frame::Capture {
                        id: u16_at(code, ip + 2),
                        start: pos,
                        mark,
                    })?;
                    ip = next;
                }

                op::CAPTURE_LATE => {
                    let back = code[ip + 1] as usize;
                    let mark = self.captures.len();
                    self.push(Frame::Capture {
                        id: u16_at(code, ip + 2),
                        start: pos.saturating_sub(back),
                        mark,
                    })?;
                    ip = next;
                }

                op::CAPTURE_FULL => {
                    let back = (code[ip + 1] as usize).min(pos);
                    self.captures
                        .push(Capture::leaf(u16_at(code, ip + 2), pos - back, back));
                    ip = next;
                }

                op::CAPTURE_END => match self.stack.pop() {
                    Some(Frame::Capture { id, start, mark }) => {
                        let children = self.captures.split_off(mark);
                        self.captures.push(Capture {
                            id,
                            start,
                            len: pos - start,
                            children,
                        });
                        ip = next;
                    }
                    Some(other) => {
                        return Err(VmError::FrameMismatch {
                            instruction: "capture_end",
                            offset: ip,
                            found: other.kind(),
                        })
                    }
                    None => {
                        return Err(VmError::StackUnderflow {
                            instruction: "capture_end",
                            offset: ip,
                        })
                    }
                },

                op::MEMO_OPEN => {
                    let id = u16_at(code, ip + 2);
                    let skip = u32_at(code, ip + 4);
                    match table.get(Key::new(id, pos)) {
                        Some(entry) => {
                            self.stats.memo_hits += 1;
                            hwm = hwm.max(entry.examined_end(pos));
                            match entry.length {
                                Some(length) => {
                                    self.captures
                                        .extend(entry.captures.iter().map(|c| c.absolute_from(pos)));
                                    pos += length;
                                    ip = skip;
                                }
                                None => failed = true,
                            }
                        }
                        None => {
                            self.stats.memo_misses += 1;
                            let mark = self.captures.len();
                            self.push(Frame::Memo {
                                id,
                                start: pos,
                                mark,
                                outer: hwm,
                            })?;
                            hwm = pos;
                            ip = next;
                        }
                    }
                }

                op::MEMO_CLOSE => match self.stack.pop() {
                    Some(Frame::Memo {
                        id,
                        start,
                        mark,
                        outer,
                    }) => {
                        let examined = hwm.saturating_sub(start).max(1);
                        if examined >= min_examined {
                            let captures = self.captures[mark..]
                                .iter()
                                .map(|c| c.relative_to(start))
                                .collect();
                            table.put(
                                Key::new(id, start),
                                Entry::success(pos - start, examined, captures),
                            );
                            self.stats.memo_inserts += 1;
                        }
                        hwm = hwm.max(outer);
                        ip = next;
                    }
                    Some(other) => {
                        return Err(VmError::FrameMismatch {
                            instruction: "memo_close",
                            offset: ip,
                            found: other.kind(),
                        })
                    }
                    None => {
                        return Err(VmError::StackUnderflow {
                            instruction: "memo_close",
                            offset: ip,
                        })
                    }
                },

                _ => return Err(corrupt(ip, format!("unknown opcode 0x{:02x}", opcode))),
            }

            if failed {
                match self.fail(table, min_examined, &mut hwm) {
                    Some((resume, restored)) => {
                        ip = resume;
                        pos = restored;
                    }
                    None => {
                        log_trace!("run failed, examined {} bytes", hwm);
                        return Ok(MatchResult {
                            matched: false,
                            length: 0,
                            examined: hwm,
                            captures: Vec::new(),
                        });
                    }
                }
            }
        }

        log_trace!(
            "run matched {} bytes, examined {}, memo {}/{} hits",
            pos,
            hwm,
            self.stats.memo_hits,
            self.stats.memo_hits + self.stats.memo_misses
        );
        Ok(MatchResult {
            matched: true,
            length: pos,
            examined: hwm,
            captures: std::mem::take(&mut self.captures),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compiler::{Compiler, CompilerConfig};
    use crate::engine::encoder::encode;
    use crate::engine::input::ChunkedInput;
    use crate::engine::instruction::{Instruction, Program};
    use crate::engine::memo::{IntervalTable, MemoConfig, NoopTable};
    use crate::engine::pattern::*;

    fn code(p: &Pattern) -> VmCode {
        encode(&Compiler::new().compile(p).unwrap()).unwrap()
    }

    fn run(p: &Pattern, input: &str) -> MatchResult {
        Vm::new(&code(p), VmConfig::default())
            .run(input, &NoopTable)
            .unwrap()
    }

    fn raw(instructions: Vec<Instruction>) -> VmCode {
        let label_count = instructions.len();
        encode(&Program {
            instructions,
            label_count,
        })
        .unwrap()
    }

    #[test]
    fn test_literal_sequence() {
        let r = run(&lit("ab").then(lit("c")), "abcd");
        assert!(r.matched);
        assert_eq!(r.length, 3);
        assert!(!run(&lit("abc"), "abd").matched);
    }

    #[test]
    fn test_star_matches_empty() {
        let r = run(&lit("x").star(), "");
        assert!(r.matched);
        assert_eq!(r.length, 0);
        assert_eq!(r.examined, 1);
    }

    #[test]
    fn test_ordered_choice() {
        let p = lit("a").or(lit("ab"));
        assert_eq!(run(&p, "ab").length, 1);
        let p = lit("ab").or(lit("a"));
        assert_eq!(run(&p, "ab").length, 2);
        assert_eq!(run(&p, "ac").length, 1);
    }

    #[test]
    fn test_lookahead() {
        let p = lit("a").not().then(any());
        assert!(run(&p, "b").matched);
        assert!(!run(&p, "a").matched);
        let p = lit("ab").and().then(lit("a"));
        let r = run(&p, "ab");
        assert!(r.matched);
        assert_eq!(r.length, 1);
    }

    #[test]
    fn test_search() {
        let r = run(&search(lit("needle").capture(1)), "haystack with needle inside");
        assert!(r.matched);
        assert_eq!(r.length, 20);
        assert_eq!(r.captures[0].start, 14);
        assert!(!run(&search(lit("zz")), "abc").matched);
    }

    #[test]
    fn test_nested_captures() {
        let digits = range(b'0', b'9').plus();
        let p = digits.clone().capture(2).then(lit("-")).then(digits.capture(2)).capture(1);
        let r = run(&p, "12-345");
        assert_eq!(r.captures.len(), 1);
        let outer = &r.captures[0];
        assert_eq!((outer.start, outer.len), (0, 6));
        let inner: Vec<(usize, usize)> = outer.children.iter().map(|c| (c.start, c.len)).collect();
        assert_eq!(inner, vec![(0, 2), (3, 3)]);
    }

    #[test]
    fn test_backtracking_discards_captures() {
        let p = lit("a").capture(1).then(lit("x")).or(lit("a").then(lit("b")).capture(2));
        let r = run(&p, "ab");
        assert!(r.matched);
        assert_eq!(r.captures.len(), 1);
        assert_eq!(r.captures[0].id, 2);
    }

    fn brackets() -> Pattern {
        // B := "(" S ")" ; S := (B | [^()])*
        GrammarBuilder::new()
            .rule("B", lit("(").then(nt("S")).then(lit(")")))
            .rule(
                "S",
                nt("B")
                    .or(class(Charset::from_bytes(b"()").complement()))
                    .star(),
            )
            .build()
    }

    #[test]
    fn test_bracket_grammar() {
        let c = code(&brackets());
        let mut vm = Vm::new(&c, VmConfig::default());
        let r = vm.run("((inside))", &NoopTable).unwrap();
        assert!(r.matched);
        assert_eq!(r.length, 10);
        assert!(!vm.run("((inside)", &NoopTable).unwrap().matched);
    }

    #[test]
    fn test_short_reads_match_contiguous() {
        let p = lit("hello").then(lit(" ").plus()).then(range(b'a', b'z').star().capture(1));
        let c = code(&p);
        let contiguous = Vm::new(&c, VmConfig::default()).run("hello   world!", &NoopTable).unwrap();
        let chunked = ChunkedInput::new("hello   world!", 3);
        let pieces = Vm::new(&c, VmConfig::default()).run(&chunked, &NoopTable).unwrap();
        assert_eq!(contiguous, pieces);
        assert_eq!(pieces.captures[0].text(&chunked).as_ref(), b"world");
    }

    #[test]
    fn test_memo_hit_reuses_outcome() {
        let p = lit("abcd").memo(1).then(lit("!")).or(lit("abcd").memo(1).then(lit("?")));
        let c = code(&p);
        let table = IntervalTable::with_config(MemoConfig::new().with_min_examined(1));
        let mut vm = Vm::new(&c, VmConfig::default());
        let r = vm.run("abcd?", &table).unwrap();
        assert!(r.matched);
        let stats = vm.stats();
        assert_eq!(stats.memo_misses, 1);
        assert_eq!(stats.memo_hits, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_memo_failure_is_recorded() {
        let p = lit("abc").memo(3).or(lit("abx"));
        let c = code(&p);
        let table = IntervalTable::with_config(MemoConfig::new().with_min_examined(1));
        let r = Vm::new(&c, VmConfig::default()).run("abx", &table).unwrap();
        assert!(r.matched);
        let entry = table.get(Key::new(3, 0)).unwrap();
        assert_eq!(entry.length, None);
        assert_eq!(entry.examined, 3);
    }

    #[test]
    fn test_memo_threshold_skips_small_entries() {
        let p = lit("ab").memo(1);
        let c = code(&p);
        let table = IntervalTable::with_config(MemoConfig::new().with_min_examined(4));
        Vm::new(&c, VmConfig::default()).run("ab", &table).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_memo_captures_are_rebased() {
        let item = range(b'a', b'z').plus().capture(7).memo(2);
        let p = lit(" ").star().then(item);
        let c = code(&p);
        let table = IntervalTable::with_config(MemoConfig::new().with_min_examined(1));
        let first = Vm::new(&c, VmConfig::default()).run("  word", &table).unwrap();
        assert_eq!(first.captures[0].start, 2);
        let entry = table.get(Key::new(2, 2)).unwrap();
        assert_eq!(entry.captures[0].start, 0);
        let again = Vm::new(&c, VmConfig::default()).run("  word", &table).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_examined_counts_eof_probe() {
        let r = run(&range(b'a', b'z').star(), "abc");
        assert_eq!(r.length, 3);
        assert_eq!(r.examined, 4);
    }

    #[test]
    fn test_frame_mismatch_is_fatal() {
        let c = raw(vec![Instruction::Call(0), Instruction::Label(0), Instruction::Commit(1), Instruction::Label(1), Instruction::End]);
        let err = Vm::new(&c, VmConfig::default()).run("", &NoopTable).unwrap_err();
        assert!(matches!(err, VmError::FrameMismatch { instruction: "commit", found: "return", .. }));

        let c = raw(vec![Instruction::Return, Instruction::End]);
        let err = Vm::new(&c, VmConfig::default()).run("", &NoopTable).unwrap_err();
        assert_eq!(err, VmError::StackUnderflow { instruction: "return", offset: 0 });

        let c = raw(vec![Instruction::MemoClose, Instruction::End]);
        assert!(Vm::new(&c, VmConfig::default()).run("", &NoopTable).is_err());
    }

    #[test]
    fn test_corrupt_code_is_fatal() {
        let c = VmCode {
            charsets: Vec::new(),
            code: vec![op::SET, 4, op::END],
        };
        let err = Vm::new(&c, VmConfig::default()).run("a", &NoopTable).unwrap_err();
        assert!(matches!(err, VmError::CorruptCode { offset: 0, .. }));

        let c = VmCode {
            charsets: Vec::new(),
            code: vec![op::JUMP, 0, 99, 0, 0, 0],
        };
        assert!(matches!(
            Vm::new(&c, VmConfig::default()).run("a", &NoopTable),
            Err(VmError::CorruptCode { offset: 99, .. })
        ));
    }

    #[test]
    fn test_stack_limit() {
        // S := "(" S ")" | "x" without inlining or tail calls
        let g = GrammarBuilder::new()
            .rule("S", lit("(").then(nt("S")).then(lit(")")).or(lit("x")))
            .build();
        let program = Compiler::with_config(CompilerConfig::new().with_optimize(false))
            .compile(&g)
            .unwrap();
        let c = encode(&program).unwrap();
        let deep = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        let config = VmConfig::new().with_max_stack_depth(50);
        let err = Vm::new(&c, config).run(deep.as_str(), &NoopTable).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow { max_depth: 50, .. }));
        assert!(Vm::new(&c, VmConfig::default()).run(deep.as_str(), &NoopTable).unwrap().matched);
    }

    #[test]
    fn test_determinism() {
        let c = code(&brackets());
        let a = Vm::new(&c, VmConfig::default()).run("(a(b)c)d", &NoopTable).unwrap();
        let b = Vm::new(&c, VmConfig::default()).run("(a(b)c)d", &NoopTable).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.length, 7);
    }
}
