//! Pattern to instruction compiler
//!
//! Each pattern variant compiles to a fixed control-flow shape:
//!
//! ```text
//! Choice(L, R)    choice L1; <L>; commit L2; L1: <R>; L2:
//! Star(P)         choice L2; L1: <P>; partial_commit L1; L2:
//! Not(P)          choice L1; <P>; fail_twice; L1:
//! And(P)          choice L1; <P>; back_commit L2; L1: fail; L2:
//! Memoize(P, id)  memo_open #id L1; <P>; memo_close; L1:
//! Grammar         call Ls; jump La; <rule: body; return>...; La:
//! ```
//!
//! With optimization enabled the compiler also:
//! - merges choices between single-byte tests into one `set`
//! - fuses a choice point with the test that heads its first alternative
//!   (`test_*`), dropping the choice point entirely when both heads are
//!   provably disjoint (`test_*_no_choice`)
//! - collapses repetition of a byte class into `span`
//! - turns captures of fixed-width bodies into `capture_full`/`capture_late`
//! - inlines small rules that reference no other rules, to a fixed point
//! - rewrites `call X; return` into `jump X`

use super::analysis;
use super::charset::Charset;
use super::error::CompileError;
use super::instruction::{Instruction, Label, Program};
use super::pattern::{CaptureId, MemoId, Pattern, Rule};
use hashbrown::{HashMap, HashSet};

/// Default maximum size (in instructions) of a rule eligible for inlining
pub const DEFAULT_INLINE_THRESHOLD: usize = 10;

/// Default first memo id handed out by automatic rule memoization
pub const DEFAULT_RULE_MEMO_BASE: MemoId = 0x8000;

/// Compiler options
///
/// # Example
///
/// ```rust
/// use repeg::engine::compiler::CompilerConfig;
///
/// let config = CompilerConfig::new()
///     .with_inline_threshold(0)
///     .with_memoize_rules(true);
/// assert!(config.memoize_rules);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CompilerConfig {
    /// Apply peephole and structural optimizations
    pub optimize: bool,

    /// Largest rule (in instructions) that is inlined at its call sites;
    /// 0 disables inlining
    pub inline_threshold: usize,

    /// Wrap every grammar rule body in a Memoize node
    pub memoize_rules: bool,

    /// Memo id of the first automatically memoized rule; later rules count up
    pub rule_memo_base: MemoId,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            memoize_rules: false,
            rule_memo_base: DEFAULT_RULE_MEMO_BASE,
        }
    }
}

impl CompilerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable optimizations
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Set the inlining size threshold
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Enable or disable automatic rule memoization
    pub fn with_memoize_rules(mut self, memoize: bool) -> Self {
        self.memoize_rules = memoize;
        self
    }

    /// Set the memo id of the first automatically memoized rule
    pub fn with_rule_memo_base(mut self, base: MemoId) -> Self {
        self.rule_memo_base = base;
        self
    }
}

/// Compiles [`Pattern`]s into [`Program`]s
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    /// Create a compiler with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compiler with explicit options
    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// The options in use
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile a pattern into a program ending with `End`.
    ///
    /// Fails without producing any code if the pattern references an
    /// undefined rule or cannot terminate.
    pub fn compile(&self, pattern: &Pattern) -> Result<Program, CompileError> {
        analysis::check(pattern)?;

        let mut ctx = Context::new(&self.config);
        let mut instructions = ctx.compile(pattern)?;
        instructions.push(Instruction::End);
        if self.config.optimize {
            rewrite_tail_calls(&mut instructions);
        }

        let program = Program {
            instructions,
            label_count: ctx.next_label,
        };
        log_debug!(
            "compiled {} instructions, {} rules, {} inlined",
            program.len(),
            ctx.rules_compiled,
            ctx.rules_inlined
        );
        Ok(program)
    }
}

/// Per-grammar compile state
struct GrammarScope {
    /// Subroutine label per rule name
    labels: HashMap<String, Label>,
    /// Resolved bodies of rules compiled in place at every reference
    inline: HashMap<String, Pattern>,
}

/// State owned by a single compilation
struct Context<'c> {
    config: &'c CompilerConfig,
    next_label: Label,
    next_rule_memo: MemoId,
    scopes: Vec<GrammarScope>,
    rules_compiled: usize,
    rules_inlined: usize,
}

type Code = Vec<Instruction>;

impl<'c> Context<'c> {
    fn new(config: &'c CompilerConfig) -> Self {
        Self {
            config,
            next_label: 0,
            next_rule_memo: config.rule_memo_base,
            scopes: Vec::new(),
            rules_compiled: 0,
            rules_inlined: 0,
        }
    }

    fn label(&mut self) -> Label {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    fn compile(&mut self, p: &Pattern) -> Result<Code, CompileError> {
        match p {
            Pattern::Empty => Ok(Vec::new()),
            Pattern::Literal(bytes) => Ok(bytes.iter().map(|&b| Instruction::Char(b)).collect()),
            Pattern::Class(set) => Ok(vec![class_instruction(set)]),
            Pattern::Any(n) => Ok(any_instructions(*n)),
            Pattern::Sequence(l, r) => {
                let mut code = self.compile(l)?;
                code.extend(self.compile(r)?);
                Ok(code)
            }
            Pattern::Choice(l, r) => {
                let lc = self.compile(l)?;
                let rc = self.compile(r)?;
                Ok(self.choice(lc, rc))
            }
            Pattern::Star(p) => {
                let body = self.compile(p)?;
                Ok(self.star(body))
            }
            Pattern::Plus(p) => {
                let mut code = self.compile(p)?;
                let body = self.compile(p)?;
                code.extend(self.star(body));
                Ok(code)
            }
            Pattern::Optional(p) => {
                let body = self.compile(p)?;
                Ok(self.optional(body))
            }
            Pattern::Not(p) => {
                let l1 = self.label();
                let mut code = vec![Instruction::Choice(l1)];
                code.extend(self.compile(p)?);
                code.push(Instruction::FailTwice);
                code.push(Instruction::Label(l1));
                Ok(code)
            }
            Pattern::And(p) => {
                let l1 = self.label();
                let l2 = self.label();
                let mut code = vec![Instruction::Choice(l1)];
                code.extend(self.compile(p)?);
                code.extend([
                    Instruction::BackCommit(l2),
                    Instruction::Label(l1),
                    Instruction::Fail,
                    Instruction::Label(l2),
                ]);
                Ok(code)
            }
            Pattern::Capture(p, id) => {
                let body = self.compile(p)?;
                Ok(self.capture(body, *id))
            }
            Pattern::Memoize(p, id) => {
                let body = self.compile(p)?;
                Ok(self.memoize(body, *id))
            }
            Pattern::NonTerminal(name) => self.reference(name),
            Pattern::Grammar { rules, start } => self.grammar(rules, start),
            Pattern::Search(p) => {
                let body = self.compile(p)?;
                Ok(self.search(body))
            }
            Pattern::Repeat(p, n) => {
                let mut code = Vec::new();
                for _ in 0..*n {
                    code.extend(self.compile(p)?);
                }
                Ok(code)
            }
        }
    }

    fn choice(&mut self, lc: Code, rc: Code) -> Code {
        if self.config.optimize {
            // Two single-byte tests: one set test covers both
            if let ([a], [b]) = (lc.as_slice(), rc.as_slice()) {
                if let (Some(sa), Some(sb)) = (a.head_set(), b.head_set()) {
                    return vec![class_instruction(&sa.add(&sb))];
                }
            }

            if let Some(head) = lc.first().cloned().filter(|i| i.fixed_width().is_some()) {
                let l1 = self.label();
                let l2 = self.label();
                let disjoint = match (head.head_set(), rc.first().and_then(mandatory_head)) {
                    (Some(hl), Some(hr)) => hl.is_disjoint(&hr),
                    _ => false,
                };

                let mut code = Vec::with_capacity(lc.len() + rc.len() + 3);
                if disjoint {
                    // R cannot start where L's head matched: no choice point needed
                    code.push(test_no_choice(&head, l1));
                    code.extend(lc.into_iter().skip(1));
                    code.push(Instruction::Jump(l2));
                } else {
                    code.push(test_with_choice(&head, l1));
                    code.extend(lc.into_iter().skip(1));
                    code.push(Instruction::Commit(l2));
                }
                code.push(Instruction::Label(l1));
                code.extend(rc);
                code.push(Instruction::Label(l2));
                return code;
            }
        }

        let l1 = self.label();
        let l2 = self.label();
        let mut code = Vec::with_capacity(lc.len() + rc.len() + 4);
        code.push(Instruction::Choice(l1));
        code.extend(lc);
        code.push(Instruction::Commit(l2));
        code.push(Instruction::Label(l1));
        code.extend(rc);
        code.push(Instruction::Label(l2));
        code
    }

    fn star(&mut self, body: Code) -> Code {
        if self.config.optimize {
            if let [single] = body.as_slice() {
                if let Some(set) = single.head_set() {
                    return vec![Instruction::Span(set)];
                }
            }
        }
        let l1 = self.label();
        let l2 = self.label();
        let mut code = vec![Instruction::Choice(l2), Instruction::Label(l1)];
        code.extend(body);
        code.push(Instruction::PartialCommit(l1));
        code.push(Instruction::Label(l2));
        code
    }

    fn optional(&mut self, body: Code) -> Code {
        if self.config.optimize {
            if let [single] = body.as_slice() {
                let l1 = self.label();
                match single {
                    Instruction::Char(b) => {
                        return vec![Instruction::TestCharNoChoice(*b, l1), Instruction::Label(l1)]
                    }
                    Instruction::Set(s) => {
                        return vec![Instruction::TestSetNoChoice(*s, l1), Instruction::Label(l1)]
                    }
                    _ => {}
                }
            }
        }
        self.choice(body, Vec::new())
    }

    fn capture(&mut self, body: Code, id: CaptureId) -> Code {
        if self.config.optimize {
            let mut width = 0usize;
            let mut prefix = 0usize;
            for inst in &body {
                match inst.fixed_width() {
                    Some(w) if width + w <= u8::MAX as usize => {
                        width += w;
                        prefix += 1;
                    }
                    _ => break,
                }
            }
            if prefix == body.len() {
                let mut code = body;
                code.push(Instruction::CaptureFull(id, width as u8));
                return code;
            }
            if prefix > 0 {
                let mut code = body;
                code.insert(prefix, Instruction::CaptureLate(id, width as u8));
                code.push(Instruction::CaptureEnd);
                return code;
            }
        }
        let mut code = Vec::with_capacity(body.len() + 2);
        code.push(Instruction::CaptureBegin(id));
        code.extend(body);
        code.push(Instruction::CaptureEnd);
        code
    }

    fn memoize(&mut self, body: Code, id: MemoId) -> Code {
        let l1 = self.label();
        let mut code = Vec::with_capacity(body.len() + 3);
        code.push(Instruction::MemoOpen(l1, id));
        code.extend(body);
        code.push(Instruction::MemoClose);
        code.push(Instruction::Label(l1));
        code
    }

    // S := P | (. S), compiled as a loop
    fn search(&mut self, body: Code) -> Code {
        let l0 = self.label();
        let mut code = vec![Instruction::Label(l0)];
        if self.config.optimize {
            if let Some(head) = body.first().and_then(mandatory_head) {
                code.push(Instruction::Span(head.complement()));
            }
        }
        let skip = vec![Instruction::Any(1), Instruction::Jump(l0)];
        code.extend(self.choice(body, skip));
        code
    }

    fn reference(&mut self, name: &str) -> Result<Code, CompileError> {
        let scope = self
            .scopes
            .last()
            .ok_or_else(|| CompileError::UndefinedNonTerminal {
                name: name.to_string(),
            })?;
        if let Some(body) = scope.inline.get(name).cloned() {
            return self.compile(&body);
        }
        scope
            .labels
            .get(name)
            .map(|&l| vec![Instruction::Call(l)])
            .ok_or_else(|| CompileError::UndefinedNonTerminal {
                name: name.to_string(),
            })
    }

    fn grammar(&mut self, rules: &[Rule], start: &str) -> Result<Code, CompileError> {
        let rules: Vec<Rule> = if self.config.memoize_rules {
            rules
                .iter()
                .map(|rule| {
                    let id = self.next_rule_memo;
                    self.next_rule_memo = self.next_rule_memo.wrapping_add(1);
                    Rule {
                        name: rule.name.clone(),
                        body: rule.body.clone().memo(id),
                    }
                })
                .collect()
        } else {
            rules.to_vec()
        };

        let mut labels = HashMap::with_capacity(rules.len());
        for rule in &rules {
            let l = self.label();
            labels.insert(rule.name.clone(), l);
        }
        let inline = if self.config.optimize && self.config.inline_threshold > 0 {
            self.resolve_inlines(&rules)?
        } else {
            HashMap::new()
        };

        let start_label = *labels
            .get(start)
            .ok_or_else(|| CompileError::UndefinedNonTerminal {
                name: start.to_string(),
            })?;
        let after = self.label();
        let mut code = vec![Instruction::Call(start_label), Instruction::Jump(after)];

        self.scopes.push(GrammarScope { labels, inline });
        let result = self.grammar_rules(&rules, start, &mut code);
        let scope = self.scopes.pop();
        result?;

        self.rules_inlined += scope.map(|s| s.inline.len()).unwrap_or(0);
        code.push(Instruction::Label(after));
        Ok(code)
    }

    fn grammar_rules(
        &mut self,
        rules: &[Rule],
        start: &str,
        code: &mut Code,
    ) -> Result<(), CompileError> {
        for rule in rules {
            let Some(scope) = self.scopes.last() else {
                break;
            };
            // Every reference to an inlined rule was expanded in place
            if rule.name != start && scope.inline.contains_key(&rule.name) {
                continue;
            }
            let label = scope.labels.get(&rule.name).copied().ok_or_else(|| {
                CompileError::UndefinedNonTerminal {
                    name: rule.name.clone(),
                }
            })?;
            code.push(Instruction::Label(label));
            code.extend(self.compile(&rule.body)?);
            code.push(Instruction::Return);
            self.rules_compiled += 1;
        }
        Ok(())
    }

    /// Substitute small reference-free rules into their users until nothing
    /// changes. Returns the resolved body of every inlinable rule.
    fn resolve_inlines(&mut self, rules: &[Rule]) -> Result<HashMap<String, Pattern>, CompileError> {
        let mut resolved: HashMap<String, Pattern> = rules
            .iter()
            .map(|r| (r.name.clone(), r.body.clone()))
            .collect();
        let mut inlinable: HashSet<String> = HashSet::new();

        loop {
            let mut changed = false;
            for rule in rules {
                if inlinable.contains(&rule.name) {
                    continue;
                }
                let Some(body) = resolved.get(&rule.name) else {
                    continue;
                };
                if !body.has_free_references() && self.measure(body)? <= self.config.inline_threshold
                {
                    inlinable.insert(rule.name.clone());
                    changed = true;
                }
            }
            for rule in rules {
                if inlinable.contains(&rule.name) {
                    continue;
                }
                let Some(body) = resolved.get(&rule.name) else {
                    continue;
                };
                if let Some(next) = substitute(body, &resolved, &inlinable) {
                    resolved.insert(rule.name.clone(), next);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Ok(resolved
            .into_iter()
            .filter(|(name, _)| inlinable.contains(name))
            .collect())
    }

    /// Instruction count of a reference-free pattern
    fn measure(&self, p: &Pattern) -> Result<usize, CompileError> {
        let mut scratch = Context::new(self.config);
        let code = scratch.compile(p)?;
        Ok(code
            .iter()
            .filter(|i| !matches!(i, Instruction::Label(_)))
            .count())
    }
}

/// Replace references to inlinable rules; `None` when nothing was replaced
fn substitute(
    p: &Pattern,
    resolved: &HashMap<String, Pattern>,
    inlinable: &HashSet<String>,
) -> Option<Pattern> {
    let boxed = |inner: &Pattern| substitute(inner, resolved, inlinable).map(Box::new);
    match p {
        Pattern::NonTerminal(name) if inlinable.contains(name) => resolved.get(name).cloned(),
        Pattern::Sequence(l, r) | Pattern::Choice(l, r) => {
            let nl = boxed(l);
            let nr = boxed(r);
            if nl.is_none() && nr.is_none() {
                return None;
            }
            let nl = nl.unwrap_or_else(|| l.clone());
            let nr = nr.unwrap_or_else(|| r.clone());
            Some(match p {
                Pattern::Sequence(..) => Pattern::Sequence(nl, nr),
                _ => Pattern::Choice(nl, nr),
            })
        }
        Pattern::Star(inner) => boxed(inner).map(Pattern::Star),
        Pattern::Plus(inner) => boxed(inner).map(Pattern::Plus),
        Pattern::Optional(inner) => boxed(inner).map(Pattern::Optional),
        Pattern::Not(inner) => boxed(inner).map(Pattern::Not),
        Pattern::And(inner) => boxed(inner).map(Pattern::And),
        Pattern::Search(inner) => boxed(inner).map(Pattern::Search),
        Pattern::Capture(inner, id) => boxed(inner).map(|b| Pattern::Capture(b, *id)),
        Pattern::Memoize(inner, id) => boxed(inner).map(|b| Pattern::Memoize(b, *id)),
        Pattern::Repeat(inner, n) => boxed(inner).map(|b| Pattern::Repeat(b, *n)),
        // Nested grammars resolve their own names
        Pattern::Grammar { .. }
        | Pattern::NonTerminal(_)
        | Pattern::Empty
        | Pattern::Literal(_)
        | Pattern::Class(_)
        | Pattern::Any(_) => None,
    }
}

/// `call X` directly followed by `return` becomes `jump X`
fn rewrite_tail_calls(code: &mut [Instruction]) {
    for i in 0..code.len() {
        let Instruction::Call(target) = code[i] else {
            continue;
        };
        let next = code[i + 1..]
            .iter()
            .find(|inst| !matches!(inst, Instruction::Label(_)));
        if matches!(next, Some(Instruction::Return)) {
            code[i] = Instruction::Jump(target);
        }
    }
}

fn class_instruction(set: &Charset) -> Instruction {
    if set.is_full() {
        Instruction::Any(1)
    } else if set.is_empty() {
        Instruction::Fail
    } else if let Some(b) = set.single_byte() {
        Instruction::Char(b)
    } else {
        Instruction::Set(*set)
    }
}

fn any_instructions(n: usize) -> Code {
    let mut code = Vec::new();
    let mut left = n;
    while left > 0 {
        let step = left.min(u16::MAX as usize);
        code.push(Instruction::Any(step as u16));
        left -= step;
    }
    code
}

/// Byte set an instruction requires before anything else can happen.
/// Any(1) is excluded so it never counts as disjoint from anything.
fn mandatory_head(inst: &Instruction) -> Option<Charset> {
    match inst {
        Instruction::Char(b) => Some(Charset::single(*b)),
        Instruction::Set(s) => Some(*s),
        _ => None,
    }
}

fn test_with_choice(head: &Instruction, target: Label) -> Instruction {
    match *head {
        Instruction::Char(b) => Instruction::TestChar(b, target),
        Instruction::Set(s) => Instruction::TestSet(s, target),
        Instruction::Any(n) => Instruction::TestAny(n, target),
        _ => Instruction::Choice(target),
    }
}

fn test_no_choice(head: &Instruction, target: Label) -> Instruction {
    match *head {
        Instruction::Char(b) => Instruction::TestCharNoChoice(b, target),
        Instruction::Set(s) => Instruction::TestSetNoChoice(s, target),
        _ => test_with_choice(head, target),
    }
}
