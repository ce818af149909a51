//! Static checks run before code generation
//!
//! The analyzer rejects patterns that would make the VM loop forever or
//! reference rules that do not exist:
//! - undefined and duplicate rule names
//! - repetitions whose body can match the empty string
//! - left recursion (a rule reachable from itself without consuming input)
//!
//! Nested grammars are closed scopes: a rule body can only reference rules of
//! the innermost grammar that contains it.

use super::error::CompileError;
use super::pattern::{Pattern, Rule};
use hashbrown::HashMap;

/// Name resolution and nullability for one grammar
#[derive(Debug)]
pub struct Scope<'a> {
    rules: &'a [Rule],
    index: HashMap<&'a str, usize>,
    nullable: Vec<bool>,
}

impl<'a> Scope<'a> {
    /// Index the rules and compute which of them can match empty.
    ///
    /// Duplicate names resolve to their first definition.
    pub fn new(rules: &'a [Rule]) -> Self {
        let mut index = HashMap::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            index.entry(rule.name.as_str()).or_insert(i);
        }
        let mut scope = Self {
            rules,
            index,
            nullable: vec![false; rules.len()],
        };
        scope.solve_nullable();
        scope
    }

    /// Rule index for a name
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Whether rule `idx` can succeed without consuming input
    pub fn rule_nullable(&self, idx: usize) -> bool {
        self.nullable.get(idx).copied().unwrap_or(false)
    }

    // Least fixed point: start from "nothing is nullable" and grow.
    fn solve_nullable(&mut self) {
        loop {
            let this: &Scope<'a> = self;
            let next: Vec<bool> = this
                .rules
                .iter()
                .map(|rule| nullable(&rule.body, Some(this)))
                .collect();
            if next == self.nullable {
                break;
            }
            self.nullable = next;
        }
    }

    /// Rules that `p` may call before consuming any input
    fn head_calls(&self, p: &Pattern, out: &mut Vec<usize>) {
        match p {
            Pattern::NonTerminal(name) => {
                if let Some(idx) = self.lookup(name) {
                    out.push(idx);
                }
            }
            Pattern::Sequence(l, r) => {
                self.head_calls(l, out);
                if nullable(l, Some(self)) {
                    self.head_calls(r, out);
                }
            }
            Pattern::Choice(l, r) => {
                self.head_calls(l, out);
                self.head_calls(r, out);
            }
            Pattern::Repeat(p, n) => {
                if *n > 0 {
                    self.head_calls(p, out);
                }
            }
            Pattern::Star(p)
            | Pattern::Plus(p)
            | Pattern::Optional(p)
            | Pattern::Not(p)
            | Pattern::And(p)
            | Pattern::Capture(p, _)
            | Pattern::Memoize(p, _)
            | Pattern::Search(p) => self.head_calls(p, out),
            Pattern::Grammar { .. }
            | Pattern::Empty
            | Pattern::Literal(_)
            | Pattern::Class(_)
            | Pattern::Any(_) => {}
        }
    }

    /// First rule found on a cycle of head calls
    fn find_left_recursion(&self) -> Option<usize> {
        let edges: Vec<Vec<usize>> = self
            .rules
            .iter()
            .map(|rule| {
                let mut out = Vec::new();
                self.head_calls(&rule.body, &mut out);
                out
            })
            .collect();

        // 0 = unvisited, 1 = on the DFS path, 2 = done
        let mut state = vec![0u8; self.rules.len()];
        for root in 0..self.rules.len() {
            if state[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            state[root] = 1;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(&succ) = edges[node].get(top.1) {
                    top.1 += 1;
                    match state[succ] {
                        0 => {
                            state[succ] = 1;
                            stack.push((succ, 0));
                        }
                        1 => return Some(succ),
                        _ => {}
                    }
                } else {
                    state[node] = 2;
                    stack.pop();
                }
            }
        }
        None
    }
}

/// Whether `p` can succeed without consuming input.
///
/// References resolve through `scope`; unknown names count as non-nullable
/// (they are reported separately as undefined).
pub fn nullable(p: &Pattern, scope: Option<&Scope<'_>>) -> bool {
    match p {
        Pattern::Empty => true,
        Pattern::Literal(bytes) => bytes.is_empty(),
        Pattern::Class(_) => false,
        Pattern::Any(n) => *n == 0,
        Pattern::Sequence(l, r) => nullable(l, scope) && nullable(r, scope),
        Pattern::Choice(l, r) => nullable(l, scope) || nullable(r, scope),
        Pattern::Star(_) | Pattern::Optional(_) | Pattern::Not(_) | Pattern::And(_) => true,
        Pattern::Plus(p)
        | Pattern::Capture(p, _)
        | Pattern::Memoize(p, _)
        | Pattern::Search(p) => nullable(p, scope),
        Pattern::Repeat(p, n) => *n == 0 || nullable(p, scope),
        Pattern::NonTerminal(name) => scope
            .and_then(|s| s.lookup(name).map(|idx| s.rule_nullable(idx)))
            .unwrap_or(false),
        Pattern::Grammar { rules, start } => {
            let inner = Scope::new(rules);
            inner
                .lookup(start)
                .map(|idx| inner.rule_nullable(idx))
                .unwrap_or(false)
        }
    }
}

/// Check a whole pattern tree
pub fn check(pattern: &Pattern) -> Result<(), CompileError> {
    check_in(pattern, None)
}

fn check_in(p: &Pattern, scope: Option<&Scope<'_>>) -> Result<(), CompileError> {
    match p {
        Pattern::NonTerminal(name) => {
            if scope.and_then(|s| s.lookup(name)).is_none() {
                return Err(CompileError::UndefinedNonTerminal { name: name.clone() });
            }
            Ok(())
        }
        Pattern::Grammar { rules, start } => check_grammar(rules, start),
        Pattern::Star(inner) | Pattern::Plus(inner) => {
            check_in(inner, scope)?;
            if nullable(inner, scope) {
                return Err(CompileError::EmptyLoopBody);
            }
            Ok(())
        }
        Pattern::Sequence(l, r) | Pattern::Choice(l, r) => {
            check_in(l, scope)?;
            check_in(r, scope)
        }
        Pattern::Optional(inner)
        | Pattern::Not(inner)
        | Pattern::And(inner)
        | Pattern::Capture(inner, _)
        | Pattern::Memoize(inner, _)
        | Pattern::Search(inner)
        | Pattern::Repeat(inner, _) => check_in(inner, scope),
        Pattern::Empty | Pattern::Literal(_) | Pattern::Class(_) | Pattern::Any(_) => Ok(()),
    }
}

fn check_grammar(rules: &[Rule], start: &str) -> Result<(), CompileError> {
    let scope = Scope::new(rules);

    for (i, rule) in rules.iter().enumerate() {
        if scope.lookup(&rule.name) != Some(i) {
            return Err(CompileError::DuplicateRule {
                name: rule.name.clone(),
            });
        }
    }
    if scope.lookup(start).is_none() {
        return Err(CompileError::UndefinedNonTerminal {
            name: start.to_string(),
        });
    }
    for rule in rules {
        check_in(&rule.body, Some(&scope))?;
    }
    if let Some(idx) = scope.find_left_recursion() {
        return Err(CompileError::LeftRecursion {
            name: rules[idx].name.clone(),
        });
    }
    Ok(())
}
