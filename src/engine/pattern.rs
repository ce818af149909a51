//! Pattern combinator tree
//!
//! A [`Pattern`] is the value the compiler consumes. Patterns are built with the
//! constructor functions in this module and the combinator methods on
//! [`Pattern`], or deserialized from JSON.
//!
//! # Example
//!
//! ```rust
//! use repeg::engine::charset::Charset;
//! use repeg::engine::pattern::*;
//!
//! // B := "(" S ")" ; S := (B | [^()])*
//! let grammar = GrammarBuilder::new()
//!     .rule("B", lit("(").then(nt("S")).then(lit(")")))
//!     .rule("S", nt("B").or(class(Charset::from_bytes(b"()").complement())).star())
//!     .build();
//! ```

use super::charset::Charset;
use serde::{Deserialize, Serialize};

/// Capture identifier carried by capture instructions
pub type CaptureId = u16;

/// Memo identifier; together with a position it forms a memo key
pub type MemoId = u16;

/// Named rule inside a [`Pattern::Grammar`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name, referenced by [`Pattern::NonTerminal`]
    pub name: String,
    /// Rule body
    pub body: Pattern,
}

/// PEG combinator tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    /// Always matches, consumes nothing
    Empty,
    /// Exact byte string
    Literal(Vec<u8>),
    /// One byte from a set
    Class(Charset),
    /// Exactly `n` bytes of anything
    Any(usize),
    /// `L` then `R`
    Sequence(Box<Pattern>, Box<Pattern>),
    /// Ordered choice: `L`, or `R` if `L` fails
    Choice(Box<Pattern>, Box<Pattern>),
    /// Zero or more, greedy
    Star(Box<Pattern>),
    /// One or more, greedy
    Plus(Box<Pattern>),
    /// Zero or one
    Optional(Box<Pattern>),
    /// Negative lookahead
    Not(Box<Pattern>),
    /// Positive lookahead
    And(Box<Pattern>),
    /// Record the matched range under `id`
    Capture(Box<Pattern>, CaptureId),
    /// Cache the outcome of matching at each position under `id`
    Memoize(Box<Pattern>, MemoId),
    /// Reference to a rule of the enclosing grammar
    NonTerminal(String),
    /// Set of rules and the rule to start from
    Grammar {
        /// Rule definitions, in declaration order
        rules: Vec<Rule>,
        /// Name of the start rule
        start: String,
    },
    /// First match of the inner pattern at or after the current position
    Search(Box<Pattern>),
    /// Exactly `n` repetitions
    Repeat(Box<Pattern>, usize),
}

impl Pattern {
    /// Sequence: `self` then `other`
    pub fn then(self, other: Pattern) -> Pattern {
        Pattern::Sequence(Box::new(self), Box::new(other))
    }

    /// Ordered choice: `self` or else `other`
    pub fn or(self, other: Pattern) -> Pattern {
        Pattern::Choice(Box::new(self), Box::new(other))
    }

    /// Zero or more
    pub fn star(self) -> Pattern {
        Pattern::Star(Box::new(self))
    }

    /// One or more
    pub fn plus(self) -> Pattern {
        Pattern::Plus(Box::new(self))
    }

    /// Zero or one
    pub fn opt(self) -> Pattern {
        Pattern::Optional(Box::new(self))
    }

    /// Negative lookahead
    pub fn not(self) -> Pattern {
        Pattern::Not(Box::new(self))
    }

    /// Positive lookahead
    pub fn and(self) -> Pattern {
        Pattern::And(Box::new(self))
    }

    /// Capture the matched range
    pub fn capture(self, id: CaptureId) -> Pattern {
        Pattern::Capture(Box::new(self), id)
    }

    /// Memoize the outcome under `id`
    pub fn memo(self, id: MemoId) -> Pattern {
        Pattern::Memoize(Box::new(self), id)
    }

    /// Exactly `n` repetitions
    pub fn repeat(self, n: usize) -> Pattern {
        Pattern::Repeat(Box::new(self), n)
    }

    /// Serialize to JSON
    #[inline]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    #[inline]
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Pattern)) {
        f(self);
        match self {
            Pattern::Sequence(l, r) | Pattern::Choice(l, r) => {
                l.walk(f);
                r.walk(f);
            }
            Pattern::Star(p)
            | Pattern::Plus(p)
            | Pattern::Optional(p)
            | Pattern::Not(p)
            | Pattern::And(p)
            | Pattern::Capture(p, _)
            | Pattern::Memoize(p, _)
            | Pattern::Search(p)
            | Pattern::Repeat(p, _) => p.walk(f),
            Pattern::Grammar { rules, .. } => {
                for rule in rules {
                    rule.body.walk(f);
                }
            }
            Pattern::Empty
            | Pattern::Literal(_)
            | Pattern::Class(_)
            | Pattern::Any(_)
            | Pattern::NonTerminal(_) => {}
        }
    }

    /// True when the pattern refers to a rule it does not itself define
    pub fn has_free_references(&self) -> bool {
        match self {
            Pattern::NonTerminal(_) => true,
            // A nested grammar resolves its own references
            Pattern::Grammar { .. } => false,
            Pattern::Sequence(l, r) | Pattern::Choice(l, r) => {
                l.has_free_references() || r.has_free_references()
            }
            Pattern::Star(p)
            | Pattern::Plus(p)
            | Pattern::Optional(p)
            | Pattern::Not(p)
            | Pattern::And(p)
            | Pattern::Capture(p, _)
            | Pattern::Memoize(p, _)
            | Pattern::Search(p)
            | Pattern::Repeat(p, _) => p.has_free_references(),
            Pattern::Empty | Pattern::Literal(_) | Pattern::Class(_) | Pattern::Any(_) => false,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Match a literal byte string
pub fn lit(bytes: impl AsRef<[u8]>) -> Pattern {
    Pattern::Literal(bytes.as_ref().to_vec())
}

/// Match one byte from `set`
pub fn class(set: Charset) -> Pattern {
    Pattern::Class(set)
}

/// Match one byte in `lo..=hi`
pub fn range(lo: u8, hi: u8) -> Pattern {
    Pattern::Class(Charset::range(lo, hi))
}

/// Match one byte listed in `bytes`
pub fn one_of(bytes: impl AsRef<[u8]>) -> Pattern {
    Pattern::Class(Charset::from_bytes(bytes.as_ref()))
}

/// Match any single byte
pub fn any() -> Pattern {
    Pattern::Any(1)
}

/// Match exactly `n` bytes
pub fn any_n(n: usize) -> Pattern {
    Pattern::Any(n)
}

/// Match nothing, always succeed
pub fn empty() -> Pattern {
    Pattern::Empty
}

/// Reference a rule by name
pub fn nt(name: &str) -> Pattern {
    Pattern::NonTerminal(name.to_string())
}

/// Find the first match of `p` at or after the current position
pub fn search(p: Pattern) -> Pattern {
    Pattern::Search(Box::new(p))
}

/// Sequence of several patterns (empty list matches empty)
pub fn seq(parts: impl IntoIterator<Item = Pattern>) -> Pattern {
    let mut parts: Vec<Pattern> = parts.into_iter().collect();
    let Some(mut acc) = parts.pop() else {
        return Pattern::Empty;
    };
    while let Some(prev) = parts.pop() {
        acc = Pattern::Sequence(Box::new(prev), Box::new(acc));
    }
    acc
}

/// Ordered choice over several patterns (empty list never matches)
pub fn choice(alternatives: impl IntoIterator<Item = Pattern>) -> Pattern {
    let mut alternatives: Vec<Pattern> = alternatives.into_iter().collect();
    let Some(mut acc) = alternatives.pop() else {
        return Pattern::Class(Charset::empty());
    };
    while let Some(prev) = alternatives.pop() {
        acc = Pattern::Choice(Box::new(prev), Box::new(acc));
    }
    acc
}

// ============================================================================
// Grammar builder
// ============================================================================

/// Builder for [`Pattern::Grammar`]
///
/// The first rule added is the start rule unless [`GrammarBuilder::start`]
/// names another one.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    rules: Vec<Rule>,
    start: Option<String>,
}

impl GrammarBuilder {
    /// Create a new grammar builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    pub fn rule(mut self, name: &str, body: Pattern) -> Self {
        self.rules.push(Rule {
            name: name.to_string(),
            body,
        });
        self
    }

    /// Add a rule through a mutable reference
    pub fn rule_mut(&mut self, name: &str, body: Pattern) -> &mut Self {
        self.rules.push(Rule {
            name: name.to_string(),
            body,
        });
        self
    }

    /// Choose the start rule
    pub fn start(mut self, name: &str) -> Self {
        self.start = Some(name.to_string());
        self
    }

    /// Number of rules added so far
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Build the grammar pattern
    pub fn build(self) -> Pattern {
        let start = self
            .start
            .or_else(|| self.rules.first().map(|r| r.name.clone()))
            .unwrap_or_default();
        Pattern::Grammar {
            rules: self.rules,
            start,
        }
    }
}
