//! Capture trees
//!
//! A capture records the range matched by a `Capture` pattern, with the
//! captures made inside it as children. Captures in a [`MatchResult`] use
//! absolute offsets; captures stored in a memo entry are relative to the
//! entry's start so that they move with it when the document is edited.
//!
//! [`MatchResult`]: crate::engine::vm::MatchResult

use super::input::Input;
use super::pattern::CaptureId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One captured range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Capture id from the pattern
    pub id: CaptureId,
    /// Start offset
    pub start: usize,
    /// Length in bytes
    pub len: usize,
    /// Captures made while matching this one
    pub children: Vec<Capture>,
}

impl Capture {
    /// A capture without children
    pub fn leaf(id: CaptureId, start: usize, len: usize) -> Self {
        Self {
            id,
            start,
            len,
            children: Vec::new(),
        }
    }

    /// End offset (exclusive)
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// The captured bytes
    pub fn text<'i, I: Input + ?Sized>(&self, input: &'i I) -> Cow<'i, [u8]> {
        input.slice(self.start..self.end())
    }

    /// The captured bytes as UTF-8, replacing invalid sequences
    pub fn text_lossy<I: Input + ?Sized>(&self, input: &I) -> String {
        String::from_utf8_lossy(&self.text(input)).into_owned()
    }

    /// Copy with every offset in the tree made relative to `base`
    pub fn relative_to(&self, base: usize) -> Capture {
        Capture {
            id: self.id,
            start: self.start.saturating_sub(base),
            len: self.len,
            children: self.children.iter().map(|c| c.relative_to(base)).collect(),
        }
    }

    /// Copy with every offset in the tree moved forward by `base`
    pub fn absolute_from(&self, base: usize) -> Capture {
        Capture {
            id: self.id,
            start: self.start + base,
            len: self.len,
            children: self.children.iter().map(|c| c.absolute_from(base)).collect(),
        }
    }

    /// Depth-first walk over this capture and its descendants
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Capture)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// All captures with `id` in a forest, depth-first in document order
pub fn find_all(captures: &[Capture], id: CaptureId) -> Vec<&Capture> {
    let mut out = Vec::new();
    for capture in captures {
        capture.walk(&mut |c| {
            if c.id == id {
                out.push(c);
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Capture {
        Capture {
            id: 1,
            start: 10,
            len: 6,
            children: vec![Capture::leaf(2, 11, 2), Capture::leaf(2, 14, 1)],
        }
    }

    #[test]
    fn test_relative_and_absolute() {
        let rel = tree().relative_to(10);
        assert_eq!(rel.start, 0);
        assert_eq!(rel.children[1].start, 4);
        assert_eq!(rel.absolute_from(25).children[0].start, 26);
    }

    #[test]
    fn test_text() {
        let input = "0123456789abcdefgh";
        let t = tree();
        assert_eq!(t.text(input).as_ref(), b"abcdef");
        assert_eq!(t.children[0].text_lossy(input), "bc");
        assert_eq!(t.end(), 16);
    }

    #[test]
    fn test_find_all() {
        let forest = vec![tree(), Capture::leaf(2, 30, 1)];
        let found: Vec<usize> = find_all(&forest, 2).iter().map(|c| c.start).collect();
        assert_eq!(found, vec![11, 14, 30]);
    }
}
