//! Byte set bitmap for O(1) membership testing
//!
//! A [`Charset`] is a 256-bit bitmap with one bit per byte value. Every
//! operation is pure and total: sets are values, combinators return new sets.
//!
//! # Example
//!
//! ```rust
//! use repeg::engine::charset::Charset;
//!
//! let digits = Charset::range(b'0', b'9');
//! let hex = digits.add(&Charset::range(b'a', b'f'));
//!
//! assert!(hex.has(b'c'));
//! assert!(!hex.complement().has(b'7'));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of an encoded charset in bytes
pub const CHARSET_BYTES: usize = 32;

/// Immutable bitmap over all 256 byte values
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Charset {
    bits: [u64; 4],
}

impl Charset {
    /// The empty set
    #[inline]
    pub const fn empty() -> Self {
        Self { bits: [0; 4] }
    }

    /// The set of every byte value
    #[inline]
    pub const fn full() -> Self {
        Self { bits: [u64::MAX; 4] }
    }

    /// A set containing a single byte
    #[inline]
    pub fn single(b: u8) -> Self {
        Self::empty().with(b)
    }

    /// An inclusive byte range `lo..=hi` (empty when `lo > hi`)
    pub fn range(lo: u8, hi: u8) -> Self {
        let mut set = Self::empty();
        for b in lo..=hi {
            set.insert(b);
        }
        set
    }

    /// A set containing every byte of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut set = Self::empty();
        for &b in bytes {
            set.insert(b);
        }
        set
    }

    /// Membership test
    #[inline]
    pub fn has(&self, b: u8) -> bool {
        self.bits[(b >> 6) as usize] & (1u64 << (b & 63)) != 0
    }

    /// Union
    #[inline]
    pub fn add(&self, other: &Charset) -> Charset {
        let mut bits = self.bits;
        for (dst, src) in bits.iter_mut().zip(other.bits.iter()) {
            *dst |= src;
        }
        Charset { bits }
    }

    /// Difference (`self` without the members of `other`)
    #[inline]
    pub fn sub(&self, other: &Charset) -> Charset {
        let mut bits = self.bits;
        for (dst, src) in bits.iter_mut().zip(other.bits.iter()) {
            *dst &= !src;
        }
        Charset { bits }
    }

    /// Complement over the full byte range
    #[inline]
    pub fn complement(&self) -> Charset {
        let mut bits = self.bits;
        for word in bits.iter_mut() {
            *word = !*word;
        }
        Charset { bits }
    }

    /// Returns a copy with `b` added
    #[inline]
    pub fn with(mut self, b: u8) -> Self {
        self.insert(b);
        self
    }

    #[inline]
    fn insert(&mut self, b: u8) {
        self.bits[(b >> 6) as usize] |= 1u64 << (b & 63);
    }

    /// True when no two members are shared
    #[inline]
    pub fn is_disjoint(&self, other: &Charset) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .all(|(a, b)| a & b == 0)
    }

    /// Number of members
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True for the empty set
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// True when every byte is a member
    #[inline]
    pub fn is_full(&self) -> bool {
        self.bits.iter().all(|&w| w == u64::MAX)
    }

    /// The only member, if the set has exactly one
    pub fn single_byte(&self) -> Option<u8> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }

    /// Iterate members in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=255u8).filter(move |&b| self.has(b))
    }

    /// Fixed-width little-endian encoding used by the bytecode charset table
    pub fn to_bytes(&self) -> [u8; CHARSET_BYTES] {
        let mut out = [0u8; CHARSET_BYTES];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.bits.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Inverse of [`Charset::to_bytes`]
    pub fn from_table_bytes(raw: &[u8; CHARSET_BYTES]) -> Self {
        let mut bits = [0u64; 4];
        for (word, chunk) in bits.iter_mut().zip(raw.chunks_exact(8)) {
            let mut le = [0u8; 8];
            le.copy_from_slice(chunk);
            *word = u64::from_le_bytes(le);
        }
        Self { bits }
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Charset({})", self)
    }
}

/// Renders as a bracketed class with ranges collapsed, e.g. `[0-9a-f]`
impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut b: u16 = 0;
        while b < 256 {
            if !self.has(b as u8) {
                b += 1;
                continue;
            }
            let lo = b;
            while b + 1 < 256 && self.has((b + 1) as u8) {
                b += 1;
            }
            write_byte(f, lo as u8)?;
            if b > lo {
                write!(f, "-")?;
                write_byte(f, b as u8)?;
            }
            b += 1;
        }
        write!(f, "]")
    }
}

fn write_byte(f: &mut fmt::Formatter<'_>, b: u8) -> fmt::Result {
    if b.is_ascii_graphic() && b != b'-' && b != b']' && b != b'\\' {
        write!(f, "{}", b as char)
    } else {
        write!(f, "\\x{:02x}", b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_membership() {
        let digits = Charset::range(b'0', b'9');
        assert!(digits.has(b'0'));
        assert!(digits.has(b'9'));
        assert!(!digits.has(b'a'));
        assert_eq!(digits.len(), 10);
    }

    #[test]
    fn test_high_bytes() {
        let high = Charset::range(0x80, 0xff);
        assert!(high.has(0xc3));
        assert!(high.has(0xff));
        assert!(!high.has(0x7f));
        assert_eq!(high.len(), 128);
    }

    #[test]
    fn test_union_difference_complement() {
        let a = Charset::from_bytes(b"abc");
        let b = Charset::from_bytes(b"cde");

        let union = a.add(&b);
        assert_eq!(union.len(), 5);

        let diff = a.sub(&b);
        assert!(diff.has(b'a'));
        assert!(!diff.has(b'c'));

        let not_a = a.complement();
        assert!(!not_a.has(b'a'));
        assert!(not_a.has(0));
        assert_eq!(not_a.len(), 253);
    }

    #[test]
    fn test_single_byte() {
        assert_eq!(Charset::single(b'x').single_byte(), Some(b'x'));
        assert_eq!(Charset::from_bytes(b"xy").single_byte(), None);
        assert_eq!(Charset::empty().single_byte(), None);
    }

    #[test]
    fn test_disjoint() {
        let a = Charset::range(b'a', b'z');
        let d = Charset::range(b'0', b'9');
        assert!(a.is_disjoint(&d));
        assert!(!a.is_disjoint(&Charset::single(b'q')));
    }

    #[test]
    fn test_table_bytes() {
        let set = Charset::from_bytes(&[0, 63, 64, 200, 255]);
        let raw = set.to_bytes();
        assert_eq!(Charset::from_table_bytes(&raw), set);
    }

    #[test]
    fn test_display() {
        let set = Charset::range(b'0', b'9').add(&Charset::single(b'_'));
        assert_eq!(set.to_string(), "[0-9_]");
        assert_eq!(Charset::single(0).to_string(), "[\\x00]");
    }

    #[test]
    fn test_full_and_empty() {
        assert!(Charset::full().is_full());
        assert!(Charset::empty().is_empty());
        assert_eq!(Charset::empty().complement(), Charset::full());
    }
}
