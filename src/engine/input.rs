//! Byte sources the VM can read from
//!
//! The VM only ever asks for "the bytes at and after `pos`". A source may
//! answer with fewer bytes than remain (a rope piece, a chunk of a file); an
//! empty answer means end of input.

use super::incremental::Edit;
use std::borrow::Cow;
use std::ops::Range;

/// Read-only, random-access byte source
pub trait Input {
    /// Bytes starting at `pos`; possibly short, empty only at end of input
    fn read(&self, pos: usize) -> &[u8];

    /// The bytes in `range`, clamped to the end of input
    fn slice(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        let first = self.read(range.start);
        if first.len() >= range.len() {
            return Cow::Borrowed(&first[..range.len()]);
        }
        let mut out = Vec::with_capacity(range.len());
        let mut pos = range.start;
        while pos < range.end {
            let chunk = self.read(pos);
            if chunk.is_empty() {
                break;
            }
            let take = chunk.len().min(range.end - pos);
            out.extend_from_slice(&chunk[..take]);
            pos += take;
        }
        Cow::Owned(out)
    }
}

impl Input for [u8] {
    #[inline]
    fn read(&self, pos: usize) -> &[u8] {
        self.get(pos..).unwrap_or(&[])
    }

    fn slice(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Cow::Borrowed(&self[start..end])
    }
}

impl Input for str {
    #[inline]
    fn read(&self, pos: usize) -> &[u8] {
        self.as_bytes().read(pos)
    }

    fn slice(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        self.as_bytes().slice(range)
    }
}

impl Input for Vec<u8> {
    #[inline]
    fn read(&self, pos: usize) -> &[u8] {
        self.as_slice().read(pos)
    }

    fn slice(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        self.as_slice().slice(range)
    }
}

impl Input for String {
    #[inline]
    fn read(&self, pos: usize) -> &[u8] {
        self.as_bytes().read(pos)
    }

    fn slice(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        self.as_bytes().slice(range)
    }
}

/// A document held as a list of pieces
///
/// Reads never cross a piece boundary, which exercises the VM's handling of
/// short reads. Edits splice pieces and report the matching [`Edit`].
///
/// ```rust
/// use repeg::engine::input::{ChunkedInput, Input};
///
/// let mut doc = ChunkedInput::new("hello world", 4);
/// assert_eq!(doc.read(0), b"hell");
/// let edit = doc.edit(6, 11, b"rust");
/// assert_eq!(doc.to_vec(), b"hello rust");
/// assert_eq!(edit.shift(), -1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChunkedInput {
    pieces: Vec<Vec<u8>>,
    // starts[i] is the offset of pieces[i]
    starts: Vec<usize>,
    piece_size: usize,
    len: usize,
}

impl ChunkedInput {
    /// Split `text` into pieces of at most `piece_size` bytes
    pub fn new(text: impl AsRef<[u8]>, piece_size: usize) -> Self {
        let mut input = Self {
            piece_size: piece_size.max(1),
            ..Self::default()
        };
        input.pieces = split(text.as_ref(), input.piece_size);
        input.reindex();
        input
    }

    /// Total length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the document is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pieces
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Contiguous copy of the document
    pub fn to_vec(&self) -> Vec<u8> {
        self.pieces.concat()
    }

    /// Replace bytes `start..end` with `text`.
    ///
    /// Out-of-range bounds are clamped to the document.
    pub fn edit(&mut self, start: usize, end: usize, text: &[u8]) -> Edit {
        let end = end.min(self.len);
        let start = start.min(end);

        let first = self.piece_at(start);
        let last = self.piece_at(end);

        let mut head = Vec::new();
        let mut tail = Vec::new();
        if let Some(i) = first {
            head.extend_from_slice(&self.pieces[i][..start - self.starts[i]]);
        }
        if let Some(j) = last {
            tail.extend_from_slice(&self.pieces[j][end - self.starts[j]..]);
        }

        let lo = first.unwrap_or(self.pieces.len());
        let hi = last.map(|j| j + 1).unwrap_or(self.pieces.len());

        let mut replacement = Vec::new();
        if !head.is_empty() {
            replacement.push(head);
        }
        replacement.extend(split(text, self.piece_size));
        if !tail.is_empty() {
            replacement.push(tail);
        }
        self.pieces.splice(lo..hi, replacement);
        self.reindex();

        Edit::new(start, end, text.len())
    }

    fn piece_at(&self, pos: usize) -> Option<usize> {
        if pos >= self.len {
            return None;
        }
        Some(match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        })
    }

    fn reindex(&mut self) {
        self.pieces.retain(|p| !p.is_empty());
        self.starts.clear();
        let mut at = 0;
        for piece in &self.pieces {
            self.starts.push(at);
            at += piece.len();
        }
        self.len = at;
    }
}

fn split(text: &[u8], size: usize) -> Vec<Vec<u8>> {
    text.chunks(size).map(<[u8]>::to_vec).collect()
}

impl Input for ChunkedInput {
    fn read(&self, pos: usize) -> &[u8] {
        match self.piece_at(pos) {
            Some(i) => &self.pieces[i][pos - self.starts[i]..],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_input_reads() {
        let data: &[u8] = b"abc";
        assert_eq!(data.read(1), b"bc");
        assert_eq!(data.read(3), b"");
        assert_eq!(data.read(10), b"");
        assert_eq!(data.slice(1..10).as_ref(), b"bc");
        assert_eq!("xyz".read(2), b"z");
    }

    #[test]
    fn test_chunked_reads_are_short() {
        let doc = ChunkedInput::new("abcdefghij", 3);
        assert_eq!(doc.piece_count(), 4);
        assert_eq!(doc.read(0), b"abc");
        assert_eq!(doc.read(4), b"ef");
        assert_eq!(doc.read(9), b"j");
        assert_eq!(doc.read(10), b"");
        assert_eq!(doc.slice(2..8).as_ref(), b"cdefgh");
    }

    #[test]
    fn test_chunked_edit_insert() {
        let mut doc = ChunkedInput::new("abcdef", 2);
        let edit = doc.edit(3, 3, b"XYZ");
        assert_eq!(doc.to_vec(), b"abcXYZdef");
        assert_eq!(edit, Edit::insert(3, 3));
    }

    #[test]
    fn test_chunked_edit_delete_and_append() {
        let mut doc = ChunkedInput::new("abcdef", 4);
        doc.edit(1, 5, b"");
        assert_eq!(doc.to_vec(), b"af");
        assert_eq!(doc.len(), 2);

        let edit = doc.edit(2, 2, b"gh");
        assert_eq!(doc.to_vec(), b"afgh");
        assert_eq!(edit.start, 2);
        assert_eq!(doc.read(2), b"gh");
    }

    #[test]
    fn test_chunked_edit_at_start() {
        let mut doc = ChunkedInput::new("world", 8);
        doc.edit(0, 0, b"hello ");
        assert_eq!(doc.to_vec(), b"hello world");
    }
}
