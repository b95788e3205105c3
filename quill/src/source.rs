//! Source locations.

use std::fmt;
use std::ops::Range;

/// A range of byte offsets in a source file, attached to surface syntax by
/// the external parser and threaded through elaboration for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    start: usize,
    end: usize,
}

impl ByteRange {
    pub const fn new(start: usize, end: usize) -> ByteRange {
        ByteRange { start, end }
    }

    /// A zero-width range, for synthesised syntax with no source position.
    pub const fn none() -> ByteRange {
        ByteRange { start: 0, end: 0 }
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub const fn end(&self) -> usize {
        self.end
    }

    /// The smallest range covering both `self` and `other`.
    pub fn merge(&self, other: &ByteRange) -> ByteRange {
        ByteRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Range<usize> {
        range.start..range.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
