//! Text processing: chapter detection, grouping, and size-bounded splitting.

pub mod boundary;
pub mod chunker;
pub mod numerals;
pub mod segmenter;

pub use boundary::{Boundary, BoundaryDetector, Rule};
pub use chunker::{chunk_units, split};
pub use numerals::NumeralMagnitude;
pub use segmenter::{Section, Segmenter, Unit};

/// A piece of a Unit's text small enough for one synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Group index of the Unit this chunk belongs to
    pub unit: usize,
    /// Position within the Unit, from 0
    pub sequence: usize,
    /// The text content
    pub text: String,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(unit: usize, sequence: usize, text: impl Into<String>) -> Self {
        Self {
            unit,
            sequence,
            text: text.into(),
        }
    }
}
