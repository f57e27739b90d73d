//! Field-width layouts.
//!
//! A peripheral declares the width of each of its input and output fields
//! once. Values are packed into a single word in declaration order, field 0
//! in the least significant bits:
//!
//! ```text
//! widths [8, 1, 1, 16]
//!
//!  25           10  9   8   7        0
//! +---------------+---+---+----------+
//! |   field 3     |f2 |f1 | field 0  |
//! +---------------+---+---+----------+
//! ```
//!
//! Packing is checked: a value that does not fit its field is an error rather
//! than being silently truncated into its neighbour.

use std::fmt;

/// Width of the widest packed word this codec supports.
pub const MAX_WORD_BITS: u32 = u64::BITS;

/// Errors from packing or unpacking register fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Wrong number of values for the layout.
    CountMismatch {
        /// Number of fields in the layout
        expected: usize,
        /// Number of values supplied
        got: usize,
    },
    /// A value has bits set above its field width.
    Overflow {
        /// Field index within the layout
        index: usize,
        /// Declared field width in bits
        width: u32,
        /// Offending value
        value: u64,
    },
    /// A packed word has bits set above the layout's total width.
    WordTooWide {
        /// Total layout width in bits
        width: u32,
        /// Offending word
        word: u64,
    },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch { expected, got } => {
                write!(f, "expected {expected} field values, got {got}")
            }
            Self::Overflow { index, width, value } => {
                write!(f, "value {value:#x} does not fit field {index} ({width} bits)")
            }
            Self::WordTooWide { width, word } => {
                write!(f, "word {word:#x} exceeds layout width of {width} bits")
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Ordered field widths of one side of a peripheral interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    widths: &'static [u32],
}

impl FieldLayout {
    /// Declare a layout.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a `const`) if a field is zero bits
    /// wide or the total exceeds [`MAX_WORD_BITS`].
    pub const fn new(widths: &'static [u32]) -> Self {
        let mut total = 0;
        let mut i = 0;
        while i < widths.len() {
            assert!(widths[i] > 0, "zero-width field");
            total += widths[i];
            i += 1;
        }
        assert!(total <= MAX_WORD_BITS, "layout wider than a packed word");
        Self { widths }
    }

    /// Field widths in declaration order.
    pub const fn widths(&self) -> &'static [u32] {
        self.widths
    }

    /// Number of fields.
    pub const fn len(&self) -> usize {
        self.widths.len()
    }

    /// True if the layout declares no fields.
    pub const fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    /// Sum of all field widths.
    pub fn total_width(&self) -> u32 {
        self.widths.iter().sum()
    }

    /// Bit offset of field `index` within the packed word.
    ///
    /// `offset(len())` is the total width.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn offset(&self, index: usize) -> u32 {
        self.widths[..index].iter().sum()
    }

    /// Pack one value per field into a word.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::CountMismatch`] if `values` does not have one entry
    /// per field, or [`FieldError::Overflow`] if a value is wider than its field.
    pub fn pack(&self, values: &[u64]) -> Result<u64, FieldError> {
        if values.len() != self.widths.len() {
            return Err(FieldError::CountMismatch {
                expected: self.widths.len(),
                got: values.len(),
            });
        }

        let mut word = 0u64;
        let mut shift = 0u32;
        for (index, (&width, &value)) in self.widths.iter().zip(values).enumerate() {
            if value & !mask(width) != 0 {
                return Err(FieldError::Overflow { index, width, value });
            }
            // shift < 64 whenever a field remains, guaranteed by `new`
            word |= value << shift;
            shift += width;
        }
        Ok(word)
    }

    /// Split a packed word back into one value per field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::WordTooWide`] if `word` has bits set beyond the
    /// layout's total width.
    pub fn unpack(&self, word: u64) -> Result<Vec<u64>, FieldError> {
        let width = self.total_width();
        if word & !mask(width) != 0 {
            return Err(FieldError::WordTooWide { width, word });
        }

        let mut shift = 0u32;
        Ok(self
            .widths
            .iter()
            .map(|&w| {
                let value = (word >> shift) & mask(w);
                shift += w;
                value
            })
            .collect())
    }
}

const fn mask(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
