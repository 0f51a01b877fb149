//! Text range model
//!
//! A selection is a half-open interval `[start_index, end_index)` of character
//! offsets into the *raw* document text, together with the literal text it
//! covers. Offsets count Unicode scalar values, never bytes, and are always
//! computed against the unmodified document; highlight markup is an overlay
//! and never feeds back into this offset space.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while building or checking a range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("selection is empty")]
    Empty,

    #[error("range [{start}, {end}) is inverted")]
    Inverted { start: usize, end: usize },

    #[error("range [{start}, {end}) exceeds document length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("selected text does not match document content at [{start}, {end})")]
    ContentMismatch { start: usize, end: usize },
}

/// A validated selection over raw document text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start_index: usize,
    pub end_index: usize,
    pub selected_text: String,
}

impl TextRange {
    /// Build a range from a user selection.
    ///
    /// `anchor` is where the selection started and `focus` where it ended, so
    /// a backwards drag yields `focus < anchor`. Surrounding whitespace is
    /// trimmed by moving the offsets inward, which keeps `selected_text` an
    /// exact slice of `raw`.
    pub fn from_selection(raw: &str, anchor: usize, focus: usize) -> Result<Self, RangeError> {
        let (start, end) = if anchor <= focus {
            (anchor, focus)
        } else {
            (focus, anchor)
        };

        let len = char_len(raw);
        if end > len {
            return Err(RangeError::OutOfBounds { start, end, len });
        }

        let chars: Vec<char> = raw.chars().skip(start).take(end - start).collect();
        let leading = chars.iter().take_while(|c| c.is_whitespace()).count();
        if leading == chars.len() {
            return Err(RangeError::Empty);
        }
        let trailing = chars.iter().rev().take_while(|c| c.is_whitespace()).count();

        let start_index = start + leading;
        let end_index = end - trailing;

        Ok(Self {
            start_index,
            end_index,
            selected_text: chars[leading..chars.len() - trailing].iter().collect(),
        })
    }

    /// Build a range directly from offsets, taking the text from `raw`
    pub fn from_offsets(raw: &str, start_index: usize, end_index: usize) -> Result<Self, RangeError> {
        check_bounds(start_index, end_index, char_len(raw))?;
        Ok(Self {
            start_index,
            end_index,
            selected_text: slice_chars(raw, start_index, end_index).to_string(),
        })
    }

    /// Check bounds, non-emptiness and that the stored text is the exact
    /// slice of `content` the offsets point at
    pub fn validate_against(&self, content: &str) -> Result<(), RangeError> {
        check_bounds(self.start_index, self.end_index, char_len(content))?;
        if self.selected_text.trim().is_empty() {
            return Err(RangeError::Empty);
        }
        if slice_chars(content, self.start_index, self.end_index) != self.selected_text {
            return Err(RangeError::ContentMismatch {
                start: self.start_index,
                end: self.end_index,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index >= self.end_index
    }

    /// Whether two ranges share at least one character
    pub fn overlaps(&self, other: &TextRange) -> bool {
        self.start_index < other.end_index && other.start_index < self.end_index
    }
}

fn check_bounds(start: usize, end: usize, len: usize) -> Result<(), RangeError> {
    if start == end {
        return Err(RangeError::Empty);
    }
    if start > end {
        return Err(RangeError::Inverted { start, end });
    }
    if end > len {
        return Err(RangeError::OutOfBounds { start, end, len });
    }
    Ok(())
}

/// Length of `text` in characters
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of the character at `char_index`, or `text.len()` past the end
pub fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// Slice `text` by character offsets. Offsets past the end are clamped.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let start_byte = byte_offset(text, start);
    let end_byte = byte_offset(text, end.max(start));
    &text[start_byte..end_byte]
}
