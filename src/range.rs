// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Source ranges with containment and tightness ordering.
//!
//! A [`Range`] is a half-open span over `(line, character)` positions as
//! reported by the language server. Character bounds are optional: a
//! line-granular range is valid and treats its missing start character as
//! `-∞` and its missing end character as `+∞` for containment purposes.

use std::cmp::Ordering;

/// A half-open source span `[start, end)` in zero-based `(line, character)`
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    /// First line of the span.
    pub start_line: u32,
    /// Line of the exclusive end position.
    pub end_line: u32,
    /// Character offset of the start position, if known.
    pub start_character: Option<u32>,
    /// Character offset of the exclusive end position, if known.
    pub end_character: Option<u32>,
}

impl Range {
    /// Creates a range with character bounds.
    #[must_use]
    pub const fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start_line,
            end_line,
            start_character: Some(start_character),
            end_character: Some(end_character),
        }
    }

    /// Creates a line-granular range without character bounds.
    #[must_use]
    pub const fn lines(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line,
            end_line,
            start_character: None,
            end_character: None,
        }
    }

    /// Creates a degenerate one-character range at a position.
    #[must_use]
    pub const fn point(line: u32, character: u32) -> Self {
        Self {
            start_line: line,
            end_line: line,
            start_character: Some(character),
            end_character: Some(character + 1),
        }
    }

    /// Returns true if `self` contains `other`.
    ///
    /// Containment is lexicographic on `(line, character)`: the start of
    /// `self` must not exceed the start of `other` and the end of `other`
    /// must not exceed the end of `self`. Missing characters are treated
    /// as `-∞` on the start side and `+∞` on the end side.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        start_cmp(self.start_line, self.start_character, other.start_line, other.start_character)
            != Ordering::Greater
            && end_cmp(other.end_line, other.end_character, self.end_line, self.end_character)
                != Ordering::Greater
    }

    /// Returns true if `self` contains the position `(line, character)`.
    #[must_use]
    pub fn contains_position(&self, line: u32, character: u32) -> bool {
        self.contains(&Self::point(line, character))
    }

    /// Number of whole lines spanned.
    #[must_use]
    pub const fn line_span(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }

    /// Character span with absent bounds widened to `+∞` / `0`.
    #[must_use]
    pub fn character_span(&self) -> u32 {
        let end = self.end_character.unwrap_or(u32::MAX);
        let start = self.start_character.unwrap_or(0);
        end.saturating_sub(start)
    }

    /// Size used for tightness comparison: `(line span, character span)`.
    ///
    /// The tighter of two ranges is the one with the lexicographically
    /// smaller size.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.line_span(), self.character_span())
    }

    /// Compares the start positions of two ranges, missing characters
    /// sorting first.
    #[must_use]
    pub fn cmp_starts(&self, other: &Self) -> Ordering {
        start_cmp(self.start_line, self.start_character, other.start_line, other.start_character)
    }

    /// Compares the end positions of two ranges, missing characters
    /// sorting last.
    #[must_use]
    pub fn cmp_ends(&self, other: &Self) -> Ordering {
        end_cmp(self.end_line, self.end_character, other.end_line, other.end_character)
    }
}

impl From<lsp_types::Range> for Range {
    fn from(range: lsp_types::Range) -> Self {
        Self {
            start_line: range.start.line,
            end_line: range.end.line,
            start_character: Some(range.start.character),
            end_character: Some(range.end.character),
        }
    }
}

fn start_cmp(line_a: u32, chr_a: Option<u32>, line_b: u32, chr_b: Option<u32>) -> Ordering {
    // Missing start characters sort before any concrete offset.
    line_a
        .cmp(&line_b)
        .then_with(|| match (chr_a, chr_b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        })
}

fn end_cmp(line_a: u32, chr_a: Option<u32>, line_b: u32, chr_b: Option<u32>) -> Ordering {
    // Missing end characters sort after any concrete offset.
    line_a
        .cmp(&line_b)
        .then_with(|| match (chr_a, chr_b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        })
}
