// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Attribute stores shared by graph nodes and edges.
//!
//! Four disjoint stores keyed by name: toggles, strings, integers, and
//! floats. A name may coexist across stores. Range attributes are sugar
//! for a quadruple of integer attributes.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use crate::range::Range;

/// Suffixes used to store a [`Range`] as four integer attributes.
const RANGE_SUFFIXES: [&str; 4] = ["_StartLine", "_EndLine", "_StartCharacter", "_EndCharacter"];

/// The four attribute stores of a graph element.
///
/// Iteration order is deterministic (sorted by name) so that two imports
/// of the same project serialise identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    toggles: BTreeSet<String>,
    strings: BTreeMap<String, String>,
    ints: BTreeMap<String, i64>,
    floats: BTreeMap<String, f64>,
}

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a toggle attribute.
    pub fn set_toggle(&mut self, name: &str) {
        self.toggles.insert(name.to_string());
    }

    /// Returns true if the toggle is set.
    #[must_use]
    pub fn has_toggle(&self, name: &str) -> bool {
        self.toggles.contains(name)
    }

    /// Sets a string attribute.
    pub fn set_string(&mut self, name: &str, value: impl Into<String>) {
        self.strings.insert(name.to_string(), value.into());
    }

    /// Returns a string attribute.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    /// Sets an integer attribute.
    pub fn set_int(&mut self, name: &str, value: i64) {
        self.ints.insert(name.to_string(), value);
    }

    /// Returns an integer attribute.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    /// Adds `delta` to an integer attribute, creating it at zero first.
    pub fn increment_int(&mut self, name: &str, delta: i64) {
        *self.ints.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Sets a float attribute.
    pub fn set_float(&mut self, name: &str, value: f64) {
        self.floats.insert(name.to_string(), value);
    }

    /// Returns a float attribute.
    #[must_use]
    pub fn float(&self, name: &str) -> Option<f64> {
        self.floats.get(name).copied()
    }

    /// Numeric lookup preferring the float store over the int store.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Metric values are small")]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.float(name).or_else(|| self.int(name).map(|v| v as f64))
    }

    /// Stores a range as `<name>_StartLine` etc. The character pair is
    /// written only when present.
    pub fn set_range(&mut self, name: &str, range: &Range) {
        self.set_int(&format!("{name}{}", RANGE_SUFFIXES[0]), i64::from(range.start_line));
        self.set_int(&format!("{name}{}", RANGE_SUFFIXES[1]), i64::from(range.end_line));
        if let Some(c) = range.start_character {
            self.set_int(&format!("{name}{}", RANGE_SUFFIXES[2]), i64::from(c));
        }
        if let Some(c) = range.end_character {
            self.set_int(&format!("{name}{}", RANGE_SUFFIXES[3]), i64::from(c));
        }
    }

    /// Reads a range attribute back, if its line pair is present.
    #[must_use]
    pub fn range(&self, name: &str) -> Option<Range> {
        let start_line = self.int(&format!("{name}{}", RANGE_SUFFIXES[0]))?;
        let end_line = self.int(&format!("{name}{}", RANGE_SUFFIXES[1]))?;
        let character = |suffix: &str| {
            self.int(&format!("{name}{suffix}"))
                .and_then(|v| u32::try_from(v).ok())
        };
        Some(Range {
            start_line: u32::try_from(start_line).ok()?,
            end_line: u32::try_from(end_line).ok()?,
            start_character: character(RANGE_SUFFIXES[2]),
            end_character: character(RANGE_SUFFIXES[3]),
        })
    }

    /// Structural equality across all four stores.
    #[must_use]
    pub fn has_same_attributes(&self, other: &Self) -> bool {
        self == other
    }

    /// Order-independent digest of all four stores, used to index
    /// isomorphism probes so that duplicate detection stays `O(1)`
    /// expected instead of scanning every node.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for name in &self.toggles {
            (0u8, name).hash(&mut hasher);
        }
        for (name, value) in &self.strings {
            (1u8, name, value).hash(&mut hasher);
        }
        for (name, value) in &self.ints {
            (2u8, name, value).hash(&mut hasher);
        }
        for (name, value) in &self.floats {
            (3u8, name, value.to_bits()).hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Iterates toggle names.
    pub fn toggles(&self) -> impl Iterator<Item = &str> {
        self.toggles.iter().map(String::as_str)
    }

    /// Iterates string attributes.
    pub fn strings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.strings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates integer attributes.
    pub fn ints(&self) -> impl Iterator<Item = (&str, i64)> {
        self.ints.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Iterates float attributes.
    pub fn floats(&self) -> impl Iterator<Item = (&str, f64)> {
        self.floats.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stores_are_disjoint() {
        let mut attrs = Attributes::new();
        attrs.set_toggle("Flag");
        attrs.set_string("Flag", "text");
        attrs.set_int("Flag", 3);
        attrs.set_float("Flag", 0.5);

        assert!(attrs.has_toggle("Flag"));
        assert_eq!(attrs.string("Flag"), Some("text"));
        assert_eq!(attrs.int("Flag"), Some(3));
        assert_eq!(attrs.float("Flag"), Some(0.5));
    }

    #[test]
    fn test_number_prefers_float() {
        let mut attrs = Attributes::new();
        attrs.set_int("Metric", 3);
        assert_eq!(attrs.number("Metric"), Some(3.0));

        attrs.set_float("Metric", 1.5);
        assert_eq!(attrs.number("Metric"), Some(1.5));
    }

    #[test]
    fn test_range_round_trip() {
        let mut attrs = Attributes::new();
        let range = Range::new(3, 4, 9, 1);
        attrs.set_range("SourceRange", &range);

        assert_eq!(attrs.int("SourceRange_StartLine"), Some(3));
        assert_eq!(attrs.int("SourceRange_EndCharacter"), Some(1));
        assert_eq!(attrs.range("SourceRange"), Some(range));
    }

    #[test]
    fn test_line_granular_range_omits_characters() {
        let mut attrs = Attributes::new();
        attrs.set_range("SourceRange", &Range::lines(1, 4));

        assert_eq!(attrs.int("SourceRange_StartCharacter"), None);
        assert_eq!(attrs.range("SourceRange"), Some(Range::lines(1, 4)));
    }

    #[test]
    fn test_has_same_attributes_equivalence() {
        let mut a = Attributes::new();
        a.set_string("Source.Name", "foo");
        a.set_int("Metric.Lines.LOC", 4);

        // Insertion order must not matter.
        let mut b = Attributes::new();
        b.set_int("Metric.Lines.LOC", 4);
        b.set_string("Source.Name", "foo");

        let mut c = b.clone();

        assert!(a.has_same_attributes(&a));
        assert!(a.has_same_attributes(&b));
        assert!(b.has_same_attributes(&a));
        assert!(b.has_same_attributes(&c));
        assert!(a.has_same_attributes(&c));

        c.set_toggle("Deprecated");
        assert!(!a.has_same_attributes(&c));
    }

    #[test]
    fn test_content_hash_matches_equality() {
        let mut a = Attributes::new();
        a.set_string("Source.Name", "foo");
        a.set_float("Score", 2.25);

        let mut b = Attributes::new();
        b.set_float("Score", 2.25);
        b.set_string("Source.Name", "foo");

        assert_eq!(a.content_hash(), b.content_hash());

        b.set_int("Extra", 1);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_increment_int() {
        let mut attrs = Attributes::new();
        attrs.increment_int("Metrics.LSP_Warning", 1);
        attrs.increment_int("Metrics.LSP_Warning", 2);
        assert_eq!(attrs.int("Metrics.LSP_Warning"), Some(3));
    }
}
