// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Static interval index over source ranges.
//!
//! Maps an arbitrary query range back to the node(s) whose range most
//! tightly encloses it. The optimised path is a four-axis BSP over
//! `(start line, start character, end line, end character)`: internal
//! nodes split at the median of the current axis, leaves hold small
//! buckets, and queries prune subtrees whose bounding box cannot contain
//! the query range. A linear scan implements the same contract for the
//! unoptimised path.

use crate::range::Range;

/// Leaf bucket capacity of the tree.
const LEAF_SIZE: usize = 8;

/// A payload-carrying interval.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The indexed range.
    pub range: Range,
    /// Insertion order, used as a deterministic first-wins tie-break.
    pub seq: u32,
    /// Id of the graph node owning the range.
    pub node_id: String,
}

/// A per-file range index, either tree-backed or a linear scan.
#[derive(Debug)]
pub enum RangeIndex {
    /// Balanced static BSP.
    Tree(IntervalTree),
    /// Unoptimised full scan over the entry list.
    Linear(Vec<Entry>),
}

impl RangeIndex {
    /// Builds an index over the entries. `optimized` selects the tree.
    #[must_use]
    pub fn new(entries: Vec<Entry>, optimized: bool) -> Self {
        if optimized {
            Self::Tree(IntervalTree::build(entries))
        } else {
            Self::Linear(entries)
        }
    }

    /// Returns all entries whose range most tightly contains `query`:
    /// the containing entries minimal in line span, then minimal in
    /// character span among those, with all ties included.
    #[must_use]
    pub fn tightest_containing(&self, query: &Range) -> Vec<&Entry> {
        let candidates = match self {
            Self::Tree(tree) => tree.containing(query),
            Self::Linear(entries) => entries.iter().filter(|e| e.range.contains(query)).collect(),
        };
        reduce_to_tightest(candidates)
    }

    /// The entry among the tightest minima with the lowest insertion
    /// order — the deterministic single-result variant.
    #[must_use]
    pub fn resolve(&self, query: &Range) -> Option<&Entry> {
        self.tightest_containing(query)
            .into_iter()
            .min_by_key(|e| e.seq)
    }
}

/// Two-step minima selection: line span first, then character span.
fn reduce_to_tightest(candidates: Vec<&Entry>) -> Vec<&Entry> {
    let min_lines = candidates.iter().map(|e| e.range.line_span()).min();
    let Some(min_lines) = min_lines else {
        return Vec::new();
    };
    let survivors: Vec<&Entry> = candidates
        .into_iter()
        .filter(|e| e.range.line_span() == min_lines)
        .collect();
    let min_chars = survivors
        .iter()
        .map(|e| e.range.character_span())
        .min()
        .unwrap_or(0);
    survivors
        .into_iter()
        .filter(|e| e.range.character_span() == min_chars)
        .collect()
}

/// Balanced static BSP over four range coordinates.
#[derive(Debug)]
pub struct IntervalTree {
    root: Option<Box<TreeNode>>,
    len: usize,
}

#[derive(Debug)]
struct TreeNode {
    /// Earliest start position in the subtree.
    min_start: Range,
    /// Latest end position in the subtree.
    max_end: Range,
    kind: NodeKind,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<Entry>),
    Split {
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl IntervalTree {
    /// Builds the tree in `O(n log n)`.
    #[must_use]
    pub fn build(entries: Vec<Entry>) -> Self {
        let len = entries.len();
        let root = if entries.is_empty() {
            None
        } else {
            Some(Box::new(build_node(entries, 0)))
        };
        Self { root, len }
    }

    /// Number of indexed entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if no entries are indexed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All entries whose range contains `query`, unreduced.
    fn containing(&self, query: &Range) -> Vec<&Entry> {
        let mut matches = Vec::new();
        if let Some(root) = &self.root {
            collect(root, query, &mut matches);
        }
        matches
    }
}

fn axis_key(range: &Range, axis: usize) -> u32 {
    match axis {
        0 => range.start_line,
        1 => range.start_character.unwrap_or(0),
        2 => range.end_line,
        _ => range.end_character.unwrap_or(u32::MAX),
    }
}

fn build_node(mut entries: Vec<Entry>, axis: usize) -> TreeNode {
    let min_start = entries
        .iter()
        .map(|e| e.range)
        .min_by(Range::cmp_starts)
        .unwrap_or(Range::lines(0, 0));
    let max_end = entries
        .iter()
        .map(|e| e.range)
        .max_by(Range::cmp_ends)
        .unwrap_or(Range::lines(0, 0));

    if entries.len() <= LEAF_SIZE {
        return TreeNode {
            min_start,
            max_end,
            kind: NodeKind::Leaf(entries),
        };
    }

    let mid = entries.len() / 2;
    entries.select_nth_unstable_by_key(mid, |e| axis_key(&e.range, axis));
    let upper = entries.split_off(mid);
    let next_axis = (axis + 1) % 4;

    TreeNode {
        min_start,
        max_end,
        kind: NodeKind::Split {
            left: Box::new(build_node(entries, next_axis)),
            right: Box::new(build_node(upper, next_axis)),
        },
    }
}

fn collect<'t>(node: &'t TreeNode, query: &Range, matches: &mut Vec<&'t Entry>) {
    // A subtree can only contain the query if some range starts at or
    // before the query start and some range ends at or after its end.
    if node.min_start.cmp_starts(query) == std::cmp::Ordering::Greater
        || query.cmp_ends(&node.max_end) == std::cmp::Ordering::Greater
    {
        return;
    }
    match &node.kind {
        NodeKind::Leaf(entries) => {
            matches.extend(entries.iter().filter(|e| e.range.contains(query)));
        }
        NodeKind::Split { left, right } => {
            collect(left, query, matches);
            collect(right, query, matches);
        }
    }
}
