// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The hierarchical code graph.
//!
//! A [`Graph`] owns its [`Node`]s and [`Edge`]s, keyed by unique string
//! ids. Nodes form a forest through parent/child links; derived hierarchy
//! data (roots, levels, maximum depth) is recomputed lazily when a
//! mutation marks it dirty.

pub mod attributes;
pub mod gxl;
pub mod metrics;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::range::Range;
pub use attributes::Attributes;

/// Element type used when none was assigned.
pub const UNKNOWN_TYPE: &str = "UNKNOWNTYPE";

/// A node of the code graph: a directory, file, or program symbol.
#[derive(Debug, Clone)]
pub struct Node {
    id: String,
    /// Non-unique display name (mirrored as `Source.Name`).
    pub source_name: String,
    /// Element type, e.g. `Class` or `Directory`.
    pub type_name: String,
    /// Attribute stores.
    pub attributes: Attributes,
    parent: Option<String>,
    children: Vec<String>,
    incoming: BTreeSet<String>,
    outgoing: BTreeSet<String>,
    level: u32,
}

impl Node {
    /// Creates a node. The id also becomes the `Linkage.Name` string
    /// attribute and the source name is mirrored as `Source.Name`.
    #[must_use]
    pub fn new(type_name: &str, id: &str, source_name: &str) -> Self {
        let type_name = if type_name.is_empty() { UNKNOWN_TYPE } else { type_name };
        let mut attributes = Attributes::new();
        attributes.set_string("Linkage.Name", id);
        attributes.set_string("Source.Name", source_name);
        Self {
            id: id.to_string(),
            source_name: source_name.to_string(),
            type_name: type_name.to_string(),
            attributes,
            parent: None,
            children: Vec::new(),
            incoming: BTreeSet::new(),
            outgoing: BTreeSet::new(),
            level: 0,
        }
    }

    /// Unique id within the graph. Immutable once added.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the parent node, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Ids of the child nodes.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Hierarchy level: 0 for roots, `parent.level + 1` otherwise.
    /// Valid after [`Graph::finalize_hierarchy`].
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Ids of edges ending at this node.
    #[must_use]
    pub const fn incoming(&self) -> &BTreeSet<String> {
        &self.incoming
    }

    /// Ids of edges starting at this node.
    #[must_use]
    pub const fn outgoing(&self) -> &BTreeSet<String> {
        &self.outgoing
    }

    /// Sets the canonical source location attributes.
    pub fn set_location(&mut self, file: &str, directory: &Path, line: u32, column: u32) {
        self.attributes.set_string("Source.File", file);
        self.attributes
            .set_string("Source.Path", directory.to_string_lossy());
        self.attributes.set_int("Source.Line", i64::from(line));
        self.attributes.set_int("Source.Column", i64::from(column));
    }

    /// The `SourceRange` attribute. When unset but `Source.Line` is
    /// present, a degenerate one-character range is synthesised from the
    /// one-based location attributes.
    #[must_use]
    pub fn source_range(&self) -> Option<Range> {
        if let Some(range) = self.attributes.range("SourceRange") {
            return Some(range);
        }
        let line = u32::try_from(self.attributes.int("Source.Line")?).ok()?;
        let column = self
            .attributes
            .int("Source.Column")
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(1);
        Some(Range::point(line.saturating_sub(1), column.saturating_sub(1)))
    }

    /// True if all four attribute stores match `other`'s.
    #[must_use]
    pub fn is_isomorphic(&self, other: &Self) -> bool {
        self.attributes.has_same_attributes(&other.attributes)
    }
}

/// A directed, typed edge between two nodes of the same graph.
#[derive(Debug, Clone)]
pub struct Edge {
    id: String,
    /// Id of the source node.
    pub source: String,
    /// Id of the target node.
    pub target: String,
    /// Edge type, e.g. `Call`.
    pub type_name: String,
    /// Attribute stores.
    pub attributes: Attributes,
}

impl Edge {
    /// The generated id `<Type>#<source>#<target>` — the deduplication key.
    #[must_use]
    pub fn make_id(type_name: &str, source: &str, target: &str) -> String {
        format!("{type_name}#{source}#{target}")
    }

    /// Unique id within the graph.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A hierarchical graph of directories, files, and program symbols.
#[derive(Debug, Default)]
pub struct Graph {
    /// Graph name, used as the GXL graph id.
    pub name: String,
    /// Project root the node ids are relative to.
    pub base_path: PathBuf,
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    roots: Vec<String>,
    max_depth: u32,
    hierarchy_dirty: bool,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Looks up a node mutably by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// True if a node with this id exists.
    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Looks up an edge by id.
    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Iterates all nodes in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates all edges in unspecified order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Adds a node as a root.
    ///
    /// # Errors
    ///
    /// Fails if the id is empty or already present.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.id.is_empty() {
            bail!("node id must not be empty");
        }
        if self.nodes.contains_key(&node.id) {
            bail!("duplicate node id: {}", node.id);
        }
        self.nodes.insert(node.id.clone(), node);
        self.hierarchy_dirty = true;
        Ok(())
    }

    /// Removes a node, detaching its children (they become roots) and
    /// dropping its incident edges. Returns the removed node.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.remove(id)?;

        if let Some(parent_id) = &node.parent
            && let Some(parent) = self.nodes.get_mut(parent_id)
        {
            parent.children.retain(|c| c != id);
        }
        for child_id in &node.children {
            if let Some(child) = self.nodes.get_mut(child_id) {
                child.parent = None;
            }
        }
        for edge_id in node.incoming.iter().chain(node.outgoing.iter()) {
            if let Some(edge) = self.edges.remove(edge_id) {
                let other = if edge.source == *id { &edge.target } else { &edge.source };
                if let Some(other_node) = self.nodes.get_mut(other) {
                    other_node.incoming.remove(edge_id);
                    other_node.outgoing.remove(edge_id);
                }
            }
        }

        self.hierarchy_dirty = true;
        Some(node)
    }

    /// Moves `child` under `parent` (or makes it a root when `parent` is
    /// `None`). Reparenting to the current parent is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if either node is missing or the move would create a cycle.
    pub fn reparent(&mut self, child: &str, parent: Option<&str>) -> Result<()> {
        if !self.nodes.contains_key(child) {
            bail!("unknown node: {child}");
        }
        if self.nodes.get(child).and_then(|n| n.parent.as_deref()) == parent {
            return Ok(());
        }
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(parent_id) {
                bail!("unknown parent node: {parent_id}");
            }
            // The new parent must not be the child or one of its descendants.
            let mut cursor = Some(parent_id.to_string());
            while let Some(id) = cursor {
                if id == child {
                    bail!("reparenting {child} under {parent_id} would create a cycle");
                }
                cursor = self.nodes.get(&id).and_then(|n| n.parent.clone());
            }
        }

        let old_parent = self
            .nodes
            .get_mut(child)
            .and_then(|n| n.parent.take());
        if let Some(old_id) = old_parent
            && let Some(old) = self.nodes.get_mut(&old_id)
        {
            old.children.retain(|c| c != child);
        }
        if let Some(parent_id) = parent {
            if let Some(node) = self.nodes.get_mut(parent_id) {
                node.children.push(child.to_string());
            }
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(parent_id.to_string());
            }
        }

        self.hierarchy_dirty = true;
        Ok(())
    }

    /// Adds an edge of `type_name` from `source` to `target`, unless an
    /// edge with the same generated id already exists. Returns whether the
    /// edge was inserted.
    ///
    /// # Errors
    ///
    /// Fails if either endpoint is not in the graph.
    pub fn add_edge(&mut self, type_name: &str, source: &str, target: &str) -> Result<bool> {
        if !self.nodes.contains_key(source) {
            bail!("edge source not in graph: {source}");
        }
        if !self.nodes.contains_key(target) {
            bail!("edge target not in graph: {target}");
        }

        let id = Edge::make_id(type_name, source, target);
        if self.edges.contains_key(&id) {
            return Ok(false);
        }

        let edge = Edge {
            id: id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            type_name: type_name.to_string(),
            attributes: Attributes::new(),
        };
        if let Some(node) = self.nodes.get_mut(source) {
            node.outgoing.insert(id.clone());
        }
        if let Some(node) = self.nodes.get_mut(target) {
            node.incoming.insert(id.clone());
        }
        self.edges.insert(id, edge);
        Ok(true)
    }

    /// Ids of the root nodes. Valid after [`Self::finalize_hierarchy`].
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// `max(level) + 1` over all nodes, 0 when empty. Valid after
    /// [`Self::finalize_hierarchy`].
    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// True if a hierarchy mutation happened since the last finalisation.
    #[must_use]
    pub const fn hierarchy_dirty(&self) -> bool {
        self.hierarchy_dirty
    }

    /// Recomputes roots, levels and maximum depth, writes the
    /// `Metrics.Level` attribute on every node, and clears the dirty flag.
    pub fn finalize_hierarchy(&mut self) {
        let mut roots: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.parent.is_none())
            .map(|n| n.id.clone())
            .collect();
        roots.sort_unstable();

        let mut max_depth = 0;
        let mut queue: VecDeque<(String, u32)> =
            roots.iter().map(|id| (id.clone(), 0)).collect();
        while let Some((id, level)) = queue.pop_front() {
            max_depth = max_depth.max(level + 1);
            let children = match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.level = level;
                    node.attributes.set_int("Metrics.Level", i64::from(level));
                    node.children.clone()
                }
                None => continue,
            };
            for child in children {
                queue.push_back((child, level + 1));
            }
        }

        self.roots = roots;
        self.max_depth = if self.nodes.is_empty() { 0 } else { max_depth };
        self.hierarchy_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(ids: &[&str]) -> Graph {
        let mut graph = Graph::new("test");
        for id in ids {
            graph
                .add_node(Node::new("Class", id, id))
                .unwrap_or_else(|e| panic!("add {id}: {e}"));
        }
        graph
    }

    #[test]
    fn test_add_node_rejects_duplicate_id() {
        let mut graph = graph_with(&["a"]);
        assert!(graph.add_node(Node::new("Class", "a", "a")).is_err());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_node_id_sets_linkage_name() {
        let node = Node::new("Method", "Foo.bar", "bar");
        assert_eq!(node.attributes.string("Linkage.Name"), Some("Foo.bar"));
        assert_eq!(node.attributes.string("Source.Name"), Some("bar"));
    }

    #[test]
    fn test_empty_type_falls_back() {
        let node = Node::new("", "x", "x");
        assert_eq!(node.type_name, UNKNOWN_TYPE);
    }

    #[test]
    fn test_levels_and_max_depth() -> Result<()> {
        let mut graph = graph_with(&["root", "mid", "leaf", "other"]);
        graph.reparent("mid", Some("root"))?;
        graph.reparent("leaf", Some("mid"))?;
        graph.finalize_hierarchy();

        assert_eq!(graph.roots(), &["other".to_string(), "root".to_string()]);
        assert_eq!(graph.node("root").map(Node::level), Some(0));
        assert_eq!(graph.node("mid").map(Node::level), Some(1));
        assert_eq!(graph.node("leaf").map(Node::level), Some(2));
        assert_eq!(graph.node("other").map(Node::level), Some(0));
        assert_eq!(graph.max_depth(), 3);
        assert_eq!(
            graph.node("leaf").and_then(|n| n.attributes.int("Metrics.Level")),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn test_max_depth_empty_graph() {
        let mut graph = Graph::new("empty");
        graph.finalize_hierarchy();
        assert_eq!(graph.max_depth(), 0);
    }

    #[test]
    fn test_parent_children_consistency() -> Result<()> {
        let mut graph = graph_with(&["a", "b"]);
        graph.reparent("b", Some("a"))?;

        assert_eq!(graph.node("b").and_then(Node::parent), Some("a"));
        assert_eq!(graph.node("a").map(Node::children), Some(&["b".to_string()][..]));

        graph.reparent("b", None)?;
        assert_eq!(graph.node("b").and_then(Node::parent), None);
        assert!(graph.node("a").map(Node::children).is_some_and(<[String]>::is_empty));
        Ok(())
    }

    #[test]
    fn test_reparent_rejects_cycles() -> Result<()> {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.reparent("b", Some("a"))?;
        graph.reparent("c", Some("b"))?;

        assert!(graph.reparent("a", Some("c")).is_err());
        assert!(graph.reparent("a", Some("a")).is_err());
        Ok(())
    }

    #[test]
    fn test_reparent_to_current_parent_is_noop() -> Result<()> {
        let mut graph = graph_with(&["a", "b"]);
        graph.reparent("b", Some("a"))?;
        graph.finalize_hierarchy();
        assert!(!graph.hierarchy_dirty());

        graph.reparent("b", Some("a"))?;
        assert!(!graph.hierarchy_dirty());
        Ok(())
    }

    #[test]
    fn test_add_edge_and_dedup() -> Result<()> {
        let mut graph = graph_with(&["a", "b"]);

        assert!(graph.add_edge("Call", "a", "b")?);
        assert!(!graph.add_edge("Call", "a", "b")?, "duplicate must be a no-op");
        assert_eq!(graph.edge_count(), 1);

        // A different type between the same endpoints is a distinct edge.
        assert!(graph.add_edge("Reference", "a", "b")?);
        assert_eq!(graph.edge_count(), 2);

        let id = Edge::make_id("Call", "a", "b");
        assert!(graph.node("a").is_some_and(|n| n.outgoing().contains(&id)));
        assert!(graph.node("b").is_some_and(|n| n.incoming().contains(&id)));
        Ok(())
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let mut graph = graph_with(&["a"]);
        assert!(graph.add_edge("Call", "a", "missing").is_err());
        assert!(graph.add_edge("Call", "missing", "a").is_err());
    }

    #[test]
    fn test_remove_node_detaches_children_and_edges() -> Result<()> {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.reparent("b", Some("a"))?;
        graph.add_edge("Call", "c", "a")?;

        let removed = graph.remove_node("a");
        assert!(removed.is_some());
        assert_eq!(graph.node("b").and_then(Node::parent), None);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.node("c").is_some_and(|n| n.outgoing().is_empty()));
        Ok(())
    }

    #[test]
    fn test_degenerate_range_from_location() {
        let mut node = Node::new("Function", "f", "f");
        node.set_location("lib.rs", Path::new("src"), 12, 5);

        // No SourceRange set: synthesised from the one-based location.
        assert_eq!(node.source_range(), Some(Range::point(11, 4)));

        node.attributes.set_range("SourceRange", &Range::new(11, 0, 14, 1));
        assert_eq!(node.source_range(), Some(Range::new(11, 0, 14, 1)));
    }

    #[test]
    fn test_isomorphism_uses_all_stores() {
        let a = Node::new("Class", "Foo", "Foo");
        let b = Node::new("Class", "Foo", "Foo");
        assert!(a.is_isomorphic(&b));

        let mut c = Node::new("Class", "Foo", "Foo");
        c.attributes.set_toggle("Deprecated");
        assert!(!a.is_isomorphic(&c));
    }
}
