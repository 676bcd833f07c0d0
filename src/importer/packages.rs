// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Package-node synthesis for the Java server family.
//!
//! jdtls reports classes per file but no package structure. After the
//! node phase, the project-relative directory of each class file is
//! parsed as a dotted package name, a chain of `Package` nodes is
//! created, and the classes are reparented into their packages. Each
//! class also gets a `Num_Methods` metric.

use anyhow::Result;
use tracing::debug;

use crate::graph::{Graph, Node};

/// Node types that live directly in a package.
const PACKAGE_MEMBER_TYPES: &[&str] = &["Class", "Interface", "Enum"];

/// Node types counted into `Num_Methods`.
const METHOD_TYPES: &[&str] = &["Method", "Constructor"];

/// Synthesises package nodes and reparents classes into them.
///
/// # Errors
///
/// Returns an error if a reparenting operation fails.
pub fn synthesize_packages(graph: &mut Graph) -> Result<()> {
    let members: Vec<(String, String)> = graph
        .nodes()
        .filter(|n| PACKAGE_MEMBER_TYPES.contains(&n.type_name.as_str()))
        .filter_map(|n| {
            let path = n.attributes.string("Source.Path")?;
            let package = path_to_package(path);
            if package.is_empty() {
                None
            } else {
                Some((n.id().to_string(), package))
            }
        })
        .collect();

    for (class_id, package) in &members {
        ensure_package_chain(graph, package)?;
        graph.reparent(class_id, Some(package))?;
        debug!("moved {} into package {}", class_id, package);
    }

    record_method_counts(graph);
    Ok(())
}

/// Creates the `Package` node chain for a dotted name, returning nothing:
/// `com.example.app` yields `com` → `com.example` → `com.example.app`.
fn ensure_package_chain(graph: &mut Graph, package: &str) -> Result<()> {
    let mut prefix = String::new();
    for segment in package.split('.') {
        let parent = if prefix.is_empty() { None } else { Some(prefix.clone()) };
        if prefix.is_empty() {
            prefix = segment.to_string();
        } else {
            prefix = format!("{prefix}.{segment}");
        }
        if !graph.contains_node(&prefix) {
            graph.add_node(Node::new("Package", &prefix, segment))?;
            graph.reparent(&prefix, parent.as_deref())?;
        }
    }
    Ok(())
}

/// Counts method and constructor children into `Num_Methods` on every
/// package member.
fn record_method_counts(graph: &mut Graph) {
    let counts: Vec<(String, i64)> = graph
        .nodes()
        .filter(|n| PACKAGE_MEMBER_TYPES.contains(&n.type_name.as_str()))
        .map(|n| {
            let count = n
                .children()
                .iter()
                .filter_map(|c| graph.node(c))
                .filter(|c| METHOD_TYPES.contains(&c.type_name.as_str()))
                .count();
            (n.id().to_string(), i64::try_from(count).unwrap_or(i64::MAX))
        })
        .collect();

    for (id, count) in counts {
        if let Some(node) = graph.node_mut(&id) {
            node.attributes.set_int("Num_Methods", count);
        }
    }
}

/// Maps a project-relative directory to a dotted package name.
fn path_to_package(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn class_node(id: &str, name: &str, dir: &str) -> Node {
        let mut node = Node::new("Class", id, name);
        node.set_location(&format!("{name}.java"), Path::new(dir), 1, 1);
        node
    }

    #[test]
    fn test_path_to_package() {
        assert_eq!(path_to_package("com/example/app"), "com.example.app");
        assert_eq!(path_to_package("/com/example/"), "com.example");
        assert_eq!(path_to_package(""), "");
        assert_eq!(path_to_package("."), "");
    }

    #[test]
    fn test_synthesizes_package_chain() -> Result<()> {
        let mut graph = Graph::new("java");
        graph.add_node(class_node("Foo", "Foo", "com/example"))?;

        synthesize_packages(&mut graph)?;

        assert!(graph.contains_node("com"));
        assert!(graph.contains_node("com.example"));
        assert_eq!(graph.node("com.example").map(|n| n.type_name.as_str()), Some("Package"));
        assert_eq!(
            graph.node("com.example").and_then(Node::parent),
            Some("com")
        );
        assert_eq!(graph.node("Foo").and_then(Node::parent), Some("com.example"));
        Ok(())
    }

    #[test]
    fn test_classes_share_package_nodes() -> Result<()> {
        let mut graph = Graph::new("java");
        graph.add_node(class_node("Foo", "Foo", "com/example"))?;
        graph.add_node(class_node("Bar", "Bar", "com/example"))?;

        synthesize_packages(&mut graph)?;

        let package = graph.node("com.example").expect("package node");
        let mut children = package.children().to_vec();
        children.sort_unstable();
        assert_eq!(children, vec!["Bar".to_string(), "Foo".to_string()]);
        Ok(())
    }

    #[test]
    fn test_num_methods_counts_methods_and_constructors() -> Result<()> {
        let mut graph = Graph::new("java");
        graph.add_node(class_node("Foo", "Foo", "com/example"))?;
        graph.add_node(Node::new("Constructor", "Foo.Foo", "Foo"))?;
        graph.add_node(Node::new("Method", "Foo.run", "run"))?;
        graph.add_node(Node::new("Field", "Foo.size", "size"))?;
        graph.reparent("Foo.Foo", Some("Foo"))?;
        graph.reparent("Foo.run", Some("Foo"))?;
        graph.reparent("Foo.size", Some("Foo"))?;

        synthesize_packages(&mut graph)?;

        assert_eq!(
            graph.node("Foo").and_then(|n| n.attributes.int("Num_Methods")),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn test_class_without_path_is_left_alone() -> Result<()> {
        let mut graph = Graph::new("java");
        graph.add_node(Node::new("Class", "Anon", "Anon"))?;

        synthesize_packages(&mut graph)?;
        assert_eq!(graph.node("Anon").and_then(Node::parent), None);
        Ok(())
    }
}
