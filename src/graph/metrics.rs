// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Hierarchical metric aggregation.
//!
//! Sums a node attribute over the forest: each node's aggregated value is
//! its own value plus the aggregated values of its children. Results are
//! stored either in place or under a `_SUM` suffix so that visualisations
//! can distinguish self from aggregated values.

use std::collections::HashMap;

use super::Graph;

/// Aggregates each named attribute bottom-up over the node hierarchy.
///
/// `with_suffix` stores results at `<name>_SUM` instead of overwriting the
/// attribute in place. `as_int` selects the integer store over the float
/// store for the result.
pub fn aggregate(graph: &mut Graph, names: &[&str], with_suffix: bool, as_int: bool) {
    for name in names {
        aggregate_attribute(graph, name, with_suffix, as_int);
    }
}

fn aggregate_attribute(graph: &mut Graph, name: &str, with_suffix: bool, as_int: bool) {
    let roots: Vec<String> = graph
        .nodes()
        .filter(|n| n.parent().is_none())
        .map(|n| n.id().to_string())
        .collect();

    let mut totals: HashMap<String, f64> = HashMap::new();

    // Post-order walk: push a node twice, compute it once its children are done.
    let mut stack: Vec<(String, bool)> = roots.into_iter().map(|id| (id, false)).collect();
    while let Some((id, expanded)) = stack.pop() {
        let Some(node) = graph.node(&id) else { continue };
        if expanded {
            let own = node.attributes.number(name).unwrap_or(0.0);
            let children_sum: f64 = node
                .children()
                .iter()
                .filter_map(|c| totals.get(c))
                .sum();
            totals.insert(id, own + children_sum);
        } else {
            stack.push((id.clone(), true));
            for child in node.children() {
                stack.push((child.clone(), false));
            }
        }
    }

    let target = if with_suffix {
        format!("{name}_SUM")
    } else {
        name.to_string()
    };
    for (id, total) in totals {
        let Some(node) = graph.node_mut(&id) else { continue };
        if as_int {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Aggregated counters are far below i64 range"
            )]
            node.attributes.set_int(&target, total.round() as i64);
        } else {
            node.attributes.set_float(&target, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use anyhow::Result;

    fn build_tree() -> Result<Graph> {
        // root
        // ├── left   (LOC 3)
        // │   └── leaf (LOC 2)
        // └── right  (LOC 5)
        let mut graph = Graph::new("metrics");
        for id in ["root", "left", "leaf", "right"] {
            graph.add_node(Node::new("Class", id, id))?;
        }
        graph.reparent("left", Some("root"))?;
        graph.reparent("leaf", Some("left"))?;
        graph.reparent("right", Some("root"))?;

        for (id, loc) in [("left", 3), ("leaf", 2), ("right", 5)] {
            if let Some(node) = graph.node_mut(id) {
                node.attributes.set_int("Metric.Lines.LOC", loc);
            }
        }
        Ok(graph)
    }

    #[test]
    fn test_aggregate_in_place() -> Result<()> {
        let mut graph = build_tree()?;
        aggregate(&mut graph, &["Metric.Lines.LOC"], false, true);

        let loc = |id: &str| graph.node(id).and_then(|n| n.attributes.int("Metric.Lines.LOC"));
        assert_eq!(loc("leaf"), Some(2));
        assert_eq!(loc("left"), Some(5));
        assert_eq!(loc("right"), Some(5));
        assert_eq!(loc("root"), Some(10));
        Ok(())
    }

    #[test]
    fn test_aggregate_with_suffix_keeps_self_value() -> Result<()> {
        let mut graph = build_tree()?;
        aggregate(&mut graph, &["Metric.Lines.LOC"], true, true);

        let node = graph.node("left").ok_or_else(|| anyhow::anyhow!("missing node"))?;
        assert_eq!(node.attributes.int("Metric.Lines.LOC"), Some(3));
        assert_eq!(node.attributes.int("Metric.Lines.LOC_SUM"), Some(5));

        let root = graph.node("root").ok_or_else(|| anyhow::anyhow!("missing node"))?;
        assert_eq!(root.attributes.int("Metric.Lines.LOC"), None);
        assert_eq!(root.attributes.int("Metric.Lines.LOC_SUM"), Some(10));
        Ok(())
    }

    #[test]
    fn test_aggregate_float_store() -> Result<()> {
        let mut graph = Graph::new("float");
        graph.add_node(Node::new("Class", "a", "a"))?;
        graph.add_node(Node::new("Class", "b", "b"))?;
        graph.reparent("b", Some("a"))?;
        if let Some(node) = graph.node_mut("b") {
            node.attributes.set_float("Score", 1.5);
        }

        aggregate(&mut graph, &["Score"], true, false);
        assert_eq!(
            graph.node("a").and_then(|n| n.attributes.float("Score_SUM")),
            Some(1.5)
        );
        Ok(())
    }

    #[test]
    fn test_aggregate_invariant_holds_per_node() -> Result<()> {
        let mut graph = build_tree()?;
        aggregate(&mut graph, &["Metric.Lines.LOC"], true, true);

        for node in graph.nodes() {
            let own = node.attributes.int("Metric.Lines.LOC").unwrap_or(0);
            let children: i64 = node
                .children()
                .iter()
                .filter_map(|c| graph.node(c))
                .filter_map(|c| c.attributes.int("Metric.Lines.LOC_SUM"))
                .sum();
            assert_eq!(
                node.attributes.int("Metric.Lines.LOC_SUM"),
                Some(own + children)
            );
        }
        Ok(())
    }
}
