// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! GXL serialisation.
//!
//! Writes a [`Graph`] as GXL 1.0: typed nodes and edges with their
//! attribute stores, and the node hierarchy as additional child-to-parent
//! edges of a dedicated edge type. Elements are emitted in sorted id
//! order so repeated imports of the same project serialise identically.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::{Attributes, Graph};

/// Edge type carrying the node hierarchy in the GXL output.
pub const HIERARCHICAL_EDGE_TYPE: &str = "Belongs_To";

/// Writes the graph as GXL to `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_to_path(graph: &Graph, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write(graph, &mut writer)?;
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Writes the graph as GXL to an arbitrary writer.
///
/// # Errors
///
/// Returns an error on any write failure.
pub fn write<W: Write>(graph: &Graph, out: &mut W) -> Result<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="utf-8"?>"#)?;
    writeln!(out, r#"<gxl xmlns:xlink="http://www.w3.org/1999/xlink">"#)?;
    writeln!(
        out,
        r#"  <graph id="{}" edgeids="true" edgemode="directed" hypergraph="false">"#,
        escape(&graph.name)
    )?;

    let mut node_ids: Vec<&str> = graph.nodes().map(super::Node::id).collect();
    node_ids.sort_unstable();

    // GXL element ids are sequential; the real node id travels in the
    // Linkage.Name attribute.
    let element_ids: HashMap<&str, String> = node_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, format!("N{}", i + 1)))
        .collect();

    for id in &node_ids {
        let Some(node) = graph.node(id) else { continue };
        let element_id = &element_ids[id];
        writeln!(out, r#"    <node id="{element_id}">"#)?;
        writeln!(out, r#"      <type xlink:href="{}"/>"#, escape(&node.type_name))?;
        write_attributes(out, &node.attributes)?;
        writeln!(out, "    </node>")?;
    }

    let mut edge_ids: Vec<&str> = graph.edges().map(super::Edge::id).collect();
    edge_ids.sort_unstable();

    let mut next_edge = 1;
    for id in edge_ids {
        let Some(edge) = graph.edge(id) else { continue };
        let (Some(from), Some(to)) = (
            element_ids.get(edge.source.as_str()),
            element_ids.get(edge.target.as_str()),
        ) else {
            continue;
        };
        writeln!(out, r#"    <edge id="E{next_edge}" from="{from}" to="{to}">"#)?;
        writeln!(out, r#"      <type xlink:href="{}"/>"#, escape(&edge.type_name))?;
        write_attributes(out, &edge.attributes)?;
        writeln!(out, "    </edge>")?;
        next_edge += 1;
    }

    // Hierarchy as child-to-parent edges.
    for id in &node_ids {
        let Some(parent) = graph.node(id).and_then(super::Node::parent) else {
            continue;
        };
        let (Some(from), Some(to)) = (element_ids.get(id), element_ids.get(parent)) else {
            continue;
        };
        writeln!(out, r#"    <edge id="E{next_edge}" from="{from}" to="{to}">"#)?;
        writeln!(out, r#"      <type xlink:href="{HIERARCHICAL_EDGE_TYPE}"/>"#)?;
        writeln!(out, "    </edge>")?;
        next_edge += 1;
    }

    writeln!(out, "  </graph>")?;
    writeln!(out, "</gxl>")?;
    Ok(())
}

fn write_attributes<W: Write>(out: &mut W, attributes: &Attributes) -> Result<()> {
    for name in attributes.toggles() {
        writeln!(out, r#"      <attr name="{}"><enum/></attr>"#, escape(name))?;
    }
    for (name, value) in attributes.strings() {
        writeln!(
            out,
            r#"      <attr name="{}"><string>{}</string></attr>"#,
            escape(name),
            escape(value)
        )?;
    }
    for (name, value) in attributes.ints() {
        writeln!(out, r#"      <attr name="{}"><int>{value}</int></attr>"#, escape(name))?;
    }
    for (name, value) in attributes.floats() {
        writeln!(out, r#"      <attr name="{}"><float>{value}</float></attr>"#, escape(name))?;
    }
    Ok(())
}

/// Escapes XML text and attribute content.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
