// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Trellis reifies the cross-references an LSP server exposes for a
//! source tree as a typed hierarchical graph.
//!
//! It drives the server over stdin/stdout, imports document symbols as
//! nodes (directories, files, classes, methods, ...), resolves relation
//! queries (definition, references, calls, type hierarchy) into edges,
//! and serialises the result as GXL for downstream visualisation.

/// Command-line interface utilities for terminal output.
pub mod cli;
/// Configuration overrides for the server registry.
pub mod config;
/// Graph model: nodes, edges, attributes, metrics, GXL output.
pub mod graph;
/// The import pipeline.
pub mod importer;
/// Static interval index mapping ranges to enclosing nodes.
pub mod interval;
/// LSP client, handler, and protocol framing.
pub mod lsp;
/// Per-phase performance records.
pub mod perf;
/// Source range algebra.
pub mod range;
/// The built-in language server table.
pub mod registry;
