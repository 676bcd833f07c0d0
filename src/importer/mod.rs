/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The import pipeline.
//!
//! Drives one LSP server over the project: enumerate files, stream each
//! file's document symbols into graph nodes (serial), index all symbol
//! ranges per file, then fan out relation queries per (file, node) pair
//! (bounded parallel) and resolve the returned locations back to nodes
//! through the interval index. Diagnostics and metrics decorate the
//! graph at the end.

pub mod discovery;
pub mod packages;

use anyhow::{Context, Result, bail};
use lsp_types::{DocumentSymbol, SymbolKind, SymbolTag, Uri};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResolvedServer;
use crate::graph::{Graph, Node, metrics};
use crate::interval::{Entry, RangeIndex};
use crate::lsp::handler::{LspHandler, TargetLocation, path_to_uri, uri_to_path};
use crate::perf::PhaseTimer;
use crate::range::Range;
use crate::registry::{ServerFamily, ServerSpec};

/// Relation queries in flight across all edge-phase tasks. Servers
/// throttle poorly under higher fan-out.
const MAX_INFLIGHT_RELATION_QUERIES: usize = 4;

/// Pull diagnostics stay disabled until server support has been audited;
/// the push path below is the default.
const USE_PULL_DIAGNOSTICS: bool = false;

/// Node kinds that can be enabled for the import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum NodeKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    Struct,
    EnumMember,
    Event,
    Operator,
    TypeParameter,
}

impl NodeKind {
    /// The node type name written to the graph.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::File => "File",
            Self::Module => "Module",
            Self::Namespace => "Namespace",
            Self::Package => "Package",
            Self::Class => "Class",
            Self::Method => "Method",
            Self::Property => "Property",
            Self::Field => "Field",
            Self::Constructor => "Constructor",
            Self::Enum => "Enum",
            Self::Interface => "Interface",
            Self::Function => "Function",
            Self::Variable => "Variable",
            Self::Constant => "Constant",
            Self::Struct => "Struct",
            Self::EnumMember => "EnumMember",
            Self::Event => "Event",
            Self::Operator => "Operator",
            Self::TypeParameter => "TypeParameter",
        }
    }

    /// Maps an LSP symbol kind onto a node kind. Kinds that have no node
    /// representation (strings, numbers, ...) return `None`.
    #[must_use]
    pub fn from_symbol_kind(kind: SymbolKind) -> Option<Self> {
        match kind {
            SymbolKind::FILE => Some(Self::File),
            SymbolKind::MODULE => Some(Self::Module),
            SymbolKind::NAMESPACE => Some(Self::Namespace),
            SymbolKind::PACKAGE => Some(Self::Package),
            SymbolKind::CLASS => Some(Self::Class),
            SymbolKind::METHOD => Some(Self::Method),
            SymbolKind::PROPERTY => Some(Self::Property),
            SymbolKind::FIELD => Some(Self::Field),
            SymbolKind::CONSTRUCTOR => Some(Self::Constructor),
            SymbolKind::ENUM => Some(Self::Enum),
            SymbolKind::INTERFACE => Some(Self::Interface),
            SymbolKind::FUNCTION => Some(Self::Function),
            SymbolKind::VARIABLE => Some(Self::Variable),
            SymbolKind::CONSTANT => Some(Self::Constant),
            SymbolKind::STRUCT => Some(Self::Struct),
            SymbolKind::ENUM_MEMBER => Some(Self::EnumMember),
            SymbolKind::EVENT => Some(Self::Event),
            SymbolKind::OPERATOR => Some(Self::Operator),
            SymbolKind::TYPE_PARAMETER => Some(Self::TypeParameter),
            _ => None,
        }
    }

    /// Every kind, the default when the user enables none explicitly.
    #[must_use]
    pub fn all() -> HashSet<Self> {
        [
            Self::File,
            Self::Module,
            Self::Namespace,
            Self::Package,
            Self::Class,
            Self::Method,
            Self::Property,
            Self::Field,
            Self::Constructor,
            Self::Enum,
            Self::Interface,
            Self::Function,
            Self::Variable,
            Self::Constant,
            Self::Struct,
            Self::EnumMember,
            Self::Event,
            Self::Operator,
            Self::TypeParameter,
        ]
        .into_iter()
        .collect()
    }
}

/// Edge kinds, in the fixed order their queries are issued per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum EdgeKind {
    Definition,
    Declaration,
    TypeDefinition,
    Implementation,
    Reference,
    Call,
    Extend,
}

impl EdgeKind {
    /// Query order per node.
    pub const TABLE: [Self; 7] = [
        Self::Definition,
        Self::Declaration,
        Self::TypeDefinition,
        Self::Implementation,
        Self::Reference,
        Self::Call,
        Self::Extend,
    ];

    /// The edge type name written to the graph.
    #[must_use]
    pub const fn edge_type(self) -> &'static str {
        match self {
            Self::Definition => "Definition",
            Self::Declaration => "Declaration",
            Self::TypeDefinition => "Of_Type",
            Self::Implementation => "Implementation_Of",
            Self::Reference => "Reference",
            Self::Call => "Call",
            Self::Extend => "Extend",
        }
    }

    /// True for kinds whose edges point from the resolved target back to
    /// the queried node.
    #[must_use]
    pub const fn reversed(self) -> bool {
        matches!(self, Self::Implementation | Self::Reference)
    }

    fn supported_by(self, handler: &LspHandler) -> bool {
        match self {
            Self::Definition => handler.supports_definition(),
            Self::Declaration => handler.supports_declaration(),
            Self::TypeDefinition => handler.supports_type_definition(),
            Self::Implementation => handler.supports_implementation(),
            Self::Reference => handler.supports_references(),
            Self::Call => handler.supports_call_hierarchy(),
            Self::Extend => handler.supports_type_hierarchy(),
        }
    }
}

/// Diagnostic severities that can be counted onto nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SeverityKind {
    Error,
    Warning,
    Information,
    Hint,
}

impl SeverityKind {
    /// The counter attribute incremented on affected nodes.
    #[must_use]
    pub const fn attribute(self) -> &'static str {
        match self {
            Self::Error => "Metrics.LSP_Error",
            Self::Warning => "Metrics.LSP_Warning",
            Self::Information => "Metrics.LSP_Information",
            Self::Hint => "Metrics.LSP_Hint",
        }
    }

    /// All severity counter attributes, for aggregation.
    pub const ATTRIBUTES: [&'static str; 4] = [
        "Metrics.LSP_Error",
        "Metrics.LSP_Warning",
        "Metrics.LSP_Information",
        "Metrics.LSP_Hint",
    ];

    fn from_lsp(severity: Option<lsp_types::DiagnosticSeverity>) -> Self {
        match severity {
            Some(lsp_types::DiagnosticSeverity::WARNING) => Self::Warning,
            Some(lsp_types::DiagnosticSeverity::INFORMATION) => Self::Information,
            Some(lsp_types::DiagnosticSeverity::HINT) => Self::Hint,
            // Missing severity is treated as an error, per the protocol.
            _ => Self::Error,
        }
    }
}

/// Everything one import run needs to know.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Project root; node ids are relative to it.
    pub project_root: PathBuf,
    /// Registry entry of the chosen server.
    pub server: &'static ServerSpec,
    /// Effective server invocation after configuration overrides.
    pub resolved: ResolvedServer,
    /// Include roots; the project root when empty.
    pub include_dirs: Vec<PathBuf>,
    /// Exclude prefixes / `$`-terminated regexes.
    pub exclude_dirs: Vec<String>,
    /// Uniform LSP request timeout.
    pub timeout: Duration,
    /// Node kinds to materialise.
    pub node_kinds: HashSet<NodeKind>,
    /// Edge kinds to query.
    pub edge_kinds: HashSet<EdgeKind>,
    /// Diagnostic severities to count.
    pub severities: HashSet<SeverityKind>,
    /// Drop edges whose source and target coincide.
    pub avoid_self_references: bool,
    /// Drop edges pointing at the source's parent.
    pub avoid_parent_references: bool,
    /// Edge-phase task pool size; system-chosen when `None`.
    pub jobs: Option<usize>,
    /// Use the interval tree (true) or the linear scan (false).
    pub optimized_lookup: bool,
    /// Capture the LSP byte streams to temp files.
    pub log_wire: bool,
}

/// A symbol node remembered for the edge phase.
#[derive(Debug, Clone)]
struct SymbolRecord {
    node_id: String,
    file: PathBuf,
    line: u32,
    character: u32,
}

/// Output of the serial node phase.
struct NodePhase {
    graph: Graph,
    records: Vec<SymbolRecord>,
    range_entries: HashMap<PathBuf, Vec<Entry>>,
}

/// Shared state of the parallel edge phase.
struct EdgeContext {
    handler: Arc<LspHandler>,
    graph: Mutex<Graph>,
    indexes: HashMap<PathBuf, RangeIndex>,
    relation_permits: Semaphore,
    open_documents: Mutex<HashSet<PathBuf>>,
    project_root: PathBuf,
    edge_kinds: Vec<EdgeKind>,
    avoid_self_references: bool,
    avoid_parent_references: bool,
    edges_added: AtomicUsize,
    cancel: CancellationToken,
}

/// Drives the import pipeline for one project and server.
pub struct Importer {
    config: ImportConfig,
    cancel: CancellationToken,
}

impl Importer {
    /// Creates an importer. The cancellation token is checked at every
    /// loop head; cancelling it aborts the run cooperatively.
    #[must_use]
    pub fn new(config: ImportConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Runs the full pipeline and returns the finished graph.
    ///
    /// # Errors
    ///
    /// Returns an error on setup failures (no files, server spawn or
    /// handshake), a flat `documentSymbol` reply, or cancellation.
    /// Per-node edge-phase failures are logged and absorbed.
    pub async fn run(&self, timer: &mut PhaseTimer) -> Result<Graph> {
        let phase = timer.start("discovery");
        let files = discovery::discover_files(
            &self.config.project_root,
            &self.config.include_dirs,
            &self.config.exclude_dirs,
            self.config.server,
        )?;
        timer.finish(phase);
        info!("importing {} files", files.len());

        let phase = timer.start("startup");
        let handler = Arc::new(
            LspHandler::start(
                self.config.server,
                &self.config.resolved,
                &self.config.project_root,
                self.config.timeout,
                self.config.log_wire,
            )
            .await?,
        );
        timer.finish(phase);

        let result = self.import(&handler, files, timer).await;

        match Arc::try_unwrap(handler) {
            Ok(handler) => handler.stop().await,
            Err(_) => warn!("handler still referenced at shutdown; skipping stop"),
        }

        result
    }

    async fn import(
        &self,
        handler: &Arc<LspHandler>,
        files: Vec<PathBuf>,
        timer: &mut PhaseTimer,
    ) -> Result<Graph> {
        let phase = timer.start("nodes");
        let mut node_phase = self.node_phase(handler, &files).await?;
        timer.finish(phase);
        info!("created {} nodes", node_phase.graph.node_count());

        if self.config.server.family == ServerFamily::Java {
            let phase = timer.start("packages");
            packages::synthesize_packages(&mut node_phase.graph)?;
            timer.finish(phase);
        }

        let phase = timer.start("index");
        let indexes: HashMap<PathBuf, RangeIndex> = node_phase
            .range_entries
            .into_iter()
            .map(|(file, entries)| {
                (file, RangeIndex::new(entries, self.config.optimized_lookup))
            })
            .collect();
        timer.finish(phase);

        let phase = timer.start("edges");
        let context = Arc::new(EdgeContext {
            handler: handler.clone(),
            graph: Mutex::new(node_phase.graph),
            indexes,
            relation_permits: Semaphore::new(MAX_INFLIGHT_RELATION_QUERIES),
            open_documents: Mutex::new(HashSet::new()),
            project_root: self.config.project_root.clone(),
            edge_kinds: EdgeKind::TABLE
                .into_iter()
                .filter(|k| self.config.edge_kinds.contains(k))
                .filter(|k| k.supported_by(handler))
                .collect(),
            avoid_self_references: self.config.avoid_self_references,
            avoid_parent_references: self.config.avoid_parent_references,
            edges_added: AtomicUsize::new(0),
            cancel: self.cancel.clone(),
        });
        self.edge_phase(&context, node_phase.records).await?;
        timer.finish(phase);
        info!("added {} edges", context.edges_added.load(Ordering::Relaxed));

        let phase = timer.start("diagnostics");
        self.diagnostics_phase(handler, &context).await?;
        timer.finish(phase);

        let context = Arc::try_unwrap(context)
            .map_err(|_| anyhow::anyhow!("edge phase tasks still running"))?;
        let mut graph = context.graph.into_inner();

        let phase = timer.start("aggregation");
        metrics::aggregate(&mut graph, &["Metric.Lines.LOC"], false, true);
        metrics::aggregate(&mut graph, &SeverityKind::ATTRIBUTES, true, true);
        timer.finish(phase);

        graph.base_path = self.config.project_root.clone();
        graph.finalize_hierarchy();
        Ok(graph)
    }

    /// Serial node phase: one file at a time, documents opened and closed
    /// in balanced pairs.
    async fn node_phase(&self, handler: &LspHandler, files: &[PathBuf]) -> Result<NodePhase> {
        let name = self
            .config
            .project_root
            .file_name()
            .map_or_else(|| "project".to_string(), |n| n.to_string_lossy().into_owned());

        let mut state = NodePhaseState {
            graph: Graph::new(&name),
            records: Vec::new(),
            range_entries: HashMap::new(),
            directory_nodes: HashMap::new(),
            isomorphism_index: HashMap::new(),
            next_seq: 0,
        };

        for file in files {
            if self.cancel.is_cancelled() {
                bail!("operation cancelled");
            }

            handler.open_document(file).await?;
            let result = self.import_file(handler, file, &mut state).await;
            if let Err(e) = handler.close_document(file).await {
                debug!("didClose for {} failed: {e:#}", file.display());
            }
            result?;
        }

        Ok(NodePhase {
            graph: state.graph,
            records: state.records,
            range_entries: state.range_entries,
        })
    }

    async fn import_file(
        &self,
        handler: &LspHandler,
        file: &Path,
        state: &mut NodePhaseState,
    ) -> Result<()> {
        let relative = file
            .strip_prefix(&self.config.project_root)
            .unwrap_or(file)
            .to_path_buf();
        let directory_id = ensure_directory_nodes(&mut state.graph, &mut state.directory_nodes, &relative)?;

        let file_node_id = if self.config.node_kinds.contains(&NodeKind::File) {
            Some(self.add_file_node(file, &relative, directory_id.as_deref(), state).await?)
        } else {
            None
        };

        if !handler.supports_document_symbols() {
            return Ok(());
        }
        let symbols = handler.document_symbols(file).await?;

        let (parent_id, prefix) = match &file_node_id {
            Some(id) => {
                let stem = state.graph.node(id).map(|n| n.source_name.clone());
                (Some(id.clone()), stem)
            }
            None => (directory_id, None),
        };
        for symbol in symbols {
            if self.cancel.is_cancelled() {
                bail!("operation cancelled");
            }
            self.import_symbol(handler, file, &relative, &symbol, parent_id.as_deref(), prefix.as_deref(), state)
                .await?;
        }
        Ok(())
    }

    async fn add_file_node(
        &self,
        file: &Path,
        relative: &Path,
        directory_id: Option<&str>,
        state: &mut NodePhaseState,
    ) -> Result<String> {
        let id = relative.to_string_lossy().replace('\\', "/");
        let stem = file
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        let file_name = file
            .file_name()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        let directory = relative.parent().unwrap_or_else(|| Path::new(""));

        let mut node = Node::new("File", &id, &stem);
        node.attributes.set_string("Source.File", &file_name);
        node.attributes
            .set_string("Source.Path", directory.to_string_lossy());
        let line_count = tokio::fs::read_to_string(file)
            .await
            .map(|text| text.lines().count())
            .unwrap_or(0);
        node.attributes
            .set_int("Metric.Lines.LOC", i64::try_from(line_count).unwrap_or(0));

        state.graph.add_node(node)?;
        state.graph.reparent(&id, directory_id)?;
        Ok(id)
    }

    /// Materialises one document symbol (and its children) as nodes.
    #[allow(clippy::too_many_arguments, reason = "Recursion threads the naming context")]
    async fn import_symbol(
        &self,
        handler: &LspHandler,
        file: &Path,
        relative: &Path,
        symbol: &DocumentSymbol,
        parent_id: Option<&str>,
        prefix: Option<&str>,
        state: &mut NodePhaseState,
    ) -> Result<()> {
        let kind = NodeKind::from_symbol_kind(symbol.kind);
        let enabled = kind.is_some_and(|k| self.config.node_kinds.contains(&k));

        let (next_parent, next_prefix) = if enabled {
            let node_id = self
                .materialise_symbol(handler, file, relative, symbol, parent_id, prefix, state)
                .await?;
            (Some(node_id), Some(symbol.name.clone()))
        } else {
            // Children of a skipped symbol attach to the nearest enabled
            // ancestor under the unchanged name prefix.
            (parent_id.map(ToString::to_string), prefix.map(ToString::to_string))
        };

        if let Some(children) = &symbol.children {
            for child in children {
                Box::pin(self.import_symbol(
                    handler,
                    file,
                    relative,
                    child,
                    next_parent.as_deref(),
                    next_prefix.as_deref(),
                    state,
                ))
                .await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments, reason = "Naming context travels with the symbol")]
    async fn materialise_symbol(
        &self,
        handler: &LspHandler,
        file: &Path,
        relative: &Path,
        symbol: &DocumentSymbol,
        parent_id: Option<&str>,
        prefix: Option<&str>,
        state: &mut NodePhaseState,
    ) -> Result<String> {
        let type_name = NodeKind::from_symbol_kind(symbol.kind)
            .map_or("UNKNOWNTYPE", NodeKind::type_name);
        let proposed_id = prefix.map_or_else(
            || symbol.name.clone(),
            |p| format!("{p}.{}", symbol.name),
        );

        let selection = symbol.selection_range;
        let mut node = Node::new(type_name, &proposed_id, &symbol.name);
        node.attributes.set_range("SourceRange", &Range::from(symbol.range));
        node.attributes
            .set_range("SelectionRange", &Range::from(selection));
        node.set_location(
            &file.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
            relative.parent().unwrap_or_else(|| Path::new("")),
            selection.start.line + 1,
            selection.start.character + 1,
        );
        node.attributes.set_int(
            "Metric.Lines.LOC",
            i64::from(symbol.range.end.line - symbol.range.start.line),
        );
        if is_deprecated(symbol) {
            node.attributes.set_toggle("Deprecated");
        }
        if handler.supports_hover()
            && let Some(text) = handler
                .hover(file, selection.start.line, selection.start.character)
                .await
        {
            node.attributes.set_string("HoverText", text);
        }

        // Reuse a node with identical attributes instead of duplicating it.
        let hash = node.attributes.content_hash();
        if let Some(existing) = state
            .isomorphism_index
            .get(&hash)
            .into_iter()
            .flatten()
            .find(|id| state.graph.node(id).is_some_and(|n| n.is_isomorphic(&node)))
        {
            debug!("reusing isomorphic node {}", existing);
            let existing = existing.clone();
            state.graph.reparent(&existing, parent_id)?;
            return Ok(existing);
        }

        let id = if state.graph.contains_node(&proposed_id) {
            let unique = format!("{proposed_id}#{}", uuid::Uuid::new_v4());
            debug!("id collision on {}; using {}", proposed_id, unique);
            let mut renamed = Node::new(type_name, &unique, &symbol.name);
            renamed.attributes = node.attributes.clone();
            renamed.attributes.set_string("Linkage.Name", &unique);
            state.graph.add_node(renamed)?;
            unique
        } else {
            state.graph.add_node(node)?;
            proposed_id
        };

        state.graph.reparent(&id, parent_id)?;
        state
            .isomorphism_index
            .entry(hash)
            .or_default()
            .push(id.clone());

        state.range_entries.entry(file.to_path_buf()).or_default().push(Entry {
            range: Range::from(symbol.range),
            seq: state.next_seq,
            node_id: id.clone(),
        });
        state.next_seq += 1;

        state.records.push(SymbolRecord {
            node_id: id.clone(),
            file: file.to_path_buf(),
            line: selection.start.line,
            character: selection.start.character,
        });

        Ok(id)
    }

    /// Parallel edge phase over all (file, node) pairs.
    async fn edge_phase(
        &self,
        context: &Arc<EdgeContext>,
        records: Vec<SymbolRecord>,
    ) -> Result<()> {
        if context.edge_kinds.is_empty() {
            debug!("no enabled edge kinds are supported by the server");
            return Ok(());
        }

        let jobs = self.config.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        });
        let pool = Arc::new(Semaphore::new(jobs.max(1)));

        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            if self.cancel.is_cancelled() {
                bail!("operation cancelled");
            }
            let permit = pool
                .clone()
                .acquire_owned()
                .await
                .context("edge-phase task pool closed")?;
            let context = context.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if context.cancel.is_cancelled() {
                    return;
                }
                // One bad node must not abort the import.
                if let Err(e) = relation_queries(&context, &record).await {
                    warn!("edge queries for {} failed: {e:#}", record.node_id);
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        // Balance the didOpen calls issued on demand during this phase.
        let opened: Vec<PathBuf> = context.open_documents.lock().await.drain().collect();
        for path in opened {
            if let Err(e) = context.handler.close_document(&path).await {
                debug!("didClose for {} failed: {e:#}", path.display());
            }
        }
        Ok(())
    }

    /// Diagnostics phase: drain what the server pushed, map each
    /// diagnostic back to the tightest enclosing nodes, and count it.
    async fn diagnostics_phase(
        &self,
        handler: &Arc<LspHandler>,
        context: &Arc<EdgeContext>,
    ) -> Result<()> {
        if self.config.severities.is_empty() {
            return Ok(());
        }

        let batches = if USE_PULL_DIAGNOSTICS && handler.supports_pull_diagnostics() {
            let mut batches = Vec::new();
            for file in context.indexes.keys() {
                if self.cancel.is_cancelled() {
                    bail!("operation cancelled");
                }
                let diagnostics = handler.pull_diagnostics(file).await;
                if !diagnostics.is_empty() {
                    batches.push((path_to_uri(file)?, diagnostics));
                }
            }
            batches
        } else {
            // Give slow servers one timeout window to publish, then take
            // whatever arrived.
            tokio::time::sleep(handler.timeout()).await;
            handler
                .drain_pushed_diagnostics()
                .into_iter()
                .map(|batch| (batch.uri, batch.diagnostics))
                .collect()
        };

        let mut graph = context.graph.lock().await;
        for (uri, diagnostics) in batches {
            if self.cancel.is_cancelled() {
                bail!("operation cancelled");
            }
            let Some(path) = uri_to_path(&uri) else { continue };
            let Some(index) = context.indexes.get(&path) else { continue };

            for diagnostic in diagnostics {
                let severity = SeverityKind::from_lsp(diagnostic.severity);
                if !self.config.severities.contains(&severity) {
                    continue;
                }
                let range = Range::from(diagnostic.range);
                for entry in index.tightest_containing(&range) {
                    if let Some(node) = graph.node_mut(&entry.node_id) {
                        node.attributes.increment_int(severity.attribute(), 1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Mutable state threaded through the node phase.
struct NodePhaseState {
    graph: Graph,
    records: Vec<SymbolRecord>,
    range_entries: HashMap<PathBuf, Vec<Entry>>,
    directory_nodes: HashMap<PathBuf, String>,
    isomorphism_index: HashMap<u64, Vec<String>>,
    next_seq: u32,
}

/// Creates the chain of directory nodes for a project-relative file path
/// and returns the id of the innermost directory.
fn ensure_directory_nodes(
    graph: &mut Graph,
    cache: &mut HashMap<PathBuf, String>,
    relative_file: &Path,
) -> Result<Option<String>> {
    let Some(directory) = relative_file.parent() else {
        return Ok(None);
    };
    if directory.as_os_str().is_empty() {
        return Ok(None);
    }
    if let Some(id) = cache.get(directory) {
        return Ok(Some(id.clone()));
    }

    let mut parent_id: Option<String> = None;
    let mut partial = PathBuf::new();
    for component in directory.components() {
        partial.push(component);
        let id = match cache.get(&partial) {
            Some(id) => id.clone(),
            None => {
                let id = format!("{}/", partial.to_string_lossy().replace('\\', "/"));
                let name = component.as_os_str().to_string_lossy();
                let mut node = Node::new("Directory", &id, &name);
                node.attributes
                    .set_string("Source.Path", partial.to_string_lossy());
                graph.add_node(node)?;
                graph.reparent(&id, parent_id.as_deref())?;
                cache.insert(partial.clone(), id.clone());
                id
            }
        };
        parent_id = Some(id);
    }
    Ok(parent_id)
}

/// Issues every enabled relation query for one node and inserts the
/// resulting edges.
async fn relation_queries(context: &EdgeContext, record: &SymbolRecord) -> Result<()> {
    ensure_open(context, &record.file).await?;

    for kind in &context.edge_kinds {
        if context.cancel.is_cancelled() {
            return Ok(());
        }
        let targets = {
            let _permit = context
                .relation_permits
                .acquire()
                .await
                .context("relation semaphore closed")?;
            query_targets(&context.handler, *kind, record).await
        };

        for (uri, range) in targets {
            let Some(path) = uri_to_path(&uri) else { continue };
            // References outside the project root are not resolved.
            if !path.starts_with(&context.project_root) {
                continue;
            }
            let Some(target_id) = context
                .indexes
                .get(&path)
                .and_then(|index| index.resolve(&Range::from(range)))
                .map(|entry| entry.node_id.clone())
            else {
                continue;
            };

            insert_edge(context, *kind, &record.node_id, &target_id).await;
        }
    }
    Ok(())
}

/// Runs one relation query and returns the resolution targets as
/// `(uri, range)` pairs, where the range is the narrowest the server
/// reported for the target.
async fn query_targets(
    handler: &LspHandler,
    kind: EdgeKind,
    record: &SymbolRecord,
) -> Vec<(Uri, lsp_types::Range)> {
    let (file, line, character) = (&record.file, record.line, record.character);

    let from_locations = |locations: Vec<TargetLocation>| {
        locations
            .into_iter()
            .map(|l| {
                let range = l.selection_range.unwrap_or(l.range);
                (l.uri, range)
            })
            .collect::<Vec<_>>()
    };

    match kind {
        EdgeKind::Definition => from_locations(handler.definition(file, line, character).await),
        EdgeKind::Declaration => from_locations(handler.declaration(file, line, character).await),
        EdgeKind::TypeDefinition => {
            from_locations(handler.type_definition(file, line, character).await)
        }
        EdgeKind::Implementation => {
            from_locations(handler.implementation(file, line, character).await)
        }
        EdgeKind::Reference => from_locations(handler.references(file, line, character).await),
        EdgeKind::Call => handler
            .outgoing_calls(file, line, character)
            .await
            .into_iter()
            .map(|item| (item.uri, item.selection_range))
            .collect(),
        EdgeKind::Extend => handler
            .supertypes(file, line, character)
            .await
            .into_iter()
            .map(|item| (item.uri, item.selection_range))
            .collect(),
    }
}

/// Applies the edge filter rules, then inserts.
///
/// Order matters: self and parent checks run against the raw
/// (queried, resolved) direction, the reversal swap comes after them,
/// and the duplicate check is the generated-id lookup in the graph.
async fn insert_edge(context: &EdgeContext, kind: EdgeKind, source: &str, target: &str) {
    if context.avoid_self_references && source == target {
        return;
    }

    let mut graph = context.graph.lock().await;
    if context.avoid_parent_references
        && graph.node(source).and_then(Node::parent) == Some(target)
    {
        return;
    }

    let (source, target) = if kind.reversed() {
        (target, source)
    } else {
        (source, target)
    };

    match graph.add_edge(kind.edge_type(), source, target) {
        Ok(true) => {
            context.edges_added.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {}
        Err(e) => warn!("edge insertion failed: {e:#}"),
    }
}

/// Opens a document for the edge phase exactly once.
async fn ensure_open(context: &EdgeContext, file: &Path) -> Result<()> {
    let mut open = context.open_documents.lock().await;
    if open.insert(file.to_path_buf()) {
        context.handler.open_document(file).await?;
    }
    Ok(())
}

fn is_deprecated(symbol: &DocumentSymbol) -> bool {
    #[allow(deprecated, reason = "Older servers still use the deprecated field")]
    let legacy = symbol.deprecated == Some(true);
    legacy
        || symbol
            .tags
            .as_ref()
            .is_some_and(|tags| tags.contains(&SymbolTag::DEPRECATED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_kind_table_order_and_direction() {
        let types: Vec<&str> = EdgeKind::TABLE.iter().map(|k| k.edge_type()).collect();
        assert_eq!(
            types,
            vec![
                "Definition",
                "Declaration",
                "Of_Type",
                "Implementation_Of",
                "Reference",
                "Call",
                "Extend"
            ]
        );

        assert!(EdgeKind::Implementation.reversed());
        assert!(EdgeKind::Reference.reversed());
        for kind in [
            EdgeKind::Definition,
            EdgeKind::Declaration,
            EdgeKind::TypeDefinition,
            EdgeKind::Call,
            EdgeKind::Extend,
        ] {
            assert!(!kind.reversed(), "{kind:?} must not reverse");
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(SeverityKind::from_lsp(None), SeverityKind::Error);
        assert_eq!(
            SeverityKind::from_lsp(Some(lsp_types::DiagnosticSeverity::WARNING)),
            SeverityKind::Warning
        );
        assert_eq!(SeverityKind::Error.attribute(), "Metrics.LSP_Error");
        assert_eq!(SeverityKind::Hint.attribute(), "Metrics.LSP_Hint");
    }

    #[test]
    fn test_symbol_kind_mapping() {
        assert_eq!(
            NodeKind::from_symbol_kind(SymbolKind::FUNCTION),
            Some(NodeKind::Function)
        );
        assert_eq!(
            NodeKind::from_symbol_kind(SymbolKind::STRING),
            None,
            "literal kinds have no node representation"
        );
    }

    #[test]
    fn test_directory_chain_creation() -> Result<()> {
        let mut graph = Graph::new("dirs");
        let mut cache = HashMap::new();

        let id = ensure_directory_nodes(&mut graph, &mut cache, Path::new("src/sub/mod.rs"))?;
        assert_eq!(id.as_deref(), Some("src/sub/"));
        assert!(graph.contains_node("src/"));
        assert!(graph.contains_node("src/sub/"));
        assert_eq!(graph.node("src/sub/").and_then(Node::parent), Some("src/"));

        // Cached on second call; no duplicates.
        let again = ensure_directory_nodes(&mut graph, &mut cache, Path::new("src/sub/other.rs"))?;
        assert_eq!(again.as_deref(), Some("src/sub/"));
        assert_eq!(graph.node_count(), 2);

        // A file at the project root has no directory chain.
        let none = ensure_directory_nodes(&mut graph, &mut cache, Path::new("build.rs"))?;
        assert_eq!(none, None);
        Ok(())
    }

    #[test]
    fn test_node_kind_defaults_include_file() {
        let all = NodeKind::all();
        assert!(all.contains(&NodeKind::File));
        assert!(all.contains(&NodeKind::Function));
        assert!(all.contains(&NodeKind::TypeParameter));
    }
}
