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

//! High-level LSP facade: one method per protocol feature the importer
//! uses, all under the uniform request timeout.
//!
//! Timeouts and recoverable server errors degrade to empty results so a
//! slow or buggy server truncates the import instead of failing it; the
//! only fatal paths are process spawn, the `initialize` handshake, and a
//! server that answers `documentSymbol` with the deprecated flat format.

use anyhow::{Context, Result, anyhow, bail};
use lsp_types::{
    CallHierarchyItem, CallHierarchyOutgoingCall, CallHierarchyOutgoingCallsParams,
    ClientCapabilities, Diagnostic, DiagnosticTag, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentSymbol, DocumentSymbolParams, DocumentSymbolResponse,
    GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverContents, HoverParams, Location,
    MarkedString, MarkupKind, PartialResultParams, Position, PublishDiagnosticsParams,
    ReferenceContext, ReferenceParams, ServerCapabilities, SymbolKind, SymbolTag,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, TypeHierarchyItem,
    Uri, WorkDoneProgressParams,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::client::{LspClient, ProgressTracker, WireLog};
use crate::config::ResolvedServer;
use crate::registry::{ServerFamily, ServerSpec};

/// Quiet period after the last work-done token before the server counts
/// as ready.
const READY_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Poll interval of the readiness probe.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of the handler and its server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// No server process.
    Uninitialised,
    /// Process spawned, handshake or warmup in progress.
    Initialising,
    /// Server answered `initialize` and finished its progress burst.
    Ready,
    /// Shutdown handshake in progress.
    ShuttingDown,
}

/// A resolved target of a goto-style query.
///
/// `LocationLink` replies carry a narrower target selection range; it is
/// stored when available and preferred for target resolution.
#[derive(Debug, Clone)]
pub struct TargetLocation {
    /// Target document.
    pub uri: Uri,
    /// Full target range.
    pub range: lsp_types::Range,
    /// Target selection range from a `LocationLink`, if any.
    pub selection_range: Option<lsp_types::Range>,
}

impl From<Location> for TargetLocation {
    fn from(location: Location) -> Self {
        Self {
            uri: location.uri,
            range: location.range,
            selection_range: None,
        }
    }
}

/// High-level facade over one LSP server process.
pub struct LspHandler {
    client: LspClient,
    spec: &'static ServerSpec,
    capabilities: ServerCapabilities,
    state: Mutex<HandlerState>,
}

impl LspHandler {
    /// Spawns the server, performs the `initialize` handshake, and waits
    /// for the initial work-done progress burst to settle.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or the
    /// handshake fails or times out.
    pub async fn start(
        spec: &'static ServerSpec,
        resolved: &ResolvedServer,
        root: &Path,
        timeout: Duration,
        log_wire: bool,
    ) -> Result<Self> {
        let wire_log = if log_wire {
            let log = WireLog::create()?;
            info!(
                "Capturing LSP traffic to {} and {}",
                log.paths.0.display(),
                log.paths.1.display()
            );
            Some(log)
        } else {
            None
        };

        info!(
            "Spawning {}: {} {}",
            spec.name,
            resolved.command,
            resolved.args.join(" ")
        );
        let client = LspClient::spawn(&resolved.command, &resolved.args, timeout, wire_log)?;

        let handler = Self {
            client,
            spec,
            capabilities: ServerCapabilities::default(),
            state: Mutex::new(HandlerState::Initialising),
        };
        handler.initialize(root, resolved).await
    }

    async fn initialize(mut self, root: &Path, resolved: &ResolvedServer) -> Result<Self> {
        let root_uri = path_to_uri(root)?;

        #[allow(deprecated, reason = "root_uri is the non-folder workspace mechanism")]
        let params = lsp_types::InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri),
            initialization_options: resolved.initialization_options.clone(),
            capabilities: client_capabilities(),
            ..Default::default()
        };

        let result: lsp_types::InitializeResult = self
            .client
            .request("initialize", params)
            .await
            .with_context(|| format!("initialize handshake with {} failed", self.spec.name))?;
        self.capabilities = result.capabilities;

        self.client
            .notify("initialized", lsp_types::InitializedParams {})
            .await?;

        self.await_server_ready().await;
        *self.state.lock().await = HandlerState::Ready;
        debug!("{} is ready", self.spec.name);
        Ok(self)
    }

    /// Waits until all observed work-done tokens have ended and no new
    /// token appeared for [`READY_QUIET_WINDOW`]. Gives up after eight
    /// request timeouts — some servers never announce progress, so this
    /// is not an error.
    async fn await_server_ready(&self) {
        let started = Instant::now();
        let give_up = self.client.timeout() * 8;

        loop {
            let quiet = self
                .client
                .with_progress(|p| p.is_quiescent(READY_QUIET_WINDOW))
                .unwrap_or(true);
            if quiet && started.elapsed() >= READY_QUIET_WINDOW {
                let announced = self
                    .client
                    .with_progress(ProgressTracker::observed_any)
                    .unwrap_or(false);
                if announced {
                    debug!("{}: work-done progress settled", self.spec.name);
                } else {
                    debug!("{}: server never announced progress", self.spec.name);
                }
                return;
            }
            if started.elapsed() >= give_up {
                debug!("{}: proceeding without progress quiescence", self.spec.name);
                return;
            }
            if !self.client.is_alive() {
                return;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// The registry entry of the running server.
    #[must_use]
    pub const fn spec(&self) -> &'static ServerSpec {
        self.spec
    }

    /// The capabilities the server advertised at `initialize`.
    #[must_use]
    pub const fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// The uniform request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.client.timeout()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> HandlerState {
        *self.state.lock().await
    }

    /// Opens a document on the server (fire-and-forget).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the notification
    /// cannot be sent.
    pub async fn open_document(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let language_id = self.spec.language_id(extension).unwrap_or("plaintext");

        self.client
            .notify(
                "textDocument/didOpen",
                DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: path_to_uri(path)?,
                        language_id: language_id.to_string(),
                        version: 1,
                        text,
                    },
                },
            )
            .await
    }

    /// Closes a document on the server (fire-and-forget).
    pub async fn close_document(&self, path: &Path) -> Result<()> {
        self.client
            .notify(
                "textDocument/didClose",
                DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier {
                        uri: path_to_uri(path)?,
                    },
                },
            )
            .await
    }

    /// Hierarchical document symbols for a file.
    ///
    /// # Errors
    ///
    /// Fails when the server answers with the deprecated flat
    /// `SymbolInformation` list — those entries have no hierarchy or
    /// selection ranges and cannot feed the import.
    pub async fn document_symbols(&self, path: &Path) -> Result<Vec<DocumentSymbol>> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier {
                uri: path_to_uri(path)?,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };

        let response: Option<DocumentSymbolResponse> =
            match self.client.request("textDocument/documentSymbol", params).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("documentSymbol for {} failed: {e:#}", path.display());
                    return Ok(Vec::new());
                }
            };

        match response {
            Some(DocumentSymbolResponse::Nested(symbols)) => Ok(symbols),
            Some(DocumentSymbolResponse::Flat(flat)) if !flat.is_empty() => bail!(
                "{} returned flat SymbolInformation for {}; hierarchical document \
                 symbols are required — use a server that supports them",
                self.spec.name,
                path.display()
            ),
            _ => Ok(Vec::new()),
        }
    }

    /// Hover text at a position, flattened to a plain string.
    pub async fn hover(&self, path: &Path, line: u32, character: u32) -> Option<String> {
        let params = HoverParams {
            text_document_position_params: self.position_params(path, line, character).ok()?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };

        match self.client.request::<_, Option<Hover>>("textDocument/hover", params).await {
            Ok(hover) => hover.map(|h| hover_to_text(&h.contents)),
            Err(e) => {
                let message = format!("{e:#}");
                // gopls reports files outside the module graph this way.
                if self.spec.family == ServerFamily::Go
                    && message.contains("no package metadata for file")
                {
                    trace!("Suppressed gopls hover error for {}", path.display());
                } else {
                    debug!("hover for {} failed: {}", path.display(), message);
                }
                None
            }
        }
    }

    /// `textDocument/definition`.
    pub async fn definition(&self, path: &Path, line: u32, character: u32) -> Vec<TargetLocation> {
        self.goto_query("textDocument/definition", path, line, character)
            .await
    }

    /// `textDocument/declaration`.
    pub async fn declaration(&self, path: &Path, line: u32, character: u32) -> Vec<TargetLocation> {
        self.goto_query("textDocument/declaration", path, line, character)
            .await
    }

    /// `textDocument/typeDefinition`.
    pub async fn type_definition(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<TargetLocation> {
        self.goto_query("textDocument/typeDefinition", path, line, character)
            .await
    }

    /// `textDocument/implementation`.
    pub async fn implementation(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<TargetLocation> {
        self.goto_query("textDocument/implementation", path, line, character)
            .await
    }

    /// Shared adaptor for the goto-style queries: all four accept the
    /// same position parameters and answer with a `Location`, an array
    /// of them, or `LocationLink`s.
    async fn goto_query(
        &self,
        method: &str,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<TargetLocation> {
        let Ok(position) = self.position_params(path, line, character) else {
            return Vec::new();
        };
        let params = GotoDefinitionParams {
            text_document_position_params: position,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };

        match self
            .client
            .request::<_, Option<GotoDefinitionResponse>>(method, params)
            .await
        {
            Ok(Some(GotoDefinitionResponse::Scalar(location))) => {
                vec![TargetLocation::from(location)]
            }
            Ok(Some(GotoDefinitionResponse::Array(locations))) => {
                locations.into_iter().map(TargetLocation::from).collect()
            }
            Ok(Some(GotoDefinitionResponse::Link(links))) => links
                .into_iter()
                .map(|link| TargetLocation {
                    uri: link.target_uri,
                    range: link.target_range,
                    selection_range: Some(link.target_selection_range),
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!("{method} at {}:{line}:{character} failed: {e:#}", path.display());
                Vec::new()
            }
        }
    }

    /// `textDocument/references` without the declaration itself.
    pub async fn references(&self, path: &Path, line: u32, character: u32) -> Vec<TargetLocation> {
        let Ok(position) = self.position_params(path, line, character) else {
            return Vec::new();
        };
        let params = ReferenceParams {
            text_document_position: position,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: false,
            },
        };

        match self
            .client
            .request::<_, Option<Vec<Location>>>("textDocument/references", params)
            .await
        {
            Ok(locations) => locations
                .unwrap_or_default()
                .into_iter()
                .map(TargetLocation::from)
                .collect(),
            Err(e) => {
                debug!("references at {}:{line}:{character} failed: {e:#}", path.display());
                Vec::new()
            }
        }
    }

    /// Callees of the symbol at a position, via `callHierarchy/prepare`
    /// and `callHierarchy/outgoingCalls`.
    pub async fn outgoing_calls(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<CallHierarchyItem> {
        let items = self
            .prepare_hierarchy("textDocument/prepareCallHierarchy", path, line, character)
            .await;
        let items = filter_items_at(items, line, character);

        let mut callees = Vec::new();
        for item in items {
            let params = CallHierarchyOutgoingCallsParams {
                item,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            };
            match self
                .client
                .request::<_, Option<Vec<CallHierarchyOutgoingCall>>>(
                    "callHierarchy/outgoingCalls",
                    params,
                )
                .await
            {
                Ok(calls) => callees.extend(calls.unwrap_or_default().into_iter().map(|c| c.to)),
                Err(e) => {
                    debug!("outgoingCalls at {}:{line} failed: {e:#}", path.display());
                }
            }
        }
        callees
    }

    /// Supertypes of the symbol at a position, via
    /// `typeHierarchy/prepare` and `typeHierarchy/supertypes`.
    pub async fn supertypes(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<TypeHierarchyItem> {
        let items: Vec<TypeHierarchyItem> = self
            .prepare_hierarchy("textDocument/prepareTypeHierarchy", path, line, character)
            .await;
        let items = filter_items_at(items, line, character);

        let mut supertypes = Vec::new();
        for item in items {
            match self
                .client
                .request_raw("typeHierarchy/supertypes", json!({ "item": item }))
                .await
            {
                Ok(value) => {
                    let parents: Vec<TypeHierarchyItem> =
                        serde_json::from_value(value).unwrap_or_default();
                    supertypes.extend(parents);
                }
                Err(e) => {
                    debug!("supertypes at {}:{line} failed: {e:#}", path.display());
                }
            }
        }
        supertypes
    }

    /// Sends a hierarchy prepare request with hand-shaped params.
    ///
    /// Shaped manually instead of through the typed prepare params:
    /// some servers reject the extra work-done fields the typed wrapper
    /// serialises into the request.
    async fn prepare_hierarchy<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Vec<T> {
        let Ok(uri) = path_to_uri(path) else {
            return Vec::new();
        };
        let params = json!({
            "textDocument": { "uri": uri },
            "position": { "line": line, "character": character }
        });

        match self.client.request_raw(method, params).await {
            Ok(serde_json::Value::Null) => Vec::new(),
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                // Prepare failures are worth a warning: with no prepared
                // item the whole hierarchy query chain yields nothing.
                warn!("{method} at {}:{line}:{character} failed: {e:#}", path.display());
                Vec::new()
            }
        }
    }

    /// Per-file pull diagnostics (`textDocument/diagnostic`).
    pub async fn pull_diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        let Ok(uri) = path_to_uri(path) else {
            return Vec::new();
        };
        let params = json!({ "textDocument": { "uri": uri } });

        match self.client.request_raw("textDocument/diagnostic", params).await {
            Ok(value) => value
                .get("items")
                .cloned()
                .and_then(|items| serde_json::from_value(items).ok())
                .unwrap_or_default(),
            Err(e) => {
                debug!("pull diagnostics for {} failed: {e:#}", path.display());
                Vec::new()
            }
        }
    }

    /// Drains all diagnostics the server pushed since the last drain.
    #[must_use]
    pub fn drain_pushed_diagnostics(&self) -> Vec<PublishDiagnosticsParams> {
        self.client.drain_pushed_diagnostics()
    }

    /// True if the server advertises hover support.
    #[must_use]
    pub fn supports_hover(&self) -> bool {
        self.capabilities.hover_provider.is_some()
    }

    /// True if the server advertises document symbols.
    #[must_use]
    pub fn supports_document_symbols(&self) -> bool {
        self.capabilities.document_symbol_provider.is_some()
    }

    /// True if the server advertises goto-definition.
    #[must_use]
    pub fn supports_definition(&self) -> bool {
        self.capabilities.definition_provider.is_some()
    }

    /// True if the server advertises goto-declaration.
    #[must_use]
    pub fn supports_declaration(&self) -> bool {
        self.capabilities.declaration_provider.is_some()
    }

    /// True if the server advertises goto-type-definition.
    #[must_use]
    pub fn supports_type_definition(&self) -> bool {
        self.capabilities.type_definition_provider.is_some()
    }

    /// True if the server advertises goto-implementation.
    #[must_use]
    pub fn supports_implementation(&self) -> bool {
        self.capabilities.implementation_provider.is_some()
    }

    /// True if the server advertises find-references.
    #[must_use]
    pub fn supports_references(&self) -> bool {
        self.capabilities.references_provider.is_some()
    }

    /// True if the server advertises call hierarchy.
    #[must_use]
    pub fn supports_call_hierarchy(&self) -> bool {
        self.capabilities.call_hierarchy_provider.is_some()
    }

    /// Type hierarchy support is not modelled in the capability types;
    /// it is probed at call time, so hierarchy queries are always issued
    /// when the edge kind is enabled.
    #[must_use]
    pub const fn supports_type_hierarchy(&self) -> bool {
        true
    }

    /// True if the server supports per-file pull diagnostics.
    #[must_use]
    pub fn supports_pull_diagnostics(&self) -> bool {
        self.capabilities.diagnostic_provider.is_some()
    }

    /// Shuts the server down. Servers flagged in the registry as
    /// blocking on their shutdown streams are killed directly.
    pub async fn stop(mut self) {
        *self.state.lock().await = HandlerState::ShuttingDown;

        if self.spec.skip_shutdown {
            debug!("{} blocks on shutdown; killing process", self.spec.name);
            self.client.kill().await;
        } else if self.client.is_alive() {
            let timeout = self.client.timeout();
            match tokio::time::timeout(timeout, self.client.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("{} shutdown failed: {e:#}", self.spec.name);
                    self.client.kill().await;
                }
                Err(_) => {
                    debug!("{} shutdown timed out; killing process", self.spec.name);
                    self.client.kill().await;
                }
            }
        }

        *self.state.lock().await = HandlerState::Uninitialised;
    }

    fn position_params(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<TextDocumentPositionParams> {
        Ok(TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: path_to_uri(path)?,
            },
            position: Position { line, character },
        })
    }
}

/// Keeps only prepared hierarchy items whose range covers the queried
/// position. Servers occasionally return unrelated items for positions
/// inside nested symbols.
fn filter_items_at<T: HierarchyItem>(items: Vec<T>, line: u32, character: u32) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| {
            let selection = crate::range::Range::from(item.selection_range());
            let full = crate::range::Range::from(item.range());
            selection.contains_position(line, character) || full.contains_position(line, character)
        })
        .collect()
}

/// Common shape of call- and type-hierarchy items.
trait HierarchyItem {
    fn range(&self) -> lsp_types::Range;
    fn selection_range(&self) -> lsp_types::Range;
}

impl HierarchyItem for CallHierarchyItem {
    fn range(&self) -> lsp_types::Range {
        self.range
    }
    fn selection_range(&self) -> lsp_types::Range {
        self.selection_range
    }
}

impl HierarchyItem for TypeHierarchyItem {
    fn range(&self) -> lsp_types::Range {
        self.range
    }
    fn selection_range(&self) -> lsp_types::Range {
        self.selection_range
    }
}

/// Flattens hover contents to plain text.
fn hover_to_text(contents: &HoverContents) -> String {
    fn marked(string: &MarkedString) -> String {
        match string {
            MarkedString::String(s) => s.clone(),
            MarkedString::LanguageString(ls) => ls.value.clone(),
        }
    }

    match contents {
        HoverContents::Scalar(s) => marked(s),
        HoverContents::Array(items) => items
            .iter()
            .map(marked)
            .collect::<Vec<_>>()
            .join("\n"),
        HoverContents::Markup(markup) => markup.value.clone(),
    }
}

/// Converts a filesystem path into a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path does not form a valid URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    format!("file://{}", path.display())
        .parse()
        .map_err(|e| anyhow!("Invalid path for URI: {}: {e:?}", path.display()))
}

/// Converts a `file://` URI back into a filesystem path.
#[must_use]
pub fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
    uri.as_str()
        .strip_prefix("file://")
        .map(PathBuf::from)
}

/// The client capabilities advertised in the `initialize` request.
///
/// Workspace folders and dynamic registration stay disabled; progress
/// tokens are accepted but never initiated.
fn client_capabilities() -> ClientCapabilities {
    use lsp_types::{
        CallHierarchyClientCapabilities, DocumentSymbolClientCapabilities, GotoCapability,
        HoverClientCapabilities, PublishDiagnosticsClientCapabilities,
        ReferenceClientCapabilities, SemanticTokenModifier, SemanticTokenType,
        SemanticTokensClientCapabilities, SemanticTokensClientCapabilitiesRequests,
        SemanticTokensFullOptions, SymbolKindCapability, TagSupport,
        TextDocumentClientCapabilities, TokenFormat, WorkspaceClientCapabilities,
    };

    let goto = || {
        Some(GotoCapability {
            dynamic_registration: Some(false),
            link_support: Some(false),
        })
    };

    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                hierarchical_document_symbol_support: Some(true),
                symbol_kind: Some(SymbolKindCapability {
                    value_set: Some(all_symbol_kinds()),
                }),
                tag_support: Some(TagSupport {
                    value_set: vec![SymbolTag::DEPRECATED],
                }),
                ..Default::default()
            }),
            references: Some(ReferenceClientCapabilities {
                dynamic_registration: Some(false),
            }),
            definition: goto(),
            declaration: goto(),
            type_definition: goto(),
            implementation: goto(),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::PlainText, MarkupKind::Markdown]),
            }),
            call_hierarchy: Some(CallHierarchyClientCapabilities {
                dynamic_registration: Some(false),
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                tag_support: Some(TagSupport {
                    value_set: vec![DiagnosticTag::DEPRECATED, DiagnosticTag::UNNECESSARY],
                }),
                ..Default::default()
            }),
            semantic_tokens: Some(SemanticTokensClientCapabilities {
                dynamic_registration: Some(false),
                requests: SemanticTokensClientCapabilitiesRequests {
                    range: Some(false),
                    full: Some(SemanticTokensFullOptions::Bool(true)),
                },
                token_types: vec![
                    SemanticTokenType::NAMESPACE,
                    SemanticTokenType::TYPE,
                    SemanticTokenType::CLASS,
                    SemanticTokenType::INTERFACE,
                    SemanticTokenType::STRUCT,
                    SemanticTokenType::METHOD,
                    SemanticTokenType::FUNCTION,
                    SemanticTokenType::VARIABLE,
                    SemanticTokenType::PROPERTY,
                ],
                token_modifiers: vec![
                    SemanticTokenModifier::DECLARATION,
                    SemanticTokenModifier::DEFINITION,
                    SemanticTokenModifier::STATIC,
                    SemanticTokenModifier::DEPRECATED,
                ],
                formats: vec![TokenFormat::RELATIVE],
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            workspace_folders: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn all_symbol_kinds() -> Vec<SymbolKind> {
    vec![
        SymbolKind::FILE,
        SymbolKind::MODULE,
        SymbolKind::NAMESPACE,
        SymbolKind::PACKAGE,
        SymbolKind::CLASS,
        SymbolKind::METHOD,
        SymbolKind::PROPERTY,
        SymbolKind::FIELD,
        SymbolKind::CONSTRUCTOR,
        SymbolKind::ENUM,
        SymbolKind::INTERFACE,
        SymbolKind::FUNCTION,
        SymbolKind::VARIABLE,
        SymbolKind::CONSTANT,
        SymbolKind::STRING,
        SymbolKind::NUMBER,
        SymbolKind::BOOLEAN,
        SymbolKind::ARRAY,
        SymbolKind::OBJECT,
        SymbolKind::KEY,
        SymbolKind::NULL,
        SymbolKind::ENUM_MEMBER,
        SymbolKind::STRUCT,
        SymbolKind::EVENT,
        SymbolKind::OPERATOR,
        SymbolKind::TYPE_PARAMETER,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_uri_round_trip() {
        let path = Path::new("/home/user/project/src/lib.rs");
        let uri = path_to_uri(path).expect("valid path");
        assert_eq!(uri.as_str(), "file:///home/user/project/src/lib.rs");
        assert_eq!(uri_to_path(&uri).as_deref(), Some(path));
    }

    #[test]
    fn test_hover_to_text_variants() {
        let scalar = HoverContents::Scalar(MarkedString::String("fn foo()".to_string()));
        assert_eq!(hover_to_text(&scalar), "fn foo()");

        let markup = HoverContents::Markup(lsp_types::MarkupContent {
            kind: MarkupKind::Markdown,
            value: "```rust\nfn foo()\n```".to_string(),
        });
        assert_eq!(hover_to_text(&markup), "```rust\nfn foo()\n```");

        let array = HoverContents::Array(vec![
            MarkedString::String("line one".to_string()),
            MarkedString::LanguageString(lsp_types::LanguageString {
                language: "rust".to_string(),
                value: "line two".to_string(),
            }),
        ]);
        assert_eq!(hover_to_text(&array), "line one\nline two");
    }

    #[test]
    fn test_filter_items_at_position() {
        let item = |start: u32, end: u32| CallHierarchyItem {
            name: "f".to_string(),
            kind: SymbolKind::FUNCTION,
            tags: None,
            detail: None,
            uri: "file:///tmp/a.rs".parse().expect("valid uri"),
            range: lsp_types::Range {
                start: Position { line: start, character: 0 },
                end: Position { line: end, character: 1 },
            },
            selection_range: lsp_types::Range {
                start: Position { line: start, character: 3 },
                end: Position { line: start, character: 4 },
            },
            data: None,
        };

        let kept = filter_items_at(vec![item(0, 5), item(10, 15)], 3, 0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].range.start.line, 0);
    }

    #[test]
    fn test_client_capabilities_shape() {
        let caps = client_capabilities();
        let text = caps.text_document.expect("text document capabilities");
        assert_eq!(
            text.document_symbol
                .and_then(|ds| ds.hierarchical_document_symbol_support),
            Some(true)
        );
        assert_eq!(text.definition.and_then(|d| d.link_support), Some(false));
        assert_eq!(
            caps.workspace.and_then(|w| w.workspace_folders),
            Some(false)
        );
    }
}
