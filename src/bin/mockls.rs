// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. Understands a small indentation-based toy language: lines
//! declaring `class Name` or `fn name` become document symbols, nested by
//! indentation, and `class A extends B` feeds the type hierarchy. CLI
//! flags control capabilities, timing, and failure modes. No tokio —
//! uses `std::thread` for deferred notifications.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Emit progress begin/end after initialized (milliseconds).
    #[arg(long, default_value_t = 0)]
    indexing_delay: u64,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Answer documentSymbol with the deprecated flat list.
    #[arg(long)]
    flat_symbols: bool,

    /// Close stdout after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A declaration parsed from the toy language.
#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    /// LSP symbol kind number (5 = Class, 12 = Function).
    kind: u64,
    line: usize,
    indent: usize,
    name_col: usize,
    end_line: usize,
    end_col: usize,
    /// Name after `extends`, for classes.
    extends: Option<String>,
    children: Vec<Symbol>,
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    shutdown_flag: Arc<AtomicBool>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method.clone() else {
            return;
        };

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        // Check hang_on — never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        // Response delay
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        // Check fail_on — return `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Some(self.handle_initialize()),
            "shutdown" => Some(Value::Null),
            "textDocument/hover" => self.handle_hover(&request.params),
            "textDocument/definition"
            | "textDocument/declaration"
            | "textDocument/typeDefinition"
            | "textDocument/implementation" => self.handle_definition(&request.params),
            "textDocument/references" => self.handle_references(&request.params),
            "textDocument/documentSymbol" => self.handle_document_symbols(&request.params),
            "textDocument/prepareCallHierarchy" => {
                Some(self.handle_prepare_hierarchy(&request.params, 12))
            }
            "textDocument/prepareTypeHierarchy" => {
                Some(self.handle_prepare_hierarchy(&request.params, 5))
            }
            "callHierarchy/outgoingCalls" => Some(self.handle_outgoing_calls(&request.params)),
            "typeHierarchy/supertypes" => Some(self.handle_supertypes(&request.params)),
            _ => {
                self.send_response(&Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error: None,
        });
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if self.args.indexing_delay > 0 {
                    self.start_indexing_simulation();
                }
            }
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics {
                        send_diagnostics_notification(&self.writer, uri);
                    }
                }
            }
            // didClose keeps the last text: real servers fall back to the
            // on-disk state and keep answering cross-file queries.
            "textDocument/didClose" => {}
            "exit" => {
                self.shutdown_flag.store(true, Ordering::SeqCst);
                std::process::exit(0);
            }
            _ => {}
        }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "capabilities": {
                "hoverProvider": true,
                "definitionProvider": true,
                "declarationProvider": true,
                "typeDefinitionProvider": true,
                "implementationProvider": true,
                "referencesProvider": true,
                "documentSymbolProvider": true,
                "callHierarchyProvider": true,
                "typeHierarchyProvider": true,
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1
                }
            }
        })
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        Some(serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```\n{word}\n```")
            }
        }))
    }

    /// Finds the declaration of the word at the position, searching the
    /// queried document first and then every other open document.
    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let mut documents: Vec<(&str, &String)> = vec![(uri, content)];
        documents.extend(self.documents.iter().map(|(u, c)| (u.as_str(), c)));

        for (doc_uri, doc) in documents {
            for symbol in flatten(&parse_symbols(doc)) {
                if symbol.name == word {
                    return Some(location_json(
                        doc_uri,
                        symbol.line,
                        symbol.name_col,
                        symbol.name_col + symbol.name.len(),
                    ));
                }
            }
        }
        None
    }

    /// All occurrences of the word at the position, across every open
    /// document.
    fn handle_references(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let mut locations = Vec::new();
        for (doc_uri, doc) in &self.documents {
            for (line_idx, line_text) in doc.lines().enumerate() {
                let mut start = 0;
                while let Some(pos) = line_text[start..].find(&word) {
                    let col_idx = start + pos;
                    if is_word_boundary(line_text, col_idx, word.len()) {
                        locations.push(location_json(
                            doc_uri,
                            line_idx,
                            col_idx,
                            col_idx + word.len(),
                        ));
                    }
                    start = col_idx + word.len();
                }
            }
        }

        Some(Value::Array(locations))
    }

    fn handle_document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)?;

        let content = self.documents.get(uri)?;
        let symbols = parse_symbols(content);

        if self.args.flat_symbols {
            let flat: Vec<Value> = flatten(&symbols)
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "kind": s.kind,
                        "location": {
                            "uri": uri,
                            "range": range_json(s.line, s.indent, s.end_line, s.end_col)
                        }
                    })
                })
                .collect();
            return Some(Value::Array(flat));
        }

        Some(Value::Array(symbols.iter().map(symbol_json).collect()))
    }

    /// Prepares a hierarchy item: the innermost symbol of `kind`
    /// containing the position.
    fn handle_prepare_hierarchy(&self, params: &Value, kind: u64) -> Value {
        let Some((uri, line, _col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };

        let item = flatten(&parse_symbols(content))
            .into_iter()
            .filter(|s| s.kind == kind)
            .filter(|s| s.line <= line && line <= s.end_line)
            .max_by_key(|s| s.line);

        match item {
            Some(symbol) => Value::Array(vec![hierarchy_item_json(uri, &symbol)]),
            None => Value::Null,
        }
    }

    /// Callees of the prepared function: known function names occurring
    /// in its body.
    fn handle_outgoing_calls(&self, params: &Value) -> Value {
        let Some(item) = params.get("item") else {
            return Value::Null;
        };
        let (Some(uri), Some(start), Some(end)) = (
            item.get("uri").and_then(Value::as_str),
            item.pointer("/range/start/line").and_then(Value::as_u64),
            item.pointer("/range/end/line").and_then(Value::as_u64),
        ) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };

        // Every function known across open documents is a candidate callee.
        let known: Vec<(String, Symbol)> = self
            .documents
            .iter()
            .flat_map(|(doc_uri, doc)| {
                flatten(&parse_symbols(doc))
                    .into_iter()
                    .filter(|s| s.kind == 12)
                    .map(|s| (doc_uri.clone(), s))
                    .collect::<Vec<_>>()
            })
            .collect();

        let body_start = usize::try_from(start).unwrap_or(0) + 1;
        let body_end = usize::try_from(end).unwrap_or(0);
        let mut calls = Vec::new();
        for line_text in content
            .lines()
            .skip(body_start)
            .take(body_end.saturating_sub(body_start) + 1)
        {
            for (callee_uri, callee) in &known {
                if let Some(col) = line_text.find(&callee.name)
                    && is_word_boundary(line_text, col, callee.name.len())
                    && !calls.iter().any(|(u, n): &(String, String)| {
                        u == callee_uri && n == &callee.name
                    })
                {
                    calls.push((callee_uri.clone(), callee.name.clone()));
                }
            }
        }

        let outgoing: Vec<Value> = calls
            .iter()
            .filter_map(|(callee_uri, name)| {
                let doc = self.documents.get(callee_uri)?;
                let symbol = flatten(&parse_symbols(doc))
                    .into_iter()
                    .find(|s| s.kind == 12 && &s.name == name)?;
                Some(serde_json::json!({
                    "to": hierarchy_item_json(callee_uri, &symbol),
                    "fromRanges": []
                }))
            })
            .collect();

        Value::Array(outgoing)
    }

    /// Supertypes of the prepared class, via its `extends` clause.
    fn handle_supertypes(&self, params: &Value) -> Value {
        let Some(item) = params.get("item") else {
            return Value::Null;
        };
        let (Some(uri), Some(name)) = (
            item.get("uri").and_then(Value::as_str),
            item.get("name").and_then(Value::as_str),
        ) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };

        let Some(parent_name) = flatten(&parse_symbols(content))
            .into_iter()
            .find(|s| s.kind == 5 && s.name == name)
            .and_then(|s| s.extends)
        else {
            return Value::Array(Vec::new());
        };

        for (doc_uri, doc) in &self.documents {
            if let Some(parent) = flatten(&parse_symbols(doc))
                .into_iter()
                .find(|s| s.kind == 5 && s.name == parent_name)
            {
                return Value::Array(vec![hierarchy_item_json(doc_uri, &parent)]);
            }
        }
        Value::Array(Vec::new())
    }

    fn start_indexing_simulation(&self) {
        let delay = self.args.indexing_delay;
        let writer = self.writer.clone();

        std::thread::spawn(move || {
            let token = "mockls-indexing";

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "begin", "title": "Indexing", "percentage": 0 }
                    }
                }),
            );

            std::thread::sleep(Duration::from_millis(delay));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "end", "message": "Indexing complete" }
                    }
                }),
            );
        });
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": range_json(line, start, line, end)
    })
}

fn range_json(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Value {
    serde_json::json!({
        "start": { "line": start_line, "character": start_col },
        "end": { "line": end_line, "character": end_col }
    })
}

fn symbol_json(symbol: &Symbol) -> Value {
    serde_json::json!({
        "name": symbol.name,
        "kind": symbol.kind,
        "range": range_json(symbol.line, symbol.indent, symbol.end_line, symbol.end_col),
        "selectionRange": range_json(
            symbol.line,
            symbol.name_col,
            symbol.line,
            symbol.name_col + symbol.name.len()
        ),
        "children": symbol.children.iter().map(symbol_json).collect::<Vec<_>>()
    })
}

fn hierarchy_item_json(uri: &str, symbol: &Symbol) -> Value {
    serde_json::json!({
        "name": symbol.name,
        "kind": symbol.kind,
        "uri": uri,
        "range": range_json(symbol.line, symbol.indent, symbol.end_line, symbol.end_col),
        "selectionRange": range_json(
            symbol.line,
            symbol.name_col,
            symbol.line,
            symbol.name_col + symbol.name.len()
        )
    })
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `publishDiagnostics` notification.
fn send_diagnostics_notification(writer: &Writer, uri: &str) {
    send_message(
        writer,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": [{
                    "range": range_json(0, 0, 0, 1),
                    "severity": 2,
                    "source": "mockls",
                    "message": "mockls: mock diagnostic"
                }]
            }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True if `text[col..col + len]` is delimited by non-word characters.
fn is_word_boundary(text: &str, col: usize, len: usize) -> bool {
    let bytes = text.as_bytes();
    let before_ok = col == 0 || !is_word_char(bytes[col - 1]);
    let after_ok = col + len >= bytes.len() || !is_word_char(bytes[col + len]);
    before_ok && after_ok
}

/// Parse the toy language into nested symbols.
///
/// `class Name` (optionally `extends Base`) and `fn name` declare
/// symbols; nesting follows indentation. A symbol's range runs from its
/// declaration line to the line before the next declaration at the same
/// or lower indentation (or the end of the file).
fn parse_symbols(content: &str) -> Vec<Symbol> {
    let lines: Vec<&str> = content.lines().collect();

    // Collect declarations first.
    let mut declarations = Vec::new();
    for (line_idx, line_text) in lines.iter().enumerate() {
        let trimmed = line_text.trim_start();
        let indent = line_text.len() - trimmed.len();

        let (kind, prefix_len) = if trimmed.starts_with("class ") {
            (5, 6)
        } else if trimmed.starts_with("fn ") {
            (12, 3)
        } else {
            continue;
        };

        let after_keyword = &trimmed[prefix_len..];
        let name: String = after_keyword
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }

        let extends = after_keyword
            .split_once("extends ")
            .map(|(_, rest)| {
                rest.chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|n| !n.is_empty());

        declarations.push(Symbol {
            name,
            kind,
            line: line_idx,
            indent,
            name_col: indent + prefix_len,
            end_line: line_idx,
            end_col: line_text.len(),
            extends,
            children: Vec::new(),
        });
    }

    // Close each symbol at the next declaration with equal or lower indent.
    for i in 0..declarations.len() {
        let end = declarations[i + 1..]
            .iter()
            .find(|d| d.indent <= declarations[i].indent)
            .map_or(lines.len(), |d| d.line);
        let end_line = end.saturating_sub(1).max(declarations[i].line);
        declarations[i].end_line = end_line;
        declarations[i].end_col = lines.get(end_line).map_or(0, |l| l.len());
    }

    // Nest by indentation.
    let mut roots: Vec<Symbol> = Vec::new();
    let mut stack: Vec<Symbol> = Vec::new();
    for symbol in declarations {
        while stack.last().is_some_and(|top| top.indent >= symbol.indent) {
            let Some(done) = stack.pop() else { break };
            attach(&mut roots, &mut stack, done);
        }
        stack.push(symbol);
    }
    while let Some(done) = stack.pop() {
        attach(&mut roots, &mut stack, done);
    }
    roots
}

fn attach(roots: &mut Vec<Symbol>, stack: &mut [Symbol], symbol: Symbol) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(symbol),
        None => roots.push(symbol),
    }
}

/// Depth-first flattening of the symbol forest.
fn flatten(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut all = Vec::new();
    for symbol in symbols {
        all.push(symbol.clone());
        all.extend(flatten(&symbol.children));
    }
    all
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            indexing_delay: 0,
            response_delay: 0,
            no_diagnostics: false,
            flat_symbols: false,
            drop_after: None,
            hang_on: vec![],
            fail_on: vec![],
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn request(id: u64, method: &str, params: Value) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        })
        .to_string()
    }

    fn initialize_request(id: u64) -> String {
        request(
            id,
            "initialize",
            serde_json::json!({
                "processId": null,
                "capabilities": {},
                "rootUri": "file:///tmp/test"
            }),
        )
    }

    fn did_open_notification(uri: &str, text: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "toy",
                    "version": 1,
                    "text": text
                }
            }
        })
        .to_string()
    }

    fn response_with_id(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
            .unwrap_or_else(|| panic!("response with id={id}"))
    }

    #[test]
    fn test_initialize_advertises_hierarchies() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&request(2, "shutdown", Value::Null)));

        let messages = run_server_with(default_args(), &input);
        let caps = &response_with_id(&messages, 1)["result"]["capabilities"];
        assert_eq!(caps["documentSymbolProvider"], true);
        assert_eq!(caps["callHierarchyProvider"], true);
        assert_eq!(caps["typeHierarchyProvider"], true);
        assert_eq!(caps["declarationProvider"], true);
    }

    #[test]
    fn test_parse_symbols_nesting_and_ranges() {
        let content = "class Foo extends Base\n    fn bar\n        noise\n    fn baz\nfn top\n";
        let symbols = parse_symbols(content);

        assert_eq!(symbols.len(), 2);
        let class = &symbols[0];
        assert_eq!(class.name, "Foo");
        assert_eq!(class.kind, 5);
        assert_eq!(class.extends.as_deref(), Some("Base"));
        assert_eq!(class.children.len(), 2);
        assert_eq!(class.children[0].name, "bar");
        assert_eq!(class.children[0].end_line, 2, "body runs to the noise line");
        assert_eq!(class.end_line, 3);

        assert_eq!(symbols[1].name, "top");
        assert_eq!(symbols[1].children.len(), 0);
    }

    #[test]
    fn test_document_symbols_nested_json() {
        let uri = "file:///tmp/a.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "class Foo\n    fn bar\n")));
        input.extend(frame(&request(
            2,
            "textDocument/documentSymbol",
            serde_json::json!({ "textDocument": { "uri": uri } }),
        )));

        let messages = run_server_with(default_args(), &input);
        let result = &response_with_id(&messages, 2)["result"];
        assert_eq!(result[0]["name"], "Foo");
        assert_eq!(result[0]["children"][0]["name"], "bar");
        assert_eq!(result[0]["children"][0]["selectionRange"]["start"]["character"], 7);
    }

    #[test]
    fn test_flat_symbols_mode() {
        let mut args = default_args();
        args.flat_symbols = true;

        let uri = "file:///tmp/a.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "fn solo\n")));
        input.extend(frame(&request(
            2,
            "textDocument/documentSymbol",
            serde_json::json!({ "textDocument": { "uri": uri } }),
        )));

        let messages = run_server_with(args, &input);
        let result = &response_with_id(&messages, 2)["result"];
        assert!(result[0].get("location").is_some(), "flat entries carry a location");
        assert!(result[0].get("selectionRange").is_none());
    }

    #[test]
    fn test_cross_document_references() {
        let a = "file:///tmp/a.toy";
        let b = "file:///tmp/b.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(a, "fn foo\n")));
        input.extend(frame(&did_open_notification(b, "fn bar\n    foo\n")));
        input.extend(frame(&request(
            2,
            "textDocument/references",
            serde_json::json!({
                "textDocument": { "uri": a },
                "position": { "line": 0, "character": 3 },
                "context": { "includeDeclaration": false }
            }),
        )));

        let messages = run_server_with(default_args(), &input);
        let result = response_with_id(&messages, 2)["result"]
            .as_array()
            .expect("array")
            .clone();
        assert_eq!(result.len(), 2, "declaration in a + call in b");
        assert!(result.iter().any(|l| l["uri"] == b));
    }

    #[test]
    fn test_outgoing_calls_across_documents() {
        let a = "file:///tmp/a.toy";
        let b = "file:///tmp/b.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(a, "fn foo\n")));
        input.extend(frame(&did_open_notification(b, "fn bar\n    foo\n")));
        input.extend(frame(&request(
            2,
            "textDocument/prepareCallHierarchy",
            serde_json::json!({
                "textDocument": { "uri": b },
                "position": { "line": 0, "character": 3 }
            }),
        )));

        let messages = run_server_with(default_args(), &input);
        let item = response_with_id(&messages, 2)["result"][0].clone();
        assert_eq!(item["name"], "bar");

        let mut input2 = frame(&initialize_request(1));
        input2.extend(frame(&did_open_notification(a, "fn foo\n")));
        input2.extend(frame(&did_open_notification(b, "fn bar\n    foo\n")));
        input2.extend(frame(&request(
            3,
            "callHierarchy/outgoingCalls",
            serde_json::json!({ "item": item }),
        )));

        let messages = run_server_with(default_args(), &input2);
        let calls = &response_with_id(&messages, 3)["result"];
        assert_eq!(calls[0]["to"]["name"], "foo");
        assert_eq!(calls[0]["to"]["uri"], a);
    }

    #[test]
    fn test_supertypes_via_extends() {
        let uri = "file:///tmp/a.toy";
        let content = "class Base\nclass Derived extends Base\n";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, content)));
        input.extend(frame(&request(
            2,
            "textDocument/prepareTypeHierarchy",
            serde_json::json!({
                "textDocument": { "uri": uri },
                "position": { "line": 1, "character": 6 }
            }),
        )));

        let messages = run_server_with(default_args(), &input);
        let item = response_with_id(&messages, 2)["result"][0].clone();
        assert_eq!(item["name"], "Derived");

        let mut input2 = frame(&initialize_request(1));
        input2.extend(frame(&did_open_notification(uri, content)));
        input2.extend(frame(&request(
            3,
            "typeHierarchy/supertypes",
            serde_json::json!({ "item": item }),
        )));

        let messages = run_server_with(default_args(), &input2);
        let supertypes = &response_with_id(&messages, 3)["result"];
        assert_eq!(supertypes[0]["name"], "Base");
    }

    #[test]
    fn test_diagnostics_on_open() {
        let uri = "file:///tmp/a.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "fn foo\n")));

        let messages = run_server_with(default_args(), &input);
        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str)
                    == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");
        assert_eq!(diag["params"]["uri"], uri);
        assert_eq!(diag["params"]["diagnostics"][0]["severity"], 2);
    }

    #[test]
    fn test_fail_on_returns_internal_error() {
        let mut args = default_args();
        args.fail_on = vec!["textDocument/hover".to_string()];

        let uri = "file:///tmp/a.toy";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "fn foo\n")));
        input.extend(frame(&request(
            2,
            "textDocument/hover",
            serde_json::json!({
                "textDocument": { "uri": uri },
                "position": { "line": 0, "character": 3 }
            }),
        )));

        let messages = run_server_with(args, &input);
        assert_eq!(response_with_id(&messages, 2)["error"]["code"], -32603);
    }

    #[test]
    fn test_request_id_echo() {
        let init = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "initialize",
            "params": { "processId": null, "capabilities": {}, "rootUri": null }
        })
        .to_string();
        let shutdown = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "shutdown",
            "params": null
        })
        .to_string();

        let mut input = frame(&init);
        input.extend(frame(&shutdown));

        let messages = run_server_with(default_args(), &input);

        assert_eq!(messages[0]["id"], 42, "Init should echo numeric id");

        let shutdown_resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_str) == Some("string-id"));
        assert!(shutdown_resp.is_some(), "Shutdown should echo string id");
    }
}
