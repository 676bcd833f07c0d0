// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Low-level LSP client for communicating with a server process.
pub mod client;
/// High-level facade with one method per used LSP feature.
pub mod handler;
/// LSP message protocol definitions.
pub mod protocol;

pub use client::LspClient;
pub use handler::{HandlerState, LspHandler, TargetLocation, path_to_uri, uri_to_path};
