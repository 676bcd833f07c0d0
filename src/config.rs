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

//! Configuration overrides for the server registry.
//!
//! The registry ships working defaults; a `config.toml` in the user
//! configuration directory (or one passed via `--config`) can replace a
//! server's command, arguments, or initialization options — for example
//! to point at a jdtls wrapper script or a pinned server build.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::registry::ServerSpec;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Overrides keyed by registry server name (e.g. "rust-analyzer").
    #[serde(default)]
    pub server: HashMap<String, ServerOverride>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerOverride {
    /// Replacement executable path or name.
    pub command: Option<String>,

    /// Replacement process arguments.
    pub args: Option<Vec<String>>,

    /// Replacement initialization options.
    pub initialization_options: Option<serde_json::Value>,
}

/// A registry entry with configuration overrides applied.
#[derive(Debug, Clone)]
pub struct ResolvedServer {
    /// Executable to spawn.
    pub command: String,
    /// Process arguments.
    pub args: Vec<String>,
    /// Options sent in the LSP `initialize` request.
    pub initialization_options: Option<serde_json::Value>,
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Load from user config directory (~/.config/trellis/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("trellis").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Load from environment variables (TRELLIS_SERVER_..., etc.)
        builder = builder.add_source(config::Environment::with_prefix("TRELLIS"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Applies any override for `spec` and returns the effective server
    /// invocation.
    #[must_use]
    pub fn resolve(&self, spec: &ServerSpec) -> ResolvedServer {
        let over = self.server.get(spec.name);
        ResolvedServer {
            command: over
                .and_then(|o| o.command.clone())
                .unwrap_or_else(|| spec.executable.to_string()),
            args: over
                .and_then(|o| o.args.clone())
                .unwrap_or_else(|| spec.args.iter().map(ToString::to_string).collect()),
            initialization_options: over
                .and_then(|o| o.initialization_options.clone())
                .or_else(|| spec.initialization_options()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn test_resolve_defaults_from_registry() {
        let config = Config::default();
        let spec = registry::find("typescript-language-server").expect("registered");
        let resolved = config.resolve(spec);

        assert_eq!(resolved.command, "typescript-language-server");
        assert_eq!(resolved.args, vec!["--stdio".to_string()]);
    }

    #[test]
    fn test_resolve_applies_override() {
        let mut config = Config::default();
        config.server.insert(
            "rust-analyzer".to_string(),
            ServerOverride {
                command: Some("/opt/ra/rust-analyzer".to_string()),
                args: None,
                initialization_options: Some(serde_json::json!({"checkOnSave": false})),
            },
        );

        let spec = registry::find("rust-analyzer").expect("registered");
        let resolved = config.resolve(spec);
        assert_eq!(resolved.command, "/opt/ra/rust-analyzer");
        assert!(resolved.args.is_empty());
        assert_eq!(
            resolved.initialization_options,
            Some(serde_json::json!({"checkOnSave": false}))
        );
    }
}
