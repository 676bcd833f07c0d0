// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The built-in language server table.
//!
//! One entry per supported server: executable, arguments, the extension
//! to LSP language-id mapping, and per-server quirks. Entries can be
//! overridden through the configuration file (see [`crate::config`]).

use serde_json::json;

/// Server families that need special handling in the import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFamily {
    /// rust-analyzer.
    Rust,
    /// gopls; swallows its spurious package-metadata hover errors.
    Go,
    /// Eclipse JDT LS; package nodes are synthesised after the node phase.
    Java,
    /// Pyright.
    Python,
    /// typescript-language-server.
    TypeScript,
    /// clangd.
    Cpp,
    /// OmniSharp; known to fail `didOpen` spuriously.
    CSharp,
}

/// A registry entry describing one supported language server.
#[derive(Debug, Clone, Copy)]
pub struct ServerSpec {
    /// Canonical name used on the command line.
    pub name: &'static str,
    /// Executable name, resolved through `PATH` unless overridden.
    pub executable: &'static str,
    /// Process arguments.
    pub args: &'static [&'static str],
    /// Informational project URL.
    pub url: &'static str,
    /// File extension to LSP language-id mapping.
    pub language_ids: &'static [(&'static str, &'static str)],
    /// Server family for quirk handling.
    pub family: ServerFamily,
    /// True for servers that block on their shutdown streams and must be
    /// killed without the shutdown handshake.
    pub skip_shutdown: bool,
}

impl ServerSpec {
    /// The LSP language id for a file extension, if this server claims it.
    #[must_use]
    pub fn language_id(&self, extension: &str) -> Option<&'static str> {
        self.language_ids
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, id)| *id)
    }

    /// True if this server claims the file extension.
    #[must_use]
    pub fn claims_extension(&self, extension: &str) -> bool {
        self.language_id(extension).is_some()
    }

    /// The extensions this server claims.
    pub fn extensions(&self) -> impl Iterator<Item = &'static str> {
        self.language_ids.iter().map(|(ext, _)| *ext)
    }

    /// `initializationOptions` sent in the `initialize` request.
    #[must_use]
    pub fn initialization_options(&self) -> Option<serde_json::Value> {
        match self.family {
            // Cache priming keeps rust-analyzer busy for minutes on large
            // projects; a batch import only needs on-demand analysis.
            ServerFamily::Rust => Some(json!({
                "cachePriming": { "enable": false }
            })),
            ServerFamily::Python => Some(json!({
                "python": { "analysis": { "autoSearchPaths": true } }
            })),
            _ => None,
        }
    }
}

/// All registered servers.
pub const SERVERS: &[ServerSpec] = &[
    ServerSpec {
        name: "rust-analyzer",
        executable: "rust-analyzer",
        args: &[],
        url: "https://rust-analyzer.github.io",
        language_ids: &[("rs", "rust")],
        family: ServerFamily::Rust,
        skip_shutdown: false,
    },
    ServerSpec {
        name: "gopls",
        executable: "gopls",
        args: &[],
        url: "https://pkg.go.dev/golang.org/x/tools/gopls",
        language_ids: &[("go", "go")],
        family: ServerFamily::Go,
        skip_shutdown: false,
    },
    ServerSpec {
        name: "jdtls",
        executable: "jdtls",
        args: &[],
        url: "https://github.com/eclipse-jdtls/eclipse.jdt.ls",
        language_ids: &[("java", "java")],
        family: ServerFamily::Java,
        skip_shutdown: false,
    },
    ServerSpec {
        name: "pyright",
        executable: "pyright-langserver",
        args: &["--stdio"],
        url: "https://github.com/microsoft/pyright",
        language_ids: &[("py", "python"), ("pyi", "python")],
        family: ServerFamily::Python,
        skip_shutdown: true,
    },
    ServerSpec {
        name: "typescript-language-server",
        executable: "typescript-language-server",
        args: &["--stdio"],
        url: "https://github.com/typescript-language-server/typescript-language-server",
        language_ids: &[
            ("ts", "typescript"),
            ("tsx", "typescriptreact"),
            ("js", "javascript"),
            ("jsx", "javascriptreact"),
        ],
        family: ServerFamily::TypeScript,
        skip_shutdown: true,
    },
    ServerSpec {
        name: "clangd",
        executable: "clangd",
        args: &[],
        url: "https://clangd.llvm.org",
        language_ids: &[
            ("c", "c"),
            ("h", "c"),
            ("cc", "cpp"),
            ("cpp", "cpp"),
            ("cxx", "cpp"),
            ("hpp", "cpp"),
        ],
        family: ServerFamily::Cpp,
        skip_shutdown: false,
    },
    ServerSpec {
        name: "omnisharp",
        executable: "OmniSharp",
        args: &["-lsp"],
        url: "https://github.com/OmniSharp/omnisharp-roslyn",
        language_ids: &[("cs", "csharp")],
        family: ServerFamily::CSharp,
        skip_shutdown: false,
    },
];

/// Looks up a registry entry by canonical name.
#[must_use]
pub fn find(name: &str) -> Option<&'static ServerSpec> {
    SERVERS.iter().find(|s| s.name == name)
}

/// The canonical names of all registered servers.
#[must_use]
pub fn names() -> Vec<&'static str> {
    SERVERS.iter().map(|s| s.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_servers() {
        for name in ["rust-analyzer", "gopls", "jdtls", "clangd"] {
            assert!(find(name).is_some(), "{name} should be registered");
        }
        assert!(find("no-such-server").is_none());
    }

    #[test]
    fn test_language_id_mapping() {
        let rust = find("rust-analyzer").expect("registered");
        assert_eq!(rust.language_id("rs"), Some("rust"));
        assert_eq!(rust.language_id("go"), None);
        assert!(rust.claims_extension("rs"));

        let ts = find("typescript-language-server").expect("registered");
        assert_eq!(ts.language_id("tsx"), Some("typescriptreact"));
    }

    #[test]
    fn test_names_are_unique() {
        let mut names = names();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_blocking_shutdown_servers_flagged() {
        assert!(find("pyright").is_some_and(|s| s.skip_shutdown));
        assert!(find("typescript-language-server").is_some_and(|s| s.skip_shutdown));
        assert!(find("rust-analyzer").is_some_and(|s| !s.skip_shutdown));
    }
}
