// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Source file discovery.
//!
//! Walks the include roots (gitignore-aware, hidden files skipped) and
//! keeps files whose extension the chosen server claims. Exclude entries
//! match project-relative paths by prefix, or as a regular expression
//! when they end with `$`.

use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::registry::ServerSpec;

/// A compiled exclude entry.
#[derive(Debug)]
enum ExcludeRule {
    Prefix(String),
    Pattern(Regex),
}

impl ExcludeRule {
    fn compile(raw: &str) -> Result<Self> {
        if raw.ends_with('$') {
            let pattern = Regex::new(raw)
                .with_context(|| format!("Invalid exclude pattern: {raw}"))?;
            Ok(Self::Pattern(pattern))
        } else {
            Ok(Self::Prefix(raw.to_string()))
        }
    }

    fn matches(&self, relative: &str) -> bool {
        match self {
            Self::Prefix(prefix) => relative.starts_with(prefix.as_str()),
            Self::Pattern(pattern) => pattern.is_match(relative),
        }
    }
}

/// Enumerates the files to import, sorted for deterministic processing.
///
/// # Errors
///
/// Returns an error if an exclude pattern does not compile or no file
/// matches any extension the server claims.
pub fn discover_files(
    root: &Path,
    includes: &[PathBuf],
    excludes: &[String],
    spec: &ServerSpec,
) -> Result<Vec<PathBuf>> {
    let rules = excludes
        .iter()
        .map(|raw| ExcludeRule::compile(raw))
        .collect::<Result<Vec<_>>>()?;

    let roots: Vec<PathBuf> = if includes.is_empty() {
        vec![root.to_path_buf()]
    } else {
        includes
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
            .collect()
    };

    let mut files = Vec::new();
    for include in &roots {
        if !include.exists() {
            bail!("include directory does not exist: {}", include.display());
        }

        let walker = WalkBuilder::new(include).git_ignore(true).hidden(true).build();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !spec.claims_extension(extension) {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            if rules.iter().any(|r| r.matches(&relative)) {
                continue;
            }

            files.push(path.to_path_buf());
        }
    }

    files.sort_unstable();
    files.dedup();

    if files.is_empty() {
        bail!(
            "no files with extensions {:?} found under {}",
            spec.extensions().collect::<Vec<_>>(),
            root.display()
        );
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    fn rust_spec() -> &'static ServerSpec {
        registry::find("rust-analyzer").expect("registered")
    }

    #[test]
    fn test_discovers_matching_extensions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "src/sub/mod.rs", "pub fn b() {}");
        write(dir.path(), "README.md", "# readme");
        write(dir.path(), "build.py", "print()");

        let files = discover_files(dir.path(), &[], &[], rust_spec())?;
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.strip_prefix(dir.path()).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["src/lib.rs", "src/sub/mod.rs"]);
        Ok(())
    }

    #[test]
    fn test_empty_set_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "notes.txt", "nothing importable");

        assert!(discover_files(dir.path(), &[], &[], rust_spec()).is_err());
        Ok(())
    }

    #[test]
    fn test_exclude_by_prefix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "vendor/dep.rs", "pub fn v() {}");

        let files = discover_files(dir.path(), &[], &["vendor".to_string()], rust_spec())?;
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/lib.rs"));
        Ok(())
    }

    #[test]
    fn test_exclude_by_regex() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "src/generated.rs", "pub fn g() {}");

        let files = discover_files(
            dir.path(),
            &[],
            &[r".*generated\.rs$".to_string()],
            rust_spec(),
        )?;
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/lib.rs"));
        Ok(())
    }

    #[test]
    fn test_invalid_regex_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "src/lib.rs", "pub fn a() {}");

        assert!(discover_files(dir.path(), &[], &["[unclosed$".to_string()], rust_spec()).is_err());
        Ok(())
    }

    #[test]
    fn test_include_restricts_to_subtree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "tools/gen.rs", "pub fn t() {}");

        let files = discover_files(
            dir.path(),
            &[PathBuf::from("src")],
            &[],
            rust_spec(),
        )?;
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/lib.rs"));
        Ok(())
    }
}
