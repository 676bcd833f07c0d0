#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the import pipeline.
//!
//! These tests drive the full importer against the bundled `mockls`
//! binary, which speaks real framed JSON-RPC over stdin/stdout and
//! understands a small indentation-based toy language in `.rs` files.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use trellis::config::ResolvedServer;
use trellis::graph::{Graph, Node, gxl};
use trellis::importer::{EdgeKind, ImportConfig, Importer, NodeKind, SeverityKind};
use trellis::perf::PhaseTimer;
use trellis::registry::{ServerFamily, ServerSpec};

/// Registry-shaped entry for the mock server; it claims `.rs` files so
/// test projects look like small Rust trees.
static TOY_SPEC: ServerSpec = ServerSpec {
    name: "mockls",
    executable: "mockls",
    args: &[],
    url: "https://example.invalid/mockls",
    language_ids: &[("rs", "rust")],
    family: ServerFamily::Rust,
    skip_shutdown: false,
};

/// Locate the mockls binary in the same directory as the test executable.
/// During `cargo test`, all binaries are built into the same `target/debug/deps`
/// parent directory.
fn mockls_bin() -> PathBuf {
    let test_exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .map(|p| p.join("mockls"));
    test_exe.unwrap_or_else(|| PathBuf::from("mockls"))
}

fn resolved(extra_args: &[&str]) -> ResolvedServer {
    ResolvedServer {
        command: mockls_bin().to_string_lossy().into_owned(),
        args: extra_args.iter().map(ToString::to_string).collect(),
        initialization_options: None,
    }
}

fn base_config(root: &Path, edge_kinds: &[EdgeKind]) -> ImportConfig {
    ImportConfig {
        project_root: root.to_path_buf(),
        server: &TOY_SPEC,
        resolved: resolved(&[]),
        include_dirs: Vec::new(),
        exclude_dirs: Vec::new(),
        timeout: Duration::from_secs(5),
        node_kinds: NodeKind::all(),
        edge_kinds: edge_kinds.iter().copied().collect(),
        // Severities stay empty in most tests: the push-diagnostics
        // drain waits a full timeout window otherwise.
        severities: HashSet::new(),
        avoid_self_references: true,
        avoid_parent_references: true,
        jobs: Some(2),
        optimized_lookup: true,
        log_wire: false,
    }
}

async fn import(config: ImportConfig) -> Result<Graph> {
    let mut timer = PhaseTimer::new(None);
    Importer::new(config, CancellationToken::new())
        .run(&mut timer)
        .await
}

fn project(files: &[(&str, &str)]) -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    for (relative, content) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(dir)
}

fn edge_ids(graph: &Graph) -> Vec<String> {
    let mut ids: Vec<String> = graph.edges().map(|e| e.id().to_string()).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_single_file_import() -> Result<()> {
    let dir = project(&[("src/lib.rs", "fn foo\n    body\n")])?;
    let graph = import(base_config(dir.path(), &EdgeKind::TABLE)).await?;

    // Directory, file, and function nodes.
    let src = graph.node("src/").context("directory node src/")?;
    assert_eq!(src.type_name, "Directory");

    let file = graph.node("src/lib.rs").context("file node src/lib.rs")?;
    assert_eq!(file.type_name, "File");
    assert_eq!(file.source_name, "lib");
    assert_eq!(file.attributes.int("Metric.Lines.LOC"), Some(2));
    assert_eq!(file.parent(), Some("src/"));

    let foo = graph.node("lib.foo").context("function node lib.foo")?;
    assert_eq!(foo.type_name, "Function");
    assert_eq!(foo.parent(), Some("src/lib.rs"));
    assert_eq!(foo.attributes.int("SourceRange_StartLine"), Some(0));
    assert_eq!(foo.attributes.int("SourceRange_EndLine"), Some(1));
    assert_eq!(foo.attributes.int("Source.Line"), Some(1));
    assert_eq!(foo.attributes.int("Source.Column"), Some(4));
    assert!(foo.attributes.string("HoverText").is_some(), "hover prefetched");

    // Self-referential definition and reference results are filtered out.
    assert_eq!(graph.edge_count(), 0, "edges: {:?}", edge_ids(&graph));

    // Hierarchy levels and depth.
    assert_eq!(src.level(), 0);
    assert_eq!(file.level(), 1);
    assert_eq!(foo.level(), 2);
    assert_eq!(graph.max_depth(), 3);
    assert_eq!(graph.roots(), &["src/".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_call_and_reference_edges() -> Result<()> {
    let dir = project(&[("a.rs", "fn foo\n"), ("b.rs", "fn bar\n    foo\n")])?;
    let graph = import(base_config(
        dir.path(),
        &[EdgeKind::Call, EdgeKind::Reference],
    ))
    .await?;

    let ids = edge_ids(&graph);
    assert_eq!(
        ids,
        vec![
            "Call#b.bar#a.foo".to_string(),
            "Reference#b.bar#a.foo".to_string(),
        ],
        "exactly one call edge caller->callee and one reversed reference edge"
    );
    Ok(())
}

#[tokio::test]
async fn test_self_reference_rejected() -> Result<()> {
    let dir = project(&[("rec.rs", "fn rec\n    rec\n")])?;

    let graph = import(base_config(dir.path(), &[EdgeKind::Call])).await?;
    assert_eq!(graph.edge_count(), 0, "recursive call must not self-edge");

    // With the filter disabled the self-call shows up.
    let mut config = base_config(dir.path(), &[EdgeKind::Call]);
    config.avoid_self_references = false;
    let graph = import(config).await?;
    assert_eq!(edge_ids(&graph), vec!["Call#rec.rec#rec.rec".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_parent_reference_rejected() -> Result<()> {
    // The method shares its name with the enclosing class, so its
    // definition query resolves to the class node — its parent.
    let files = [("q.rs", "class thing\n    fn thing\n")];

    let dir = project(&files)?;
    let graph = import(base_config(dir.path(), &[EdgeKind::Definition])).await?;
    assert_eq!(graph.edge_count(), 0, "parent-directed edge must be dropped");

    let dir = project(&files)?;
    let mut config = base_config(dir.path(), &[EdgeKind::Definition]);
    config.avoid_parent_references = false;
    let graph = import(config).await?;
    assert_eq!(
        edge_ids(&graph),
        vec!["Definition#thing.thing#q.thing".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_nested_symbols_form_hierarchy() -> Result<()> {
    let dir = project(&[("nested.rs", "class Foo\n    fn bar\n        body\n")])?;
    let graph = import(base_config(dir.path(), &[])).await?;

    let class = graph.node("nested.Foo").context("class node")?;
    assert_eq!(class.type_name, "Class");
    assert_eq!(class.parent(), Some("nested.rs"));

    let method = graph.node("Foo.bar").context("method node")?;
    assert_eq!(method.type_name, "Function");
    assert_eq!(method.parent(), Some("nested.Foo"));
    assert_eq!(method.level(), 2);
    Ok(())
}

#[tokio::test]
async fn test_supertypes_create_extend_edges() -> Result<()> {
    let dir = project(&[("shapes.rs", "class Base\nclass Derived extends Base\n")])?;
    let graph = import(base_config(dir.path(), &[EdgeKind::Extend])).await?;

    assert_eq!(
        edge_ids(&graph),
        vec!["Extend#shapes.Derived#shapes.Base".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_gets_uuid_suffix() -> Result<()> {
    let dir = project(&[("a/mod.rs", "class Foo\n"), ("b/mod.rs", "class Foo\n")])?;
    let graph = import(base_config(dir.path(), &[])).await?;

    let foos: Vec<&Node> = graph
        .nodes()
        .filter(|n| n.type_name == "Class")
        .collect();
    assert_eq!(foos.len(), 2, "both classes must be imported");

    let mut ids: Vec<&str> = foos.iter().map(|n| n.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids[0], "mod.Foo");
    assert!(
        ids[1].starts_with("mod.Foo#"),
        "second id should carry a uuid suffix, got {}",
        ids[1]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_project_is_an_error() -> Result<()> {
    let dir = project(&[("README.md", "no source here")])?;
    let result = import(base_config(dir.path(), &[])).await;
    assert!(result.is_err(), "empty include set must fail the import");
    Ok(())
}

#[tokio::test]
async fn test_flat_symbol_reply_is_fatal() -> Result<()> {
    let dir = project(&[("a.rs", "fn foo\n")])?;
    let mut config = base_config(dir.path(), &[]);
    config.resolved = resolved(&["--flat-symbols"]);

    let error = match import(config).await {
        Err(e) => format!("{e:#}"),
        Ok(_) => String::from("import unexpectedly succeeded"),
    };
    assert!(
        error.contains("SymbolInformation"),
        "error should name the flat format: {error}"
    );
    assert!(error.contains("mockls"), "error should name the server: {error}");
    Ok(())
}

#[tokio::test]
async fn test_pushed_diagnostics_are_counted_and_aggregated() -> Result<()> {
    let dir = project(&[("src/lib.rs", "fn foo\n    body\n")])?;
    let mut config = base_config(dir.path(), &[]);
    config.timeout = Duration::from_secs(2);
    config.severities = [SeverityKind::Warning].into_iter().collect();

    let graph = import(config).await?;

    // mockls publishes one warning at 0:0-0:1, inside foo's range.
    let foo = graph.node("lib.foo").context("function node")?;
    assert_eq!(foo.attributes.int("Metrics.LSP_Warning"), Some(1));

    // Aggregation sums into the _SUM attribute up the hierarchy.
    assert_eq!(foo.attributes.int("Metrics.LSP_Warning_SUM"), Some(1));
    let file = graph.node("src/lib.rs").context("file node")?;
    assert_eq!(file.attributes.int("Metrics.LSP_Warning"), None);
    assert_eq!(file.attributes.int("Metrics.LSP_Warning_SUM"), Some(1));
    let src = graph.node("src/").context("directory node")?;
    assert_eq!(src.attributes.int("Metrics.LSP_Warning_SUM"), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_loc_aggregates_in_place() -> Result<()> {
    let dir = project(&[("src/lib.rs", "fn foo\n    body\n"), ("src/x.rs", "fn x\n")])?;
    let graph = import(base_config(dir.path(), &[])).await?;

    // foo spans one line, the file counts two; in-place aggregation adds
    // the symbol's span onto the file count.
    let file = graph.node("src/lib.rs").context("file node")?;
    assert_eq!(file.attributes.int("Metric.Lines.LOC"), Some(3));

    let src = graph.node("src/").context("directory node")?;
    assert_eq!(src.attributes.int("Metric.Lines.LOC"), Some(4));
    Ok(())
}

#[tokio::test]
async fn test_linear_lookup_matches_tree() -> Result<()> {
    let files = [("a.rs", "fn foo\n"), ("b.rs", "fn bar\n    foo\n")];

    let dir = project(&files)?;
    let tree = import(base_config(dir.path(), &[EdgeKind::Call, EdgeKind::Reference])).await?;

    let dir = project(&files)?;
    let mut config = base_config(dir.path(), &[EdgeKind::Call, EdgeKind::Reference]);
    config.optimized_lookup = false;
    let linear = import(config).await?;

    assert_eq!(edge_ids(&tree), edge_ids(&linear));
    assert_eq!(tree.node_count(), linear.node_count());
    Ok(())
}

#[tokio::test]
async fn test_exclude_dir_skips_files() -> Result<()> {
    let dir = project(&[("src/lib.rs", "fn foo\n"), ("vendor/dep.rs", "fn dep\n")])?;
    let mut config = base_config(dir.path(), &[]);
    config.exclude_dirs = vec!["vendor".to_string()];

    let graph = import(config).await?;
    assert!(graph.node("src/lib.rs").is_some());
    assert!(graph.node("vendor/dep.rs").is_none());
    assert!(graph.node("vendor/").is_none());
    Ok(())
}

#[tokio::test]
async fn test_repeated_import_is_deterministic() -> Result<()> {
    let files = [("a.rs", "fn foo\n"), ("b.rs", "fn bar\n    foo\n")];
    let dir = project(&files)?;

    let render = |graph: &Graph| -> Result<String> {
        let mut buffer = Vec::new();
        gxl::write(graph, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    };

    let first = import(base_config(dir.path(), &EdgeKind::TABLE)).await?;
    let second = import(base_config(dir.path(), &EdgeKind::TABLE)).await?;

    assert_eq!(render(&first)?, render(&second)?);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_aborts_import() -> Result<()> {
    let dir = project(&[("a.rs", "fn foo\n")])?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut timer = PhaseTimer::new(None);
    let result = Importer::new(base_config(dir.path(), &[]), cancel)
        .run(&mut timer)
        .await;

    let error = match result {
        Err(e) => format!("{e:#}"),
        Ok(_) => String::from("import unexpectedly succeeded"),
    };
    assert!(error.contains("cancelled"), "got: {error}");
    Ok(())
}
