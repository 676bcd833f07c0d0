// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Trellis CLI.
//!
//! Imports a source project through a language server and writes the
//! resulting hierarchical code graph as GXL.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use trellis::cli::ColorConfig;
use trellis::config::Config;
use trellis::graph::gxl;
use trellis::importer::{EdgeKind, ImportConfig, Importer, NodeKind, SeverityKind};
use trellis::lsp::LspHandler;
use trellis::perf::PhaseTimer;
use trellis::registry;

/// Command-line arguments for Trellis.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(version = env!("TRELLIS_VERSION"))]
#[command(about = "Imports a code graph from a language server and writes it as GXL")]
struct Args {
    /// The subcommand to run; a plain invocation imports.
    #[command(subcommand)]
    command: Option<Command>,

    /// Project root directory to analyse.
    root: Option<PathBuf>,

    /// Language server to use (see `trellis servers`).
    #[arg(long = "lsp-server")]
    lsp_server: Option<String>,

    /// GXL output file. The graph is discarded when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite the output file if it exists.
    #[arg(long)]
    overwrite: bool,

    /// Source directory to include (repeatable; project root when omitted).
    #[arg(long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Path prefix or `$`-terminated regex to exclude (repeatable).
    #[arg(long = "exclude-dir")]
    exclude_dirs: Vec<String>,

    /// Per-request LSP timeout in seconds.
    #[arg(long, default_value_t = 20)]
    timeout: u64,

    /// Edge kind to import (repeatable; all kinds when omitted).
    #[arg(long = "edge-kind", value_enum)]
    edge_kinds: Vec<EdgeKind>,

    /// Node kind to import (repeatable; all kinds when omitted).
    #[arg(long = "node-kind", value_enum)]
    node_kinds: Vec<NodeKind>,

    /// Diagnostic severity to count (repeatable; all when omitted).
    #[arg(long = "severity", value_enum)]
    severities: Vec<SeverityKind>,

    /// Keep edges whose source and target coincide.
    #[arg(long)]
    self_references: bool,

    /// Keep edges pointing at the source's parent node.
    #[arg(long)]
    parent_references: bool,

    /// Edge-phase task count (default: system-chosen).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Use the linear lookup path instead of the interval tree.
    #[arg(long)]
    linear_lookup: bool,

    /// Append per-phase timings to this CSV file.
    #[arg(long)]
    perf_csv: Option<PathBuf>,

    /// Capture the LSP byte streams to temp files.
    #[arg(long)]
    log_lsp: bool,

    /// Path to a configuration file with server overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Subcommands supported by Trellis.
#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered language servers.
    Servers {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Check which registered servers are installed and responsive.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },
}

/// Marks when any error-level event was emitted; a run that logged an
/// error exits non-zero even if it otherwise completed.
#[derive(Clone, Default)]
struct ErrorFlagLayer {
    seen: Arc<AtomicBool>,
}

impl<S: tracing::Subscriber> Layer<S> for ErrorFlagLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == Level::ERROR {
            self.seen.store(true, Ordering::SeqCst);
        }
    }
}

/// Entry point for the Trellis binary.
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let error_flag = ErrorFlagLayer::default();
    let seen_error = error_flag.seen.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(
                    EnvFilter::from_default_env()
                        .add_directive("trellis=info".parse().expect("valid directive")),
                ),
        )
        .with(error_flag)
        .init();

    let result = match args.command {
        None => run_import(args).await,
        Some(Command::Servers { nocolor }) => {
            run_servers(nocolor);
            Ok(())
        }
        Some(Command::Doctor { nocolor }) => run_doctor(args.config.clone(), nocolor).await,
    };

    match result {
        Ok(()) if !seen_error.load(Ordering::SeqCst) => ExitCode::SUCCESS,
        Ok(()) => {
            eprintln!("finished with errors (see log output)");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the import pipeline and writes the output file.
async fn run_import(args: Args) -> Result<()> {
    let Some(root) = args.root.clone() else {
        bail!("missing project root (try `trellis <ROOT> --lsp-server <NAME>`)");
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("project root does not exist: {}", root.display()))?;

    let Some(server_name) = args.lsp_server.as_deref() else {
        bail!(
            "missing --lsp-server; registered servers: {}",
            registry::names().join(", ")
        );
    };
    let Some(spec) = registry::find(server_name) else {
        bail!(
            "unknown server '{}'; registered servers: {}",
            server_name,
            registry::names().join(", ")
        );
    };

    if let Some(output) = &args.output
        && output.exists()
        && !args.overwrite
    {
        bail!(
            "output file {} exists; pass --overwrite to replace it",
            output.display()
        );
    }

    let config = Config::load(args.config.clone())?;
    let resolved = config.resolve(spec);
    if !binary_exists(&resolved.command) {
        bail!(
            "server executable '{}' not found on PATH (see {})",
            resolved.command,
            spec.url
        );
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested");
            ctrl_c_cancel.cancel();
        }
    });

    let import_config = ImportConfig {
        project_root: root.clone(),
        server: spec,
        resolved,
        include_dirs: args.include_dirs.clone(),
        exclude_dirs: args.exclude_dirs.clone(),
        timeout: Duration::from_secs(args.timeout),
        node_kinds: if args.node_kinds.is_empty() {
            NodeKind::all()
        } else {
            args.node_kinds.iter().copied().collect()
        },
        edge_kinds: if args.edge_kinds.is_empty() {
            EdgeKind::TABLE.into_iter().collect()
        } else {
            args.edge_kinds.iter().copied().collect()
        },
        severities: if args.severities.is_empty() {
            [
                SeverityKind::Error,
                SeverityKind::Warning,
                SeverityKind::Information,
                SeverityKind::Hint,
            ]
            .into_iter()
            .collect()
        } else {
            args.severities.iter().copied().collect()
        },
        avoid_self_references: !args.self_references,
        avoid_parent_references: !args.parent_references,
        jobs: args.jobs,
        optimized_lookup: !args.linear_lookup,
        log_wire: args.log_lsp,
    };

    let mut timer = PhaseTimer::new(args.perf_csv.clone());
    let importer = Importer::new(import_config, cancel);
    let graph = importer.run(&mut timer).await?;

    info!(
        "graph has {} nodes and {} edges (depth {})",
        graph.node_count(),
        graph.edge_count(),
        graph.max_depth()
    );

    if let Some(output) = &args.output {
        let phase = timer.start("output");
        gxl::write_to_path(&graph, output)?;
        timer.finish(phase);
        info!("wrote {}", output.display());
    } else {
        info!("no output file given; graph discarded");
    }

    timer.write_csv();
    Ok(())
}

/// Prints the server registry.
fn run_servers(nocolor: bool) {
    let colors = ColorConfig::new(nocolor);

    for spec in registry::SERVERS {
        let extensions: Vec<&str> = spec.extensions().collect();
        println!(
            "{}  {:<26}  {}",
            colors.cyan(&format!("{:<28}", spec.name)),
            spec.executable,
            colors.dim(&format!(".{}", extensions.join(" ."))),
        );
        println!("{}", colors.dim(&format!("{:<30}{}", "", spec.url)));
    }
}

/// Spawns each installed server against the current directory and
/// reports whether it initialises.
async fn run_doctor(config_file: Option<PathBuf>, nocolor: bool) -> Result<()> {
    let colors = ColorConfig::new(nocolor);
    let config = Config::load(config_file)?;
    let root = std::env::current_dir()?;

    for spec in registry::SERVERS {
        let resolved = config.resolve(spec);
        let name = format!("{:<28}", spec.name);

        if !binary_exists(&resolved.command) {
            println!("{}  {}", colors.dim(&name), colors.dim("- not installed"));
            continue;
        }

        match LspHandler::start(spec, &resolved, &root, Duration::from_secs(10), false).await {
            Ok(handler) => {
                let mut features = Vec::new();
                if handler.supports_document_symbols() {
                    features.push("symbols");
                }
                if handler.supports_hover() {
                    features.push("hover");
                }
                if handler.supports_definition() {
                    features.push("definition");
                }
                if handler.supports_references() {
                    features.push("references");
                }
                if handler.supports_implementation() {
                    features.push("implementation");
                }
                if handler.supports_call_hierarchy() {
                    features.push("calls");
                }
                println!(
                    "{}  {}  {}",
                    name,
                    colors.green("ready"),
                    colors.dim(&features.join(" "))
                );
                handler.stop().await;
            }
            Err(e) => {
                println!("{}  {}  {e:#}", name, colors.red("failed"));
            }
        }
    }
    Ok(())
}

/// Checks whether a binary can be found on `$PATH`.
fn binary_exists(command: &str) -> bool {
    // If the command contains a path separator, check it directly
    if command.contains('/') {
        return std::path::Path::new(command).exists();
    }

    // Search PATH
    let path_var = std::env::var("PATH").unwrap_or_default();
    std::env::split_paths(&path_var).any(|dir| dir.join(command).is_file())
}
