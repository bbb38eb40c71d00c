use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use runinfo_cache::ProjectAnnotations;
use runinfo_config::{config_path, load_workspace_config};
use runinfo_reconcile::FsDocuments;
use runinfod::annotate::{run_annotate_once, run_list_stores_once};
use runinfod::cli::{OutputFormat, content_roots};
use runinfod::init::run_init_config_once;
use runinfod::watcher::{WatchOptions, run_watch_loop};

#[derive(Debug, Parser)]
#[command(author, version, about = "Runtime-info annotation daemon")]
struct Cli {
    #[arg(long, default_value = ".", help = "Workspace root holding .runinfo/config.toml")]
    workspace: PathBuf,

    #[arg(
        long = "root",
        value_name = "MODULE=PATH",
        help = "Content root of a module; repeatable. Defaults to the workspace as module 'main'"
    )]
    roots: Vec<String>,

    #[arg(long, help = "Debounce window for watcher events; overrides the config file")]
    debounce_ms: Option<u64>,

    #[arg(
        long,
        conflicts_with = "list_stores",
        help = "Print the annotations that apply to FILE and exit"
    )]
    annotate: Option<PathBuf>,

    #[arg(long, help = "Print discovered stores and exit")]
    list_stores: bool,

    #[arg(
        long,
        conflicts_with_all = ["annotate", "list_stores"],
        help = "Write .runinfo/config.toml with default values and exit"
    )]
    init_config: bool,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format for --annotate and --list-stores: table or json"
    )]
    output: OutputFormat,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = parse_cli();
    run(cli)
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    if cli.init_config {
        let mut out = std::io::stdout();
        return run_init_config_once(&workspace, &mut out);
    }

    let config = load_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    let roots = content_roots(&cli.roots, &workspace).map_err(anyhow::Error::msg)?;
    let project = ProjectAnnotations::open(&roots, &config);

    if cli.list_stores {
        let mut out = std::io::stdout();
        return run_list_stores_once(&project, cli.output, &mut out);
    }

    if let Some(file) = cli.annotate {
        let file = file
            .canonicalize()
            .with_context(|| format!("failed to resolve file path {}", file.display()))?;
        let mut out = std::io::stdout();
        return run_annotate_once(&project, &file, &FsDocuments, cli.output, &mut out);
    }

    let options = WatchOptions {
        debounce: Duration::from_millis(cli.debounce_ms.unwrap_or(config.watch.debounce_ms)),
        poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
    };
    run_watch_loop(&project, &options)
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}
