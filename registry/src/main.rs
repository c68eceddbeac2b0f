//! `able-registry` entry point.
//!
//! ## Commands
//!
//! - `able-registry list [--json]`
//! - `able-registry bundle <PROJECT> [--subject JSON]`
//! - `able-registry watch`
//!
//! Logs go to stderr (`RUST_LOG`, default `info`) so bundle output on stdout
//! can be piped straight into a file.

use std::path::PathBuf;

use able_registry::Registry;
use able_registry::config::AppConfig;
use able_registry::config::ConfigLoader;
use anyhow::Context;
use clap::Parser;
use clap::Subcommand;

/// Experiment registry: sync projects and render client bundles
#[derive(Debug, Parser)]
#[command(name = "able-registry", version)]
struct Cli {
    /// Config file (defaults to ./able.toml, then ~/.config/able/config.toml)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the registry once and list its projects
    List(ListArgs),

    /// Load the registry once and print a client bundle
    Bundle(BundleArgs),

    /// Keep the registry in sync until interrupted
    Watch,
}

#[derive(Debug, Parser)]
struct ListArgs {
    /// Output as JSON instead of text
    #[arg(long = "json", short = 'j')]
    json: bool,
}

#[derive(Debug, Parser)]
struct BundleArgs {
    /// Project name
    project: String,

    /// Subject identity/context as JSON
    #[arg(long = "subject", short = 's', default_value = "{}")]
    subject: String,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::new().with_file(path).load(),
        None => ConfigLoader::load_default(),
    };
    config.context("failed to load configuration")
}

/// Load once; in remote mode this pulls and then cancels the poll loop.
async fn load_once(registry: &Registry) -> anyhow::Result<()> {
    let result = registry.load().await;
    registry.stop();
    result.context("failed to load registry")
}

async fn list(registry: &Registry, args: ListArgs) -> anyhow::Result<()> {
    load_once(registry).await?;

    let mut projects = registry.all();
    projects.sort_by(|a, b| a.name().cmp(b.name()));

    if args.json {
        let listing: Vec<serde_json::Value> = projects
            .iter()
            .map(|project| {
                serde_json::json!({
                    "name": project.name(),
                    "experiments": project.experiments().len(),
                    "directory": project.directory().map(|dir| dir.display().to_string()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for project in projects {
            println!("{}\t{}", project.name(), project.experiments().len());
        }
    }
    Ok(())
}

async fn bundle(registry: &Registry, args: BundleArgs) -> anyhow::Result<()> {
    let subject: serde_json::Value =
        serde_json::from_str(&args.subject).context("--subject must be valid JSON")?;
    load_once(registry).await?;

    if registry.lookup(&args.project).is_none() {
        tracing::warn!(project = %args.project, "unknown project; rendering empty bundle");
    }
    println!("{}", registry.bundle(&args.project, &subject));
    Ok(())
}

async fn watch(registry: &Registry) -> anyhow::Result<()> {
    if registry.remote().is_none() {
        tracing::warn!(
            dir = %registry.project_dir().display(),
            "no remote registry configured; loading the directory once"
        );
    }

    // The first failure is already logged; watch mode keeps polling.
    if let Err(err) = registry.load().await
        && registry.remote().is_none()
    {
        return Err(err).context("failed to load registry");
    }

    if registry.is_watching() {
        tracing::info!(
            interval_secs = registry.poll_interval().as_secs(),
            "watching registry; press Ctrl-C to stop"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("signal received, stopping");
    registry.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    tracing::debug!(?config, "configuration loaded");

    let registry = Registry::from_config(&config).await?;
    tracing::info!(
        "able-registry v{} using {}",
        able_registry::VERSION,
        registry.project_dir().display()
    );

    match cli.command {
        Command::List(args) => list(&registry, args).await,
        Command::Bundle(args) => bundle(&registry, args).await,
        Command::Watch => watch(&registry).await,
    }
}
