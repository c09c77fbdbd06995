//! # Control Harmonizer CLI (`harmonize`)
//!
//! ## Usage
//!
//! ```bash
//! harmonize --config ./config/harmonize.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harmonize run --input FILE` | Harmonize a batch and print the result as JSON |
//! | `harmonize serve` | Start the HTTP server |
//! | `harmonize config` | Print the effective settings |
//!
//! ## Examples
//!
//! ```bash
//! # Harmonize a batch with the configured LLM
//! harmonize run --input controls.json
//!
//! # Heuristic summaries only, tailored to an organization
//! harmonize run --input controls.json --fast --org org.json
//!
//! # Read the batch from stdin
//! cat controls.json | harmonize run --input -
//! ```
//!
//! Logs go to stderr (`RUST_LOG` controls the level, default `info`), so
//! stdout of `run` is always the JSON result alone.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use control_harmonizer::config::{self, Config};
use control_harmonizer::models::{BatchRequest, OrgContext};
use control_harmonizer::pipeline::Harmonizer;
use control_harmonizer::server;

/// Control Harmonizer: clusters compliance controls from multiple frameworks
/// into unified controls.
///
/// Settings come from an optional TOML file plus environment overrides
/// (`CLUSTERING_EPS`, `LLM_MODEL`, `MAX_WORKERS`, ...). See
/// `config/harmonize.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "harmonize",
    about = "Cluster compliance controls across frameworks into unified controls",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When omitted, built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harmonize a batch of controls.
    ///
    /// The input is a JSON array of controls, or an object
    /// `{"controls": [...], "fast_mode": bool, "org_context": {...}}`.
    Run {
        /// Input file, or `-` for stdin.
        #[arg(long)]
        input: PathBuf,

        /// Skip the LLM and use heuristic summaries.
        #[arg(long)]
        fast: bool,

        /// Organization context JSON file; overrides any context in the input.
        #[arg(long)]
        org: Option<PathBuf>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print the effective configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::default_config()?,
    };

    match cli.command {
        Commands::Run { input, fast, org } => run(cfg, &input, fast, org.as_deref()).await,
        Commands::Serve => server::run_server(&cfg).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cfg.summary())?);
            Ok(())
        }
    }
}

async fn run(cfg: Config, input: &Path, fast: bool, org: Option<&Path>) -> Result<()> {
    let raw = read_input(input)?;
    let request: BatchRequest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse controls from {}", input.display()))?;
    let (controls, fast_mode, mut org_context) = request.into_parts();

    if let Some(path) = org {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read org context: {}", path.display()))?;
        let ctx: OrgContext = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse org context: {}", path.display()))?;
        org_context = Some(ctx);
    }

    let fast_mode = if fast { Some(true) } else { fast_mode };

    let harmonizer = Harmonizer::from_config(cfg)?;
    let result = harmonizer.harmonize(controls, fast_mode, org_context).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read controls from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))
}
