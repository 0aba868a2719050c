//! # Upload Harness CLI (`upharness`)
//!
//! Runs the upload server and offers two offline helpers for inspecting
//! parse results without going through HTTP.
//!
//! ## Usage
//!
//! ```bash
//! upharness [--config ./config/upharness.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `upharness serve` | Start the HTTP server |
//! | `upharness parse <path>` | Parse a local file and print the content as JSON |
//! | `upharness latest` | Print the most recently saved artifact |
//!
//! Log verbosity follows `RUST_LOG` (default `upload_harness=info,tower_http=info`).
//! Logs go to stderr so command output on stdout stays machine-readable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_harness::config::{self, Config};
use upload_harness::extract::parse_named;
use upload_harness::get::{latest_saved_data, RetrieveError};
use upload_harness::server;
use upload_harness::storage::Storage;

/// Upload Harness: parse uploaded JSON, CSV, TXT and XLSX files and serve
/// the latest result.
#[derive(Parser)]
#[command(
    name = "upharness",
    about = "Upload Harness: parse uploaded JSON, CSV, TXT and XLSX files and serve the latest result",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Optional; every setting has a default (`uploads/`, `saved_data/`,
    /// `127.0.0.1:5000`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Creates the upload and saved-data directories, then serves
    /// `POST /upload`, `GET /api/data`, and `GET /health`.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Parse a local file and print the result.
    ///
    /// Uses the same extension dispatch as `POST /upload`. Nothing is
    /// written to the storage directories.
    Parse {
        /// File to parse (`.json`, `.csv`, `.txt`, or `.xlsx`).
        path: PathBuf,
    },

    /// Print the most recently saved artifact.
    Latest,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_harness=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
                config::validate(&cfg)?;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Parse { path } => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("not a file path: {}", path.display()))?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let content = parse_named(&file_name, &bytes)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            println!("{}", content.to_pretty_json()?);
        }
        Commands::Latest => {
            let storage = Storage::new(&cfg.storage);
            match latest_saved_data(&storage).await {
                Ok(saved) => {
                    eprintln!("{}", saved.path.display());
                    println!("{}", serde_json::to_string_pretty(&saved.data)?);
                }
                Err(RetrieveError::NoData) => anyhow::bail!("no data available"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
