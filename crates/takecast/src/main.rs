//! TakeCast CLI: patch a sender's embedded root CA, or run the receiver and
//! record incoming mirroring streams.

mod chrome;
mod record;
mod webm;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "takecast", version, about = "Google Cast receiver")]
struct Cli {
    /// Dir to load/create ca.crt and ca.key
    #[arg(short = 'd', long, global = true, default_value = ".")]
    cert_dir: PathBuf,

    /// Log level (debug, info, warn, error, or off)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Patch Chrome for use with TakeCast
    Patch {
        /// Path to the Chrome parent dir
        chrome_dir: PathBuf,
    },
    /// Unpatch an already-patched Chrome
    Unpatch {
        /// Path to the Chrome parent dir
        chrome_dir: PathBuf,
    },
    /// Record all incoming streams as WebM
    Record {
        /// Template to create the filename each stream is saved as;
        /// `{index}` is a session counter starting at 1
        #[arg(short = 'o', long, default_value = "./stream-{index}.webm")]
        out_filename_template: String,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match level {
        "debug" | "info" | "warn" | "error" => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
        }
        "off" => EnvFilter::new("off"),
        other => bail!("unrecognized log level {other:?}"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    match cli.command {
        Command::Patch { chrome_dir } => chrome::patch(&cli.cert_dir, &chrome_dir),
        Command::Unpatch { chrome_dir } => chrome::unpatch(&cli.cert_dir, &chrome_dir),
        Command::Record {
            out_filename_template,
        } => record::run(&cli.cert_dir, &out_filename_template).await,
    }
}
