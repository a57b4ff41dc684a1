//! Kino CLI - Resource Loader Driver
//!
//! Features:
//! - Scheme checks (is a URL intercepted, and where is it fetched from)
//! - Asset prefetch with a live event feed
//! - Byte-range reads through the loading coordinator

use clap::{Parser, Subcommand};
use kino_loader::LoaderConfig;
use std::path::PathBuf;

mod commands;
mod output;

/// Kino CLI - Resource loader toolkit
#[derive(Parser)]
#[command(name = "kino-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Drive the Kino resource loader from the command line", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Loader configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a URL is intercepted and its upstream URL
    Check {
        /// Asset URL
        url: String,
    },

    /// Fetch an asset into the cache
    Prefetch {
        /// Asset URL in a custom scheme
        url: String,

        /// Extra request header, as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Read a byte range of an asset
    Read {
        /// Asset URL in a custom scheme
        url: String,

        /// First byte to read
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Number of bytes to read (default: to the end of the asset)
        #[arg(short, long)]
        length: Option<u64>,

        /// Write the bytes to a file
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let level = if cli.verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr);
    if output::OutputFormat::from(cli.format.as_str()) == output::OutputFormat::Json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = match &cli.config {
        Some(path) => LoaderConfig::from_path(path)?,
        None => LoaderConfig::default(),
    };
    kino_loader::init();

    match cli.command {
        Commands::Check { url } => {
            commands::check(&config, &url, &cli.format)?;
        }
        Commands::Prefetch { url, headers } => {
            commands::prefetch(config, &url, &headers, &cli.format).await?;
        }
        Commands::Read { url, offset, length, output } => {
            commands::read(config, &url, offset, length, output, &cli.format).await?;
        }
    }

    Ok(())
}
