//! ledm-scan - Command-line scanning for LEDM network scanners
//!
//! A thin front-end over `ledm-client`: picks the scan size and output file,
//! then lets the library drive the scanner.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledm_client::{DeviceClient, Scanner, ScannerConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::SizePreset;
use crate::config::{Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ledm-scan")]
#[command(author, version, about = "Scan photos from an LEDM network scanner")]
#[command(propagate_version = true)]
struct Cli {
    /// Scanner host name or address
    #[arg(long, env = "LEDM_SCAN_HOST")]
    host: Option<String>,

    /// Scanner HTTP port
    #[arg(short, long, env = "LEDM_SCAN_PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, env = "LEDM_SCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Full scanner client configuration (YAML)
    #[arg(long)]
    scanner_config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the scanner state
    Status,

    /// Scan from the flatbed into a JPEG file
    Scan {
        /// Print size to scan
        #[arg(short, long, value_enum, default_value = "6x4", conflicts_with_all = ["width", "height"])]
        size: SizePreset,

        /// Scan width in pixels
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Scan height in pixels
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// File name without extension (default: timestamp)
        #[arg(short, long)]
        name: Option<String>,

        /// Directory to write the scan to (default: current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Ask the scanner to cancel a job
    Cancel {
        /// Job URL as reported by the scanner
        job_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(cli.host.as_deref(), cli.port, cli.no_color);

    // Create output context
    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    let scanner_config = scanner_config(&cli, &merged)?;
    tracing::debug!("Using scanner at {}", scanner_config.base_url());

    let result = match &cli.command {
        Commands::Status => {
            let client = create_client(scanner_config)?;
            commands::status(&client, &ctx).await
        }

        Commands::Scan {
            size,
            width,
            height,
            name,
            dir,
        } => {
            let (width, height) = match (width, height) {
                (Some(w), Some(h)) => (*w, *h),
                _ => size.dimensions(scanner_config.scan.resolution),
            };

            let dir = match dir.clone().or(merged.output_dir.clone()) {
                Some(dir) => dir,
                None => std::env::current_dir().context("Could not determine current directory")?,
            };
            let output = commands::resolve_output_path(&dir, name.as_deref())?;

            let scanner = Scanner::new(create_client(scanner_config)?);
            commands::scan(&scanner, width, height, &output, &ctx).await
        }

        Commands::Cancel { job_url } => {
            let client = create_client(scanner_config)?;
            commands::cancel(&client, job_url, &ctx).await
        }
    };

    if let Err(e) = result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

/// Build the scanner client configuration from the YAML file and flags
fn scanner_config(cli: &Cli, merged: &MergedConfig) -> Result<ScannerConfig> {
    let Some(path) = &cli.scanner_config else {
        return Ok(ScannerConfig::builder(merged.host.clone())
            .port(merged.port)
            .build());
    };

    let mut config = ScannerConfig::from_yaml_file(path)
        .with_context(|| format!("Failed to load scanner config: {}", path.display()))?;

    // Explicit flags still win over the file
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    Ok(config)
}

/// Create a scanner client for the given configuration
fn create_client(config: ScannerConfig) -> Result<DeviceClient> {
    DeviceClient::new(config).context("Failed to create scanner client")
}
