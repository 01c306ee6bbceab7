//! iccid-lookup CLI
//!
//! Resolves a list of partial ICCIDs to MSISDNs by driving the operator
//! portal open in a browser tab with the bridge extension enabled.
//!
//! Usage:
//!   iccid-lookup run --input partials.txt --copy
//!   pbpaste | iccid-lookup run --format table
//!   iccid-lookup normalize --input partials.txt
//!   iccid-lookup config --config lookup.yaml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use iccid_lookup::export::{
    default_export_file_name, detailed_table, spreadsheet_column, to_json, write_text_file,
};
use iccid_lookup::{
    browser_engine, BatchEvent, BatchResult, ExtensionBridge, IdentifierNormalizer, LookupConfig,
    LookupError,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod progress;
mod utils;

use crate::utils::{init_logging, read_input};

#[derive(Parser)]
#[command(name = "iccid-lookup")]
#[command(about = "📇 Batch ICCID → MSISDN lookup through the operator portal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every partial ICCID in the input, in order
    Run(RunArgs),
    /// Print the full ICCIDs the input expands to, without touching the portal
    Normalize(NormalizeArgs),
    /// Print the effective configuration as YAML
    Config(ConfigArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lower")]
enum OutputFormat {
    /// One MSISDN per line, blank where unresolved
    #[default]
    Column,
    Table,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// File with one partial ICCID per line (stdin when omitted)
    #[clap(long, short)]
    input: Option<PathBuf>,

    /// YAML configuration file
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Override the fixed ICCID prefix
    #[clap(long)]
    prefix: Option<String>,

    /// Address the extension bridge listens on
    #[clap(long)]
    bridge_addr: Option<String>,

    #[clap(long, short, value_enum, default_value_t = OutputFormat::Column)]
    format: OutputFormat,

    /// Also write the formatted results to this file
    #[clap(long, short)]
    output: Option<PathBuf>,

    /// Save a timestamped detailed table in the current directory
    #[clap(long)]
    save: bool,

    /// Copy the MSISDN column to the clipboard
    #[clap(long)]
    copy: bool,
}

#[derive(Parser, Debug)]
struct NormalizeArgs {
    #[clap(long, short)]
    input: Option<PathBuf>,

    #[clap(long, short)]
    config: Option<PathBuf>,

    #[clap(long)]
    prefix: Option<String>,
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    #[clap(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_logging()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Normalize(args) => normalize(args),
        Commands::Config(args) => show_config(args),
    }
}

fn load_config(path: Option<&Path>, prefix: Option<String>) -> Result<LookupConfig> {
    let mut config = LookupConfig::load(path).context("Failed to load configuration")?;
    if let Some(prefix) = prefix {
        config.prefix = prefix;
        config.validate()?;
    }
    Ok(config)
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), args.prefix.clone())?;
    if let Some(addr) = &args.bridge_addr {
        config.bridge.addr = addr.clone();
    }

    let text = read_input(args.input.as_deref())?;
    let normalizer = IdentifierNormalizer::new(config.prefix.clone())?;
    let requests = match normalizer.normalize_text(&text) {
        Ok(requests) => requests,
        Err(LookupError::EmptyInput) => {
            eprintln!(
                "{} no identifiers in the input, nothing to look up",
                "⚠️  Warning:".yellow().bold()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let bridge = ExtensionBridge::start(&config.bridge.addr).await?;
    eprintln!(
        "🔌 Waiting for the portal tab on {} (up to {}s)...",
        config.bridge.addr,
        config.bridge.connect_timeout.as_secs()
    );
    bridge.wait_for_client(config.bridge.connect_timeout).await?;

    let mut engine = browser_engine(&config, bridge)?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current item");
                cancel.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::unbounded_channel::<BatchEvent>();
    let renderer = tokio::spawn(progress::render(rx));
    let outcome = engine.run(requests, &tx, &cancel).await;
    drop(tx);
    let _ = renderer.await;
    ctrl_c.abort();

    let result = outcome?;
    info!(summary = ?result.summary(), "Batch finished");
    emit(&result, &args)
}

fn emit(result: &BatchResult, args: &RunArgs) -> Result<()> {
    let formatted = match args.format {
        OutputFormat::Column => spreadsheet_column(result),
        OutputFormat::Table => detailed_table(result),
        OutputFormat::Json => to_json(result)?,
    };
    println!("{formatted}");

    if let Some(path) = &args.output {
        write_text_file(path, &formatted)?;
        eprintln!("💾 Results written to {}", path.display());
    }

    if args.save {
        let path = PathBuf::from(default_export_file_name(&chrono::Local::now()));
        write_text_file(&path, &detailed_table(result))?;
        eprintln!("💾 Saved {}", path.display());
    }

    if args.copy {
        copy_to_clipboard(spreadsheet_column(result));
    }
    Ok(())
}

fn copy_to_clipboard(text: String) {
    match arboard::Clipboard::new() {
        Ok(mut clipboard) => {
            if let Err(e) = clipboard.set_text(text) {
                warn!("Failed to copy to clipboard: {}", e);
            } else {
                eprintln!("📋 MSISDN column copied to clipboard");
            }
        }
        Err(e) => warn!("Failed to access clipboard: {}", e),
    }
}

fn normalize(args: NormalizeArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.prefix)?;
    let normalizer = IdentifierNormalizer::new(config.prefix)?;
    let text = read_input(args.input.as_deref())?;
    for request in normalizer.normalize_text(&text)? {
        println!("{}", request.full_id());
    }
    Ok(())
}

fn show_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), None)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
