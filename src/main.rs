use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use data_tracker::client::HttpTransport;
use data_tracker::config::{Context, Settings};
use data_tracker::sync::Tracker;
use data_tracker::{Result, TrackerError};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sync(args) => execute_sync(args),
        Command::Validate(args) => execute_validate(args),
    }
}

fn execute_sync(args: SyncArgs) -> Result<()> {
    let settings = Settings::load(&args.settings)?;
    init_logging(&settings)?;

    let transport = HttpTransport::new(&settings.app.api_url, &settings.app.access_token)?;
    let context = Context::new(settings);
    let summary = Tracker::new(&context, &transport)
        .dry_run(args.dry_run)
        .run();

    println!(
        "run {}: {} mapping(s), {} skipped, {} failed request(s)",
        summary.run_id,
        summary.mappings.len(),
        summary.skipped(),
        summary.failed_requests()
    );
    Ok(())
}

fn execute_validate(args: SettingsArgs) -> Result<()> {
    let settings = Settings::load(&args.settings)?;
    println!(
        "settings OK: {} source(s), {} mapping(s)",
        settings.sources.len(),
        settings.mappings.len()
    );
    Ok(())
}

/// `RUST_LOG` takes precedence over the level from `app.json`.
fn init_logging(settings: &Settings) -> Result<()> {
    let level = settings.app.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| TrackerError::Logging(err.to_string()))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &settings.app.log_file_name {
        Some(file_name) => {
            let path = settings.resolve_path(file_name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            println!("Logging to file: {}", path.display());
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| TrackerError::Logging(err.to_string()))
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Keep sheets in sync with external tabular sources."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every configured mapping.
    Sync(SyncArgs),
    /// Load and validate the settings without contacting the store.
    Validate(SettingsArgs),
}

#[derive(clap::Args)]
struct SettingsArgs {
    /// Directory holding app.json, sources.json, and mapping.json.
    #[arg(long, default_value = "settings")]
    settings: PathBuf,
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Directory holding app.json, sources.json, and mapping.json.
    #[arg(long, default_value = "settings")]
    settings: PathBuf,

    /// Compute payloads and log them without sending any mutation.
    #[arg(long)]
    dry_run: bool,
}
