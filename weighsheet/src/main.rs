use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use weighsheet_core::{ReconcileConfig, Reconciler};

mod formatter;

#[derive(Parser)]
#[command(name = "weighsheet")]
#[command(about = "Reconcile invoice and packing sheets and allocate net weight per line", long_about = None)]
#[command(version)]
struct Cli {
    /// Excel files or directories to process
    #[arg(value_name = "PATH", required = true)]
    inputs: Vec<PathBuf>,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormat,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON output
    Json,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ReconcileConfig> {
    if let Some(config_path) = path {
        return ReconcileConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    // Try the working directory before falling back to the built-in patterns
    let default_config_path = PathBuf::from("weighsheet.toml");
    if default_config_path.exists() {
        ReconcileConfig::from_file(&default_config_path).with_context(|| {
            format!(
                "Failed to load config from {}",
                default_config_path.display()
            )
        })
    } else {
        Ok(ReconcileConfig::default())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let reconciler = Reconciler::from_config(&config).context("Invalid configuration")?;

    let batch = reconciler.process_batch(&cli.inputs)?;

    match cli.format {
        OutputFormat::Human => formatter::print_human(&batch),
        OutputFormat::Json => formatter::print_json(&batch)?,
    }

    std::process::exit(if batch.summary.has_failures() { 1 } else { 0 });
}
