use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use hcp_targeting::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hcpq")]
#[command(about = "HCP targeting CLI - run query plans against provider and claims data", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show summary statistics for the loaded data
    Stats(StatsArgs),
    /// Execute a query plan and print the result rows as JSON
    Run(RunArgs),
    /// Check a plan document without loading any data
    Validate(ValidateArgs),
    /// Write the effective configuration to a TOML file
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct DataArgs {
    /// Provider CSV file
    #[arg(short, long)]
    providers: Option<PathBuf>,
    /// Claims CSV file
    #[arg(short, long)]
    claims: Option<PathBuf>,
    /// Show progress bars while loading
    #[arg(long)]
    progress: bool,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Number of top specialties to list
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Plan document, or "-" to read it from stdin
    #[arg(long)]
    plan: PathBuf,
    /// Fixed "today" for relative date filters (YYYY-MM-DD)
    #[arg(long)]
    reference_date: Option<NaiveDate>,
    /// Budget for the filter chain in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Print columns and total_matches along with the rows
    #[arg(long)]
    full: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Plan document, or "-" to read it from stdin
    plan: PathBuf,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Destination file (defaults to the platform config directory)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::load(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Stats(args) => cmd_stats(config, args),
        Commands::Run(args) => cmd_run(config, args),
        Commands::Validate(args) => cmd_validate(args),
        Commands::InitConfig(args) => cmd_init_config(config, args),
    }
}

fn apply_data_args(mut config: EngineConfig, data: DataArgs) -> EngineConfig {
    if data.providers.is_some() {
        config.providers_path = data.providers;
    }
    if data.claims.is_some() {
        config.claims_path = data.claims;
    }
    config.show_progress |= data.progress;
    config
}

fn read_plan(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading plan from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading plan {}", path.display()))
    }
}

fn cmd_stats(config: EngineConfig, args: StatsArgs) -> Result<()> {
    let config = apply_data_args(config, args.data);
    let dataset = DatasetBuilder::from_config(&config)
        .build()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    dataset.statistics().print_summary();

    let top = dataset.analytics().top(ListField::Specialties, args.top);
    if !top.is_empty() {
        println!("\nTop Specialties:");
        for (specialty, count) in top {
            println!("  {:<40} {}", specialty, count);
        }
    }
    Ok(())
}

fn cmd_run(config: EngineConfig, args: RunArgs) -> Result<()> {
    let mut config = apply_data_args(config, args.data);
    if args.reference_date.is_some() {
        config.reference_date = args.reference_date;
    }
    if args.timeout_ms.is_some() {
        config.filter_timeout_ms = args.timeout_ms;
    }

    let text = read_plan(&args.plan)?;
    // validate before paying for the load
    let plan = PlanDocument::from_json(&text).map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let engine = PlanEngine::from_config(config).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let result = engine.execute(&plan).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    tracing::info!(rows = result.len(), total_matches = result.total_matches, "plan executed");

    let output = if args.full {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string_pretty(&result.to_json())?
    };
    println!("{}", output);
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let text = read_plan(&args.plan)?;
    match PlanDocument::from_json(&text) {
        Ok(plan) => {
            println!("Plan OK: {} ({} provider filter(s), limit {})",
                plan.query_type.as_str(),
                plan.filters.len(),
                plan.limit
            );
            if let Some(notes) = plan.plan_notes.as_deref() {
                println!("Notes: {}", notes);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn cmd_init_config(config: EngineConfig, args: InitConfigArgs) -> Result<()> {
    let path = args.output
        .or_else(EngineConfig::default_config_path)
        .context("no config directory available; pass --output")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(&path).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
