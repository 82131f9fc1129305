use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use cutoff_engine::{
    commands::{
        bulk_discover, discover, execute, export_cutoffs, import_cutoffs, stats, validate,
    },
    config::Settings,
    context::AppContext,
    models::TimeRange,
};
use std::path::PathBuf;

const DEFAULT_EXPORT_FILE: &str = "../data/cutoffs-export.json";

#[derive(Parser)]
#[command(name = "cutoff-engine")]
#[command(about = "Discovers historical data cutoffs and validates backtest periods")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the earliest available data timestamp for a market
    Discover {
        /// Market identifier (exchange + instrument + contract type)
        market_id: String,
        /// Rediscover even if a record already exists
        #[arg(long)]
        force: bool,
    },
    /// Validate a backtest period against the known cutoff
    Validate {
        market_id: String,
        /// Period start (YYYY-MM-DD)
        start: String,
        /// Period end (YYYY-MM-DD)
        end: String,
        /// Run discovery first when the market has no stored cutoff
        #[arg(long)]
        discover: bool,
    },
    /// Validate (and optionally adjust) a period, then submit the backtest
    Execute {
        market_id: String,
        /// Period start (YYYY-MM-DD)
        start: String,
        /// Period end (YYYY-MM-DD)
        end: String,
        /// Accept a proposed range adjustment instead of rejecting
        #[arg(long)]
        auto_adjust: bool,
        /// Rediscover the cutoff before validating
        #[arg(long)]
        force_rediscover: bool,
    },
    /// Discover cutoffs for many markets concurrently
    BulkDiscover {
        /// Comma or space separated market identifiers
        #[arg(value_delimiter = ',', num_args = 1..)]
        markets: Vec<String>,
        /// Concurrent discovery runs
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Rediscover markets that already have records
        #[arg(long)]
        force: bool,
    },
    /// Summarize the stored cutoff dataset
    Stats,
    /// Export all cutoff records to a JSON file
    Export {
        /// Destination file
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Import cutoff records from a JSON file
    Import {
        /// Source file
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::initialize(Settings::from_env())?;

    match command {
        Commands::Discover { market_id, force } => {
            discover::run(&app_context, &market_id, force).await?;
        }
        Commands::Validate {
            market_id,
            start,
            end,
            discover,
        } => {
            let range = parse_range(&start, &end)?;
            validate::run(&app_context, &market_id, range, discover).await?;
        }
        Commands::Execute {
            market_id,
            start,
            end,
            auto_adjust,
            force_rediscover,
        } => {
            let range = parse_range(&start, &end)?;
            execute::run(&app_context, &market_id, range, auto_adjust, force_rediscover).await?;
        }
        Commands::BulkDiscover {
            markets,
            concurrency,
            force,
        } => {
            bulk_discover::run(&app_context, &markets, concurrency, force).await?;
        }
        Commands::Stats => {
            stats::run(&app_context).await?;
        }
        Commands::Export { output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE));
            export_cutoffs::run(&app_context, &output_path).await?;
        }
        Commands::Import { input } => {
            import_cutoffs::run(&app_context, &input).await?;
        }
    }

    Ok(())
}

fn parse_range(start: &str, end: &str) -> Result<TimeRange> {
    let start = parse_date_arg("start", start)?;
    let end = parse_date_arg("end", end)?;
    if end <= start {
        return Err(anyhow!(
            "end ({}) must be after start ({})",
            end.format("%Y-%m-%d"),
            start.format("%Y-%m-%d")
        ));
    }
    Ok(TimeRange::new(start, end))
}

fn parse_date_arg(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("{} must be a date in YYYY-MM-DD format (value: {})", name, raw))?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("{} is not a representable date", name))?,
        Utc,
    ))
}
