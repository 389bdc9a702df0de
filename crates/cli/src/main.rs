//! Deriv Radar: leverage signal analyzer for Deriv bot runners
//!
//! Usage:
//!   deriv-radar run-radar --all                 Poll every running bot until Ctrl+C
//!   deriv-radar run-radar --bot-id 7 --once     One cycle for bot 7, then exit
//!   deriv-radar patterns [--json]               List the pattern registry
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 backend error.

use clap::{ArgGroup, Parser, Subcommand};
use engine::{
    default_definitions, run_radar, BotSelection, PatternMatcher, PatternRegistry,
    ProfileOverrides, RadarConfig, RadarContext, RadarError, RadarSummary,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const EXIT_CONFIG: u8 = 1;
const EXIT_BACKEND: u8 = 2;

#[derive(Parser)]
#[command(name = "deriv-radar")]
#[command(about = "Pattern radar publishing safe-to-operate signals for Deriv bots", long_about = None)]
#[command(version = APP_VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll bots and publish signals
    #[command(group(ArgGroup::new("selection").required(true).args(["bot_id", "all"])))]
    RunRadar {
        /// Bot id to poll (repeatable)
        #[arg(long = "bot-id")]
        bot_id: Vec<String>,
        /// Poll every bot that is active and running
        #[arg(long)]
        all: bool,
        /// Seconds between cycles, overrides the bot profiles
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: Option<u64>,
        /// Operations per window, overrides the bot profiles
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
        window_size: Option<u32>,
        /// Use a local SQLite database instead of Supabase
        #[arg(long)]
        sqlite: Option<PathBuf>,
        /// Run a single cycle per bot and exit
        #[arg(long)]
        once: bool,
    },
    /// List the registered patterns
    Patterns {
        /// Print the pattern definitions as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,deriv_radar=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,deriv_radar=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors
            let code = if e.use_stderr() { EXIT_CONFIG } else { 0 };
            e.print().ok();
            return ExitCode::from(code);
        }
    };
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let result = match cli.command {
        Commands::RunRadar {
            bot_id,
            all,
            poll_interval,
            window_size,
            sqlite,
            once,
        } => {
            let selection = if all {
                BotSelection::All
            } else {
                BotSelection::Ids(bot_id)
            };
            let overrides = ProfileOverrides {
                poll_interval_secs: poll_interval,
                window_size,
            };
            cmd_run_radar(selection, overrides, sqlite, once).await
        }
        Commands::Patterns { json } => cmd_patterns(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Configuration problems exit 1, everything else is a backend failure
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<RadarError>() {
        Some(RadarError::Config(_)) => EXIT_CONFIG,
        _ => EXIT_BACKEND,
    }
}

// ============================================================================
// run-radar
// ============================================================================

async fn cmd_run_radar(
    selection: BotSelection,
    overrides: ProfileOverrides,
    sqlite: Option<PathBuf>,
    once: bool,
) -> anyhow::Result<()> {
    println!("\n=== Deriv Radar v{} ===", APP_VERSION);

    let config = RadarConfig::from_env(sqlite)?;
    let ctx = RadarContext::connect(&config).await?;

    match &selection {
        BotSelection::All => println!("Bots: all running"),
        BotSelection::Ids(ids) => println!("Bots: {}", ids.join(", ")),
    }
    println!("Mode: {}", if once { "single cycle" } else { "continuous" });
    if !once {
        println!("Press Ctrl+C to stop");
    }
    println!();

    let ctx_for_ctrlc = ctx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, stopping pollers after their current cycle...");
        ctx_for_ctrlc.shutdown();
    });

    let summary = run_radar(&ctx, &selection, &overrides, once)
        .await
        .map_err(|e| anyhow::Error::new(e).context("radar startup failed"))?;

    print_summary(&ctx, &summary);

    if let Some(err) = failure_outcome(&summary, once) {
        return Err(err);
    }
    for (bot_id, e) in &summary.failures {
        warn!(bot_id = %bot_id, kind = e.kind(), "Bot poller failed");
    }
    Ok(())
}

/// Every poller died, or a one-shot cycle failed: surface the first cause
fn failure_outcome(summary: &RadarSummary, once: bool) -> Option<anyhow::Error> {
    if !(summary.all_failed() || once) {
        return None;
    }
    let (bot_id, e) = summary.failures.first()?;
    let what = if once {
        "single cycle failed"
    } else {
        "all bot pollers stopped"
    };
    Some(
        anyhow::Error::new(RadarError::Fetch(e.to_string()))
            .context(format!("{what}, first failure on bot {bot_id}")),
    )
}

fn print_summary(ctx: &RadarContext, summary: &RadarSummary) {
    if summary.bots.is_empty() {
        println!("No bots polled.");
        return;
    }

    println!(
        "\n{:<10} {:<28} {:<16} {:>7} {:>8}  Last signal",
        "Bot", "Name", "Phase", "Cycles", "Signals"
    );
    println!("{}", "-".repeat(96));
    for snapshot in ctx.progress.snapshots() {
        let last = match (&snapshot.last_safe, &snapshot.last_reason) {
            (Some(true), Some(reason)) => format!("SAFE  {reason}"),
            (Some(false), Some(reason)) => format!("BLOCK {reason}"),
            _ => "-".to_string(),
        };
        let last = match &snapshot.last_error {
            Some(err) if snapshot.failed => format!("FAILED {err}"),
            _ => last,
        };
        println!(
            "{:<10} {:<28} {:<16} {:>7} {:>8}  {}",
            snapshot.bot_id,
            snapshot.bot_name,
            snapshot.phase.label(),
            snapshot.cycles,
            snapshot.signals_published,
            last
        );
    }
    println!();
}

// ============================================================================
// patterns
// ============================================================================

fn cmd_patterns(json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&default_definitions())?);
        return Ok(());
    }

    let registry = PatternRegistry::default();

    println!("\n{:<18} {:<18} {:>11} {:>12}", "Id", "Name", "Assertivity", "Min history");
    println!("{}", "-".repeat(62));
    for matcher in registry.matchers() {
        println!(
            "{:<18} {:<18} {:>10}% {:>12}",
            matcher.id(),
            matcher.display_name(),
            (matcher.assertivity() * Decimal::ONE_HUNDRED).round_dp(1),
            matcher.min_history()
        );
    }
    println!();
    Ok(())
}
