use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rerun_cache::{CacheConfig, MemoCache};
use rerun_dash::render::render_blocks;
use rerun_dash::{Driver, Interaction, PageOptions, RerunOutput, Scenario, SessionReport, PAGES};

#[derive(Parser)]
#[command(name = "rerun-dash")]
#[command(about = "Rerun-driven dashboards over a shared memo cache", long_about = None)]
struct Cli {
    /// Maximum cached values (overrides RERUN_CACHE_MAX_ENTRIES)
    #[arg(long, global = true)]
    max_entries: Option<usize>,

    /// Maximum estimated size of cached values in bytes
    #[arg(long, global = true)]
    max_size_bytes: Option<usize>,

    /// Time-to-live for cached values, in seconds
    #[arg(long, global = true)]
    ttl_secs: Option<u64>,

    /// Deadline for a single computation, in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// SQLite database used by the histogram page
    #[arg(long, global = true, default_value = "./data/measurements.sqlite")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available pages
    Pages,

    /// Run one session on a page
    Run {
        /// Page name
        page: String,

        /// Set a widget before rerunning (repeatable), e.g. --set k=7
        #[arg(long = "set", value_name = "WIDGET=VALUE")]
        sets: Vec<String>,

        /// Press a button after the sets (repeatable)
        #[arg(long = "press", value_name = "BUTTON")]
        presses: Vec<String>,

        /// Print reruns as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replay a YAML scenario of concurrent sessions
    Replay {
        /// Scenario file
        file: PathBuf,

        /// Print every rerun, not just each session's last
        #[arg(short, long)]
        verbose: bool,
    },

    /// Drive many concurrent sessions with random interactions
    Simulate {
        /// Page name
        page: String,

        /// Number of concurrent sessions
        #[arg(short, long, default_value = "8")]
        sessions: usize,

        /// Interactions per session
        #[arg(long, default_value = "5")]
        steps: usize,

        /// Seed for the interaction generator
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rerun_dash=info,rerun_cache=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Commands::Pages = cli.command {
        println!("Pages:");
        for (name, description) in PAGES {
            println!("  {:<12} {}", name, description);
        }
        return Ok(());
    }

    let cache = MemoCache::new(cache_config(&cli)?)?;
    let _cleanup = cache.start_auto_cleanup();
    let driver = Driver::new(
        cache.clone(),
        PageOptions {
            db_path: cli.db.clone(),
        },
    );

    match cli.command {
        Commands::Pages => {}

        Commands::Run { ref page, ref sets, ref presses, json } => {
            let mut interactions = Vec::new();
            for raw in sets {
                interactions.push(Interaction::parse_set(raw)?);
            }
            interactions.extend(presses.iter().map(Interaction::press));

            let report = driver.run_script("cli", page, interactions).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.outputs)?);
            } else {
                for output in &report.outputs {
                    print_output(output);
                }
            }
        }

        Commands::Replay { ref file, verbose } => {
            let scenario = Scenario::load(file)?;
            let reports = driver.replay(&scenario).await?;
            print_reports(&reports, verbose);
        }

        Commands::Simulate { ref page, sessions, steps, seed } => {
            let started = std::time::Instant::now();
            let reports = driver.simulate(page, sessions, steps, seed).await?;
            print_reports(&reports, false);
            println!(
                "{} sessions x {} steps in {}ms",
                sessions,
                steps,
                started.elapsed().as_millis()
            );
        }
    }

    println!("\n{}", cache.stats());

    Ok(())
}

fn cache_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = CacheConfig::from_env().context("Invalid cache settings in environment")?;

    if let Some(max) = cli.max_entries {
        config.max_entries = max;
    }
    if let Some(size) = cli.max_size_bytes {
        config.max_size_bytes = size;
    }
    if let Some(secs) = cli.ttl_secs {
        config.default_ttl = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.timeout_secs {
        config.computation_timeout = Some(Duration::from_secs(secs));
    }

    config.validate()?;
    Ok(config)
}

fn print_output(output: &RerunOutput) {
    println!("--- {} ---", output.summary);
    print!("{}", render_blocks(&output.blocks));
}

fn print_reports(reports: &[SessionReport], verbose: bool) {
    for report in reports {
        let totals = report.totals();
        let status = if report.outputs.iter().any(|o| o.error.is_some()) {
            "✗"
        } else {
            "✓"
        };
        println!(
            "[{}] {} ({}) on {}: {} reruns, {} cached, {} computed, {} joined, {} failed",
            status,
            report.name,
            &report.session.to_string()[..8],
            report.page,
            report.outputs.len(),
            totals.hits,
            totals.computed,
            totals.coalesced,
            totals.errors
        );

        if verbose {
            for output in &report.outputs {
                print_output(output);
            }
        } else if let Some(last) = report.last() {
            print!("{}", render_blocks(&last.blocks));
        }
    }
}
