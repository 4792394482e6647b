//! CLI entry point for the ballast rebalancer.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use ballast::clock::{Clock, SystemClock};
use ballast::config::{Config, ExecutionMode};
use ballast::drift;
use ballast::engine::{self, Engine, RunOptions};
use ballast::error::{Error, Result};
use ballast::exchange::{ExchangeClient, MarketData};
use ballast::paper::PaperExchange;
use ballast::portfolio::Portfolio;
use ballast::scheduler;
use ballast::store::{self, EventStore, LogNotifier};
use ballast::types::Venue;

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Dual-venue portfolio rebalancer")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate the trigger, plan, confirm, and execute
    Run {
        /// Path to portfolio.json
        portfolio: PathBuf,

        /// Show the validated plan without executing
        #[arg(long)]
        dry_run: bool,

        /// Trigger manually and skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show holdings and weights across both venues
    Holdings {
        /// Path to portfolio.json
        portfolio: PathBuf,
    },

    /// Re-evaluate the trigger on a recurring timer
    Watch {
        /// Path to portfolio.json
        portfolio: PathBuf,

        /// Stop after this many ticks (default: run until stopped)
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Show recent rebalance events from the event log
    History {
        /// Events to show
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Per-venue fee and volume summary instead of the event list
        #[arg(long)]
        costs: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = dispatch(&config, cli.command) {
        match &e {
            Error::RiskLimit(msg) => {
                eprintln!("\nAborted: {msg}");
                process::exit(2);
            }
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}

fn dispatch(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::History { limit, costs } => history(config, limit, costs),
        command => match config.execution.mode {
            ExecutionMode::Paper => {
                let exchange = PaperExchange::from_config(config)?;
                run_command(config, &exchange, &exchange, command)
            }
            ExecutionMode::Live => live_dispatch(config, command),
        },
    }
}

#[cfg(feature = "live")]
fn live_dispatch(config: &Config, command: Command) -> Result<()> {
    let exchange = ballast::live::LiveExchange::from_config(config)?;
    run_command(config, &exchange, &exchange, command)
}

#[cfg(not(feature = "live"))]
fn live_dispatch(_config: &Config, _command: Command) -> Result<()> {
    Err(Error::Config(
        "execution.mode = \"live\" needs a build with the 'live' feature".into(),
    ))
}

fn run_command(
    config: &Config,
    market: &dyn MarketData,
    client: &dyn ExchangeClient,
    command: Command,
) -> Result<()> {
    let clock = SystemClock;
    let store = EventStore::open(&config.events_path())?;
    let notifier = LogNotifier;
    let engine = Engine {
        config,
        market,
        client,
        clock: &clock,
        store: &store,
        notifier: &notifier,
    };

    match command {
        Command::Run {
            portfolio,
            dry_run,
            force,
        } => {
            let mut doc = Portfolio::load(&portfolio)?;
            let opts = RunOptions {
                dry_run,
                force,
                interactive: true,
            };
            engine.run_cycle(&mut doc, Some(portfolio.as_path()), &opts)?;
            Ok(())
        }

        Command::Holdings { portfolio } => {
            let doc = Portfolio::load(&portfolio)?;
            let holdings = engine.fetch_holdings()?;
            let prices = engine.fetch_prices(&holdings, &doc)?;
            let valuation = drift::value_holdings(&holdings, &prices)?;
            engine::display_holdings(&holdings, &prices, &valuation, &doc.target_map());

            let evaluation = engine.evaluate_trigger(&doc, &valuation, clock.now());
            println!(
                "  Max drift: {:.2}%{}",
                evaluation.max_drift * 100.0,
                if evaluation.should_trigger {
                    "  (rebalance due)"
                } else {
                    ""
                }
            );
            Ok(())
        }

        Command::Watch { portfolio, ticks } => {
            let stats = scheduler::watch(&engine, &portfolio, ticks)?;
            println!(
                "{} ticks, {} cycles, {} suppressed",
                stats.ticks, stats.cycles, stats.suppressed
            );
            Ok(())
        }

        Command::History { .. } => unreachable!("handled before venue dispatch"),
    }
}

fn history(config: &Config, limit: usize, costs: bool) -> Result<()> {
    let store = EventStore::open(&config.events_path())?;

    if costs {
        let events = store.read_all()?;
        let summary = store::venue_costs(&events);
        println!("VENUE COSTS:");
        for venue in Venue::BOTH {
            let c = summary.get(&venue).copied().unwrap_or_default();
            println!(
                "  {:10} {:>6} orders  ${:>12.2} volume  ${:>10.2} fees  ({:.3}% avg)",
                format!("{venue}"),
                c.orders,
                c.volume_cents as f64 / 100.0,
                c.fees_cents as f64 / 100.0,
                c.average_fee_rate() * 100.0,
            );
        }
        return Ok(());
    }

    let events = store.recent(limit)?;
    if events.is_empty() {
        println!("No rebalance events yet.");
        return Ok(());
    }
    for event in events {
        println!(
            "{}  {:14} {:9} {:16} ${:>10.2}  {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.portfolio,
            format!("{}", event.reason),
            format!("{}", event.state),
            event.filled_notional_cents as f64 / 100.0,
            event.detail,
        );
    }
    Ok(())
}
