//! Recurring watch loop.
//!
//! Ticks at a fixed cadence; the trigger rules decide whether a tick
//! acts. A cycle that outlasts the tick interval suppresses the missed
//! evaluations rather than queueing them: at most one cycle is ever
//! in flight per portfolio.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};

use crate::engine::{CycleOutcome, Engine, RunOptions};
use crate::error::Result;
use crate::portfolio::Portfolio;

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Ticks where an evaluation ran.
    pub ticks: u64,
    /// Ticks that fell inside a still-running cycle and were dropped.
    pub suppressed: u64,
    /// Cycles that got past the trigger rules.
    pub cycles: u64,
}

/// Run the watch loop. `max_ticks` bounds the loop for tests and
/// one-shot invocations; `None` runs until the process is stopped.
///
/// The portfolio document is reloaded on every tick so operator edits
/// to targets or policy take effect without a restart.
pub fn watch(engine: &Engine, portfolio_path: &Path, max_ticks: Option<u64>) -> Result<WatchStats> {
    let tick = Duration::from_secs(engine.config.execution.tick_secs);
    let tick_delta = chrono::Duration::from_std(tick).unwrap_or(chrono::Duration::seconds(60));
    let opts = RunOptions {
        dry_run: false,
        force: false,
        interactive: false,
    };

    let mut stats = WatchStats::default();
    let mut next_tick = engine.clock.now() + tick_delta;

    info!(
        "watching {} every {}s",
        portfolio_path.display(),
        tick.as_secs()
    );

    loop {
        if let Some(max) = max_ticks {
            if stats.ticks >= max {
                break;
            }
        }

        let now = engine.clock.now();
        if next_tick > now {
            if let Ok(wait) = (next_tick - now).to_std() {
                engine.clock.sleep(wait);
            }
        }
        stats.ticks += 1;

        let mut portfolio = match Portfolio::load(portfolio_path) {
            Ok(portfolio) => portfolio,
            Err(e) => {
                warn!("skipping tick, cannot load portfolio: {e}");
                next_tick += tick_delta;
                continue;
            }
        };

        match engine.run_cycle(&mut portfolio, Some(portfolio_path), &opts) {
            Ok(CycleOutcome::NoTrigger { .. }) => {}
            Ok(_) => stats.cycles += 1,
            // A failed cycle is persisted by the engine; the loop keeps
            // watching.
            Err(e) => warn!("cycle failed: {e}"),
        }

        // Roll past any ticks the cycle consumed. Those evaluations are
        // suppressed, not queued.
        let now = engine.clock.now();
        next_tick += tick_delta;
        while next_tick <= now {
            stats.suppressed += 1;
            warn!("previous cycle still running at tick; suppressing evaluation");
            next_tick += tick_delta;
        }
    }

    Ok(stats)
}
