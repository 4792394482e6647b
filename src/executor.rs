//! Plan execution: transfers first, then legs, each with its own retry
//! budget.
//!
//! Legs are independent; a failure never cancels already-accepted legs
//! and filled legs are never rolled back. Transient venue errors retry
//! with exponential backoff; permanent errors fail the leg immediately.

use std::time::Duration;

use log::{error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, ExecutionConfig};
use crate::event::{
    EventState, LegOutcome, LegRecord, RebalanceEvent, TransferOutcome, TransferRecord,
};
use crate::exchange::{ExchangeClient, ExchangeResult};
use crate::risk::ValidatedPlan;

/// Retry bookkeeping for one submission: failed-attempt count and the
/// delay before the next try (base doubling per failure, capped).
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    failures: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetrySchedule {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            failures: 0,
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.retry_base_delay_ms),
            cap: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Record a failed attempt. Returns the backoff before the next
    /// try, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        let exponent = (self.failures - 1).min(20);
        let delay = self.base.saturating_mul(1u32 << exponent);
        Some(delay.min(self.cap))
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn submit_with_retry<T>(
    clock: &dyn Clock,
    config: &ExecutionConfig,
    what: &str,
    mut op: impl FnMut() -> ExchangeResult<T>,
) -> (ExchangeResult<T>, u32) {
    let mut schedule = RetrySchedule::new(config);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return (Ok(value), attempts),
            Err(e) if e.is_transient() => match schedule.next_delay() {
                Some(delay) => {
                    warn!("{what}: transient failure ({e}), retrying in {delay:?}");
                    clock.sleep(delay);
                }
                None => {
                    error!("{what}: giving up after {attempts} attempts: {e}");
                    return (Err(e), attempts);
                }
            },
            Err(e) => {
                error!("{what}: {e}");
                return (Err(e), attempts);
            }
        }
    }
}

/// Pause between consecutive order submissions.
pub fn rate_limit_delay(clock: &dyn Clock, interval_ms: u64) {
    if interval_ms > 0 {
        clock.sleep(Duration::from_millis(interval_ms));
    }
}

/// Execute a validated plan, recording per-leg outcomes on the event
/// and driving it to a terminal state.
pub fn execute(
    validated: &ValidatedPlan,
    client: &dyn ExchangeClient,
    clock: &dyn Clock,
    config: &Config,
    event: &mut RebalanceEvent,
) {
    event.advance(EventState::Executing);
    let plan = &validated.plan;
    let exec = &config.execution;
    let order_timeout = Duration::from_secs(exec.order_timeout_secs);

    // Transfers run first: a leg that depends on moved balance must not
    // be submitted until its transfer is confirmed.
    let mut transfer_ok = vec![false; plan.transfers.len()];
    for (i, transfer) in plan.transfers.iter().enumerate() {
        // The wait bound covers the source venue's expected settlement
        // latency on top of the request timeout.
        let transfer_timeout = Duration::from_secs(
            exec.transfer_timeout_secs
                + config.venues.profile(transfer.from).transfer_latency_secs,
        );
        let what = format!(
            "transfer {} {} {} -> {}",
            transfer.amount, transfer.asset, transfer.from, transfer.to
        );
        let (result, attempts) = submit_with_retry(clock, exec, &what, || {
            client.transfer(
                transfer.asset,
                transfer.amount,
                transfer.from,
                transfer.to,
                transfer_timeout,
            )
        });
        let outcome = match result {
            Ok(r) => {
                info!("{what}: delivered {}", r.delivered);
                event.fees_paid_cents += r.fee_cents;
                transfer_ok[i] = true;
                TransferOutcome::Completed {
                    delivered: r.delivered,
                    fee_cents: r.fee_cents,
                }
            }
            Err(e) => TransferOutcome::Failed {
                reason: e.to_string(),
            },
        };
        event.transfers.push(TransferRecord {
            asset: transfer.asset,
            amount: transfer.amount,
            from: transfer.from,
            to: transfer.to,
            attempts,
            outcome,
        });
    }

    let mut filled = 0usize;
    let mut unfilled = 0usize;
    let mut short_fills = 0usize;

    for (i, leg) in plan.legs.iter().enumerate() {
        if let Some(t) = leg.depends_on_transfer {
            if !transfer_ok.get(t).copied().unwrap_or(false) {
                warn!(
                    "skipping {} {} {}: funding transfer failed",
                    leg.side, leg.quantity, leg.asset
                );
                event.legs.push(LegRecord {
                    asset: leg.asset,
                    side: leg.side,
                    venue: leg.venue,
                    requested_qty: leg.quantity,
                    attempts: 0,
                    outcome: LegOutcome::Skipped {
                        reason: "funding transfer failed".into(),
                    },
                });
                unfilled += 1;
                continue;
            }
        }

        if i > 0 {
            rate_limit_delay(clock, exec.order_interval_ms);
        }

        let what = format!("{} {} {} on {}", leg.side, leg.quantity, leg.asset, leg.venue);
        let (result, attempts) = submit_with_retry(clock, exec, &what, || {
            client.place_order(leg.venue, leg.asset, leg.side, leg.quantity, order_timeout)
        });
        match result {
            Ok(fill) => {
                info!(
                    "{what}: filled {} @ ${:.2}",
                    fill.filled_qty,
                    fill.avg_price_cents as f64 / 100.0
                );
                if fill.filled_qty + 1e-9 < leg.quantity {
                    short_fills += 1;
                }
                event.filled_notional_cents +=
                    (fill.filled_qty * fill.avg_price_cents as f64).round() as i64;
                event.fees_paid_cents += fill.fee_cents;
                filled += 1;
                event.legs.push(LegRecord {
                    asset: leg.asset,
                    side: leg.side,
                    venue: leg.venue,
                    requested_qty: leg.quantity,
                    attempts,
                    outcome: LegOutcome::Filled(fill),
                });
            }
            Err(e) => {
                unfilled += 1;
                event.legs.push(LegRecord {
                    asset: leg.asset,
                    side: leg.side,
                    venue: leg.venue,
                    requested_qty: leg.quantity,
                    attempts,
                    outcome: LegOutcome::Failed {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }

    let (state, detail) = if plan.legs.is_empty() {
        (EventState::Completed, "empty plan, nothing to execute".to_string())
    } else if filled == 0 {
        (EventState::Failed, format!("no legs filled ({unfilled} failed)"))
    } else if unfilled > 0 || short_fills > 0 {
        (
            EventState::PartiallyFilled,
            format!("{filled} of {} legs filled", plan.legs.len()),
        )
    } else {
        (EventState::Completed, format!("all {filled} legs filled"))
    };
    event.finish(state, detail, clock.now());
}
