//! Cycle orchestration: trigger → valuation → plan → routing → risk →
//! execution → persistence and notification.
//!
//! Stages ahead of the executor are pure; everything that touches a
//! venue goes through the injected [`ExchangeClient`].

use std::path::Path;

use chrono::{DateTime, DurationRound, Utc};
use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::clock::Clock;
use crate::config::Config;
use crate::drift::{self, Valuation};
use crate::error::{Error, Result};
use crate::event::{EventState, RebalanceEvent};
use crate::exchange::{ExchangeClient, MarketData};
use crate::executor;
use crate::plan::{self, RebalancePlan};
use crate::portfolio::Portfolio;
use crate::risk::{self, RiskLimits, ValidatedPlan};
use crate::routing;
use crate::store::{EventStore, Notifier};
use crate::trigger::{self, TriggerReason, TriggerResult};
use crate::types::{Asset, Holding, PriceMap, Venue};

/// Options for one rebalance run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Show the validated plan without executing or persisting anything.
    pub dry_run: bool,
    /// Manual trigger: bypass the trigger rules and the confirmation
    /// prompt.
    pub force: bool,
    /// Ask before executing. Only the CLI `run` command sets this; the
    /// watch loop and tests run unattended.
    pub interactive: bool,
}

/// What a cycle amounted to.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Trigger rules stayed quiet; nothing was planned.
    NoTrigger { max_drift: f64 },
    /// Plan built and validated, execution skipped.
    DryRun(ValidatedPlan),
    /// Rejected before execution; the event is persisted.
    Aborted(RebalanceEvent),
    /// Execution ran to a terminal state; the event is persisted.
    Executed(RebalanceEvent),
}

/// All collaborators a cycle needs, injected once.
pub struct Engine<'a> {
    pub config: &'a Config,
    pub market: &'a dyn MarketData,
    pub client: &'a dyn ExchangeClient,
    pub clock: &'a dyn Clock,
    pub store: &'a EventStore,
    pub notifier: &'a dyn Notifier,
}

/// Midnight UTC of the current day, for the turnover budget window.
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(chrono::Duration::days(1)).unwrap_or(now)
}

impl Engine<'_> {
    /// Positive balances on both venues.
    pub fn fetch_holdings(&self) -> Result<Vec<Holding>> {
        let mut holdings = Vec::new();
        for venue in Venue::BOTH {
            let balances = self
                .client
                .balances(venue)
                .map_err(|e| Error::Venue(format!("{venue} balances: {e}")))?;
            for (asset, quantity) in balances {
                if quantity > 0.0 {
                    holdings.push(Holding {
                        asset,
                        venue,
                        quantity,
                    });
                }
            }
        }
        holdings.sort_by(|a, b| {
            a.asset
                .cmp(&b.asset)
                .then((a.venue as u8).cmp(&(b.venue as u8)))
        });
        Ok(holdings)
    }

    /// Prices for every held and targeted asset plus the quote asset.
    pub fn fetch_prices(&self, holdings: &[Holding], portfolio: &Portfolio) -> Result<PriceMap> {
        let mut assets: Vec<Asset> = holdings.iter().map(|h| h.asset).collect();
        for asset in portfolio.assets() {
            if !assets.contains(&asset) {
                assets.push(asset);
            }
        }
        let quote = self.config.trade.quote();
        if !assets.contains(&quote) {
            assets.push(quote);
        }

        let mut prices = PriceMap::default();
        for asset in assets {
            let price = self
                .market
                .price_cents(asset)
                .map_err(|e| Error::Valuation(format!("price for {asset}: {e}")))?;
            prices.insert(asset, price);
        }
        Ok(prices)
    }

    /// Trigger evaluation against current weights. Pure; part of the
    /// public surface so collaborators can poll without running a cycle.
    pub fn evaluate_trigger(
        &self,
        portfolio: &Portfolio,
        valuation: &Valuation,
        now: DateTime<Utc>,
    ) -> TriggerResult {
        let policy = portfolio.effective_policy(self.config);
        trigger::evaluate(
            &policy,
            portfolio.last_rebalanced_at,
            valuation,
            &portfolio.as_target_pairs(),
            now,
        )
    }

    /// Drift → unbound legs → venue routing.
    pub fn build_plan(
        &self,
        portfolio: &Portfolio,
        holdings: &[Holding],
        prices: &PriceMap,
        valuation: &Valuation,
        now: DateTime<Utc>,
    ) -> Result<RebalancePlan> {
        let drift_vec = drift::compute_drift(valuation, &portfolio.as_target_pairs());
        let legs = plan::generate(
            &drift_vec,
            valuation.total_cents,
            prices,
            &self.config.lots,
            self.config.trade.min_trade_cents(),
            self.config.trade.quote(),
        )?;
        routing::assign_venues(&legs, holdings, prices, self.config, now)
    }

    /// Run one full cycle for the portfolio.
    ///
    /// Every event that reaches a terminal state is appended to the
    /// store and emitted to the notifier (dry runs create no event).
    /// Risk rejections persist the aborted event, then surface the
    /// error.
    pub fn run_cycle(
        &self,
        portfolio: &mut Portfolio,
        portfolio_path: Option<&Path>,
        opts: &RunOptions,
    ) -> Result<CycleOutcome> {
        let now = self.clock.now();

        // 1. Snapshot holdings and prices across both venues
        let holdings = self.fetch_holdings()?;
        let prices = self.fetch_prices(&holdings, portfolio)?;
        let valuation = drift::value_holdings(&holdings, &prices)?;

        // 2. Trigger rules (--force is a manual trigger)
        let evaluation = self.evaluate_trigger(portfolio, &valuation, now);
        let reason = if opts.force {
            TriggerReason::Manual
        } else {
            match evaluation.reason {
                Some(reason) => reason,
                None => {
                    info!(
                        "no trigger for {} (max drift {:.2}%)",
                        portfolio.name,
                        evaluation.max_drift * 100.0
                    );
                    return Ok(CycleOutcome::NoTrigger {
                        max_drift: evaluation.max_drift,
                    });
                }
            }
        };
        info!(
            "rebalance triggered for {} ({reason}, max drift {:.2}%)",
            portfolio.name,
            evaluation.max_drift * 100.0
        );
        let mut event = RebalanceEvent::pending(&portfolio.name, reason, now);

        // 3. Plan: drift → legs → venue routing
        let plan = match self.build_plan(portfolio, &holdings, &prices, &valuation, now) {
            Ok(plan) => plan,
            Err(e) => {
                event.abort(e.to_string(), self.clock.now());
                self.record_abort(&event, opts)?;
                return Err(e);
            }
        };
        if plan.is_empty() {
            event.abort("no correcting trades above venue and trade minimums", now);
            self.record_abort(&event, opts)?;
            return Ok(CycleOutcome::Aborted(event));
        }
        event.advance(EventState::Planned);
        event.planned_notional_cents = plan.total_notional_cents();

        // 4. Risk guard against the remaining daily turnover
        let turnover = self.store.turnover_since(start_of_day(now))?;
        let limits = RiskLimits::from_config(&self.config.risk);
        let validated =
            match risk::validate(plan, &limits, &valuation, turnover, &self.config.lots) {
                Ok(validated) => validated,
                Err(e) => {
                    event.abort(e.to_string(), self.clock.now());
                    self.record_abort(&event, opts)?;
                    return Err(e);
                }
            };
        if validated.plan.is_empty() {
            event.abort("plan empty after risk scale-down", self.clock.now());
            self.record_abort(&event, opts)?;
            return Ok(CycleOutcome::Aborted(event));
        }
        for adjustment in &validated.adjustments {
            warn!(
                "risk guard scaled {} {}: {} -> {}",
                adjustment.rule, adjustment.asset, adjustment.old_qty, adjustment.new_qty
            );
        }
        event.advance(EventState::Validated);

        // 5. Show the plan; dry runs stop before anything touches a venue
        display_plan(&validated);
        if opts.dry_run {
            println!("\n[DRY RUN] No orders submitted.");
            return Ok(CycleOutcome::DryRun(validated));
        }

        // 6. Confirmation (interactive runs only)
        if opts.interactive && !opts.force {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt("Execute?")
                .default(false)
                .interact()
                .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;
            if !confirmed {
                event.abort("user declined execution", self.clock.now());
                self.record_abort(&event, opts)?;
                return Ok(CycleOutcome::Aborted(event));
            }
        }

        // 7. Execute; leg outcomes land on the event
        executor::execute(&validated, self.client, self.clock, self.config, &mut event);

        // 8. The executor owns the last-rebalance stamp: only a terminal
        //    state with fills moves it
        if event.any_fills() {
            portfolio.last_rebalanced_at = Some(self.clock.now());
            if let Some(path) = portfolio_path {
                portfolio.save(path)?;
            }
        }

        // 9. Persist and notify, whatever the terminal state
        self.store.append(&event)?;
        self.notifier.emit(&event);

        println!(
            "\n{}: {} ({} transfers, {} legs, ${:.2} fees)",
            event.state,
            event.detail,
            event.transfers.len(),
            event.legs.len(),
            event.fees_paid_cents as f64 / 100.0,
        );

        Ok(CycleOutcome::Executed(event))
    }

    fn record_abort(&self, event: &RebalanceEvent, opts: &RunOptions) -> Result<()> {
        info!("cycle aborted: {}", event.detail);
        if !opts.dry_run {
            self.store.append(event)?;
            self.notifier.emit(event);
        }
        Ok(())
    }
}

/// Print current holdings with weights vs targets.
pub fn display_holdings(
    holdings: &[Holding],
    prices: &PriceMap,
    valuation: &Valuation,
    targets: &FxHashMap<Asset, f64>,
) {
    println!("CURRENT HOLDINGS:");
    println!(
        "  {:8} {:10} {:>16} {:>14} {:>9} {:>9}",
        "Asset", "Venue", "Quantity", "Value", "Weight", "Target"
    );
    for holding in holdings {
        let price = prices.get(&holding.asset).copied().unwrap_or(0);
        let value = holding.quantity * price as f64 / 100.0;
        println!(
            "  {:8} {:10} {:>16.8} {:>13.2} {:>8.1}% {:>8.1}%",
            holding.asset,
            format!("{}", holding.venue),
            holding.quantity,
            value,
            valuation.weight(holding.asset) * 100.0,
            targets.get(&holding.asset).copied().unwrap_or(0.0) * 100.0,
        );
    }
    println!(
        "\n  Total value: ${:.2}",
        valuation.total_cents as f64 / 100.0
    );
}

/// Print the validated plan the way the executor will run it.
pub fn display_plan(validated: &ValidatedPlan) {
    let plan = &validated.plan;

    if !plan.transfers.is_empty() {
        println!("\nTRANSFERS (before dependent legs):");
        for (i, transfer) in plan.transfers.iter().enumerate() {
            println!(
                "  {:>3}  {:>16.8} {:8} {} -> {}  (fee ${:.2})",
                i + 1,
                transfer.amount,
                format!("{}", transfer.asset),
                transfer.from,
                transfer.to,
                transfer.fee_cents as f64 / 100.0,
            );
        }
    }

    println!("\nREBALANCE LEGS:");
    println!(
        "  {:>3}  {:5} {:8} {:10} {:>16} {:>12}",
        "#", "Side", "Asset", "Venue", "Quantity", "Notional"
    );
    for (i, leg) in plan.legs.iter().enumerate() {
        println!(
            "  {:>3}  {:5} {:8} {:10} {:>16.8} {:>11.2}{}",
            i + 1,
            format!("{}", leg.side),
            format!("{}", leg.asset),
            format!("{}", leg.venue),
            leg.quantity,
            leg.notional_cents as f64 / 100.0,
            if leg.depends_on_transfer.is_some() {
                "  (after transfer)"
            } else {
                ""
            },
        );
    }

    for adjustment in &validated.adjustments {
        println!(
            "  note: {} scaled by {} ({} -> {})",
            adjustment.asset, adjustment.rule, adjustment.old_qty, adjustment.new_qty
        );
    }

    println!(
        "\nEst. cost: ${:.2} (fees + slippage)",
        plan.expected_total_cost_cents as f64 / 100.0
    );
}
