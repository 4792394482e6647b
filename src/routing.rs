//! Venue cost routing: assigns each leg to the cheaper venue and
//! decides whether an inter-venue transfer pays for itself.
//!
//! Decisions are greedy and per-leg. Fee schedules are close to linear
//! and legs rarely interact, so the greedy answer tracks the global
//! optimum well; this is a documented approximation, not an oversight.
//! Transfers are justified only by the fee differential they unlock in
//! the current cycle, never amortized across cycles.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::plan::{RebalancePlan, TradeLeg, TransferInstruction, UnboundLeg, round_down_to_lot};
use crate::types::{Asset, Holding, PriceMap, Side, Venue};

const BALANCE_EPSILON: f64 = 1e-9;

/// Simulated per-venue balances, threaded through the legs in plan
/// order so SELL proceeds can fund later BUYs.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: FxHashMap<(Venue, Asset), f64>,
}

impl Ledger {
    pub fn from_holdings(holdings: &[Holding]) -> Self {
        let mut ledger = Ledger::default();
        for h in holdings {
            if h.quantity > 0.0 {
                ledger.credit(h.venue, h.asset, h.quantity);
            }
        }
        ledger
    }

    pub fn available(&self, venue: Venue, asset: Asset) -> f64 {
        self.balances.get(&(venue, asset)).copied().unwrap_or(0.0)
    }

    pub fn credit(&mut self, venue: Venue, asset: Asset, quantity: f64) {
        *self.balances.entry((venue, asset)).or_insert(0.0) += quantity;
    }

    /// Debit, clamping at zero to absorb float dust.
    pub fn debit(&mut self, venue: Venue, asset: Asset, quantity: f64) {
        let entry = self.balances.entry((venue, asset)).or_insert(0.0);
        *entry = (*entry - quantity).max(0.0);
    }
}

struct Candidate {
    venue: Venue,
    fee_cents: i64,
    cost_cents: i64,
    funded: bool,
    /// (source venue, amount of the funding asset to move)
    transfer: Option<(Venue, f64)>,
}

/// Largest BUY a venue can fund from its quote balance, fee included.
/// Returns the venue with the most affordable notional and the
/// lot-rounded quantity, or `None` when no venue clears the minimums.
fn shrink_buy_to_available(
    leg: &UnboundLeg,
    ledger: &Ledger,
    config: &Config,
    quote: Asset,
    quote_price: i64,
) -> Option<(Venue, f64)> {
    let mut best: Option<(Venue, f64, i64)> = None;
    for venue in Venue::BOTH {
        let profile = config.venues.profile(venue);
        let available_cents = ledger.available(venue, quote) * quote_price as f64;
        // One cent of margin so the venue-side balance check cannot
        // trip on rounding.
        let affordable_cents = available_cents / (1.0 + profile.taker_fee) - 1.0;
        let quantity = round_down_to_lot(
            affordable_cents / leg.price_cents as f64,
            config.lots.lot_for(leg.asset),
        );
        let notional = (quantity * leg.price_cents as f64).round() as i64;
        if quantity <= 0.0
            || notional < profile.min_order_cents()
            || notional < config.trade.min_trade_cents()
        {
            continue;
        }
        if best.is_none_or(|(_, _, n)| notional > n) {
            best = Some((venue, quantity, notional));
        }
    }
    best.map(|(venue, quantity, _)| (venue, quantity))
}

/// Assign a venue to every leg and emit the transfers the assignment
/// depends on. Legs that cannot be funded on either venue, even with a
/// transfer, are dropped and logged; the plan continues without them.
pub fn assign_venues(
    legs: &[UnboundLeg],
    holdings: &[Holding],
    prices: &PriceMap,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<RebalancePlan> {
    let quote = config.trade.quote();
    let quote_price = match prices.get(&quote) {
        Some(&p) if p > 0 => p,
        _ => {
            return Err(Error::Valuation(format!(
                "missing price for quote asset {quote}"
            )));
        }
    };

    let mut ledger = Ledger::from_holdings(holdings);
    let mut transfers: Vec<TransferInstruction> = Vec::new();
    let mut bound: Vec<TradeLeg> = Vec::new();
    let mut fees_cents = 0_i64;

    for leg in legs {
        let mut leg = *leg;
        let funding_asset = match leg.side {
            Side::Sell => leg.asset,
            Side::Buy => quote,
        };
        let funding_price = match leg.side {
            Side::Sell => leg.price_cents,
            Side::Buy => quote_price,
        };

        let mut candidates: Vec<Candidate> = Vec::new();
        for venue in Venue::BOTH {
            let profile = config.venues.profile(venue);
            if leg.notional_cents < profile.min_order_cents() {
                continue;
            }

            let fee_cents = (leg.notional_cents as f64 * profile.taker_fee).round() as i64;
            let need_qty = match leg.side {
                Side::Sell => leg.quantity,
                Side::Buy => (leg.notional_cents + fee_cents) as f64 / quote_price as f64,
            };
            let have = ledger.available(venue, funding_asset);

            if have + BALANCE_EPSILON >= need_qty {
                candidates.push(Candidate {
                    venue,
                    fee_cents,
                    cost_cents: fee_cents,
                    funded: true,
                    transfer: None,
                });
                continue;
            }

            let source = venue.other();
            let shortfall = need_qty - have;
            let transfer_fee_cents = config.venues.profile(source).transfer_fee_cents();
            let transfer_fee_qty = transfer_fee_cents as f64 / funding_price as f64;
            if ledger.available(source, funding_asset) + BALANCE_EPSILON
                >= shortfall + transfer_fee_qty
            {
                let transfer_cost = transfer_fee_cents + config.cost.latency_penalty_cents();
                candidates.push(Candidate {
                    venue,
                    fee_cents,
                    cost_cents: fee_cents + transfer_cost,
                    funded: false,
                    transfer: Some((source, shortfall)),
                });
            }
        }

        let full_size = candidates.into_iter().min_by(|a, b| {
            a.cost_cents
                .cmp(&b.cost_cents)
                .then(b.funded.cmp(&a.funded))
        });
        let choice = match full_size {
            Some(choice) => choice,
            // A buy that cannot be fully funded anywhere shrinks to the
            // funds actually available before it is given up on.
            None => match shrink_buy_to_available(&leg, &ledger, config, quote, quote_price) {
                Some((venue, quantity)) if leg.side == Side::Buy => {
                    warn!(
                        "downsizing BUY {} from {} to {} (available balance)",
                        leg.asset, leg.quantity, quantity
                    );
                    leg.quantity = quantity;
                    leg.notional_cents = (quantity * leg.price_cents as f64).round() as i64;
                    let fee_cents = (leg.notional_cents as f64
                        * config.venues.profile(venue).taker_fee)
                        .round() as i64;
                    Candidate {
                        venue,
                        fee_cents,
                        cost_cents: fee_cents,
                        funded: true,
                        transfer: None,
                    }
                }
                _ => {
                    warn!(
                        "dropping {} {} {}: cannot fund on either venue",
                        leg.side, leg.quantity, leg.asset
                    );
                    continue;
                }
            },
        };

        let mut depends_on_transfer = None;
        if let Some((source, amount)) = choice.transfer {
            let transfer_fee_cents = config.venues.profile(source).transfer_fee_cents();
            let transfer_fee_qty = transfer_fee_cents as f64 / funding_price as f64;

            ledger.debit(source, funding_asset, amount + transfer_fee_qty);
            ledger.credit(choice.venue, funding_asset, amount);

            transfers.push(TransferInstruction {
                asset: funding_asset,
                amount,
                from: source,
                to: choice.venue,
                fee_cents: transfer_fee_cents,
            });
            fees_cents += transfer_fee_cents;
            depends_on_transfer = Some(transfers.len() - 1);

            debug!(
                "transfer {amount} {funding_asset} {source} -> {} for {} {}",
                choice.venue, leg.side, leg.asset
            );
        }

        match leg.side {
            Side::Sell => {
                ledger.debit(choice.venue, leg.asset, leg.quantity);
                ledger.credit(
                    choice.venue,
                    quote,
                    (leg.notional_cents - choice.fee_cents) as f64 / quote_price as f64,
                );
            }
            Side::Buy => {
                ledger.debit(
                    choice.venue,
                    quote,
                    (leg.notional_cents + choice.fee_cents) as f64 / quote_price as f64,
                );
                ledger.credit(choice.venue, leg.asset, leg.quantity);
            }
        }
        fees_cents += choice.fee_cents;

        bound.push(TradeLeg {
            asset: leg.asset,
            side: leg.side,
            quantity: leg.quantity,
            venue: choice.venue,
            estimated_price_cents: leg.price_cents,
            notional_cents: leg.notional_cents,
            depends_on_transfer,
        });
    }

    let total_notional: i64 = bound.iter().map(|l| l.notional_cents).sum();
    let slippage_cents =
        (total_notional as f64 * config.cost.slippage_bps as f64 / 10_000.0) as i64;

    Ok(RebalancePlan {
        transfers,
        legs: bound,
        expected_total_cost_cents: fees_cents + slippage_cents,
        generated_at: now,
    })
}
