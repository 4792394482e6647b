//! Trade plan generation: drift vector → lot-rounded buy/sell legs.
//!
//! Legs leave this stage venue-unbound; the routing stage assigns venues
//! and decides transfers.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LotConfig;
use crate::error::{Error, Result};
use crate::types::{Asset, PriceMap, Side, Venue};

/// A sized trade not yet assigned to a venue.
#[derive(Debug, Clone, Copy)]
pub struct UnboundLeg {
    pub asset: Asset,
    pub side: Side,
    pub quantity: f64,
    pub price_cents: i64,
    pub notional_cents: i64,
}

/// One order within a rebalance plan, bound to a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLeg {
    pub asset: Asset,
    pub side: Side,
    pub quantity: f64,
    pub venue: Venue,
    pub estimated_price_cents: i64,
    pub notional_cents: i64,
    /// Index into the plan's transfers that must complete before this
    /// leg can be funded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on_transfer: Option<usize>,
}

/// Balance movement between venues, executed before dependent legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub asset: Asset,
    pub amount: f64,
    pub from: Venue,
    pub to: Venue,
    pub fee_cents: i64,
}

/// The full correcting plan for one cycle: transfers first, then SELL
/// legs, then BUY legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub transfers: Vec<TransferInstruction>,
    pub legs: Vec<TradeLeg>,
    pub expected_total_cost_cents: i64,
    pub generated_at: DateTime<Utc>,
}

impl RebalancePlan {
    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn total_notional_cents(&self) -> i64 {
        self.legs.iter().map(|l| l.notional_cents).sum()
    }
}

/// Round a quantity down to the asset's lot increment.
///
/// The small nudge guards against binary dust like 0.3 / 0.1 landing
/// just under 3.0 before the floor.
pub fn round_down_to_lot(quantity: f64, lot: f64) -> f64 {
    if lot <= 0.0 {
        return quantity;
    }
    ((quantity / lot) + 1e-9).floor() * lot
}

/// Convert a drift vector into unbound legs.
///
/// `notional = drift × total`; positive drift buys, negative sells.
/// Assets under `min_trade_cents` are skipped entirely, quantities are
/// rounded down to the lot, and sub-lot residuals are dropped (bounding
/// tracking error at one lot per asset per cycle). Quote-asset drift is
/// the residual of the other legs and never trades directly.
///
/// Output ordering: SELLs before BUYs (sales free balance the buys
/// spend), ties broken by decreasing notional.
pub fn generate(
    drift: &[(Asset, f64)],
    total_cents: i64,
    prices: &PriceMap,
    lots: &LotConfig,
    min_trade_cents: i64,
    quote: Asset,
) -> Result<Vec<UnboundLeg>> {
    let mut legs = Vec::new();

    for &(asset, d) in drift {
        if asset == quote {
            continue;
        }
        let notional = (d * total_cents as f64) as i64;
        if notional.abs() < min_trade_cents {
            continue;
        }

        let price = match prices.get(&asset) {
            Some(&p) if p > 0 => p,
            Some(&p) => {
                return Err(Error::Valuation(format!(
                    "non-positive price {p} for {asset}"
                )));
            }
            None => return Err(Error::Valuation(format!("missing price for {asset}"))),
        };

        let raw_qty = notional.abs() as f64 / price as f64;
        let quantity = round_down_to_lot(raw_qty, lots.lot_for(asset));
        if quantity <= 0.0 {
            continue;
        }

        let rounded_notional = (quantity * price as f64).round() as i64;
        if rounded_notional == 0 {
            continue;
        }

        legs.push(UnboundLeg {
            asset,
            side: if d > 0.0 { Side::Buy } else { Side::Sell },
            quantity,
            price_cents: price,
            notional_cents: rounded_notional,
        });
    }

    legs.sort_by(|a, b| match (a.side, b.side) {
        (Side::Sell, Side::Buy) => Ordering::Less,
        (Side::Buy, Side::Sell) => Ordering::Greater,
        _ => b.notional_cents.cmp(&a.notional_cents),
    });

    Ok(legs)
}
