//! Pre-execution risk validation.
//!
//! Weight and per-trade breaches are scaled down to the limit; the
//! daily turnover cap is hard and aborts the plan outright.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{LotConfig, RiskConfig};
use crate::drift::Valuation;
use crate::error::{Error, Result};
use crate::plan::{RebalancePlan, round_down_to_lot};
use crate::types::{Asset, Side};

/// Hard limits a plan must satisfy before execution.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_single_asset_weight: f64,
    pub max_daily_turnover_cents: i64,
    pub max_trade_notional_cents: i64,
}

impl RiskLimits {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            max_single_asset_weight: config.max_single_asset_weight,
            max_daily_turnover_cents: (config.max_daily_turnover_usd * 100.0) as i64,
            max_trade_notional_cents: (config.max_trade_usd * 100.0) as i64,
        }
    }
}

/// A leg the guard shrank to fit a limit.
#[derive(Debug, Clone, Serialize)]
pub struct Adjustment {
    pub asset: Asset,
    pub rule: &'static str,
    pub old_qty: f64,
    pub new_qty: f64,
}

/// A plan that passed the risk guard, possibly after scale-downs.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub plan: RebalancePlan,
    pub adjustments: Vec<Adjustment>,
}

fn post_trade_values(plan: &RebalancePlan, valuation: &Valuation) -> FxHashMap<Asset, i64> {
    let mut values = valuation.values_cents.clone();
    for leg in &plan.legs {
        let signed = match leg.side {
            Side::Buy => leg.notional_cents,
            Side::Sell => -leg.notional_cents,
        };
        *values.entry(leg.asset).or_insert(0) += signed;
    }
    values
}

/// Validate a plan against the limits, scaling where the rules allow.
///
/// Checks, in order: (a) post-trade weight per asset, where offending BUY
/// legs are scaled so the limit is met exactly, then lot-rounded;
/// (b) remaining daily turnover, a hard abort; (c) per-leg notional,
/// scaled to the cap. After one scaling pass the plan is re-validated
/// once; any violation still present aborts.
pub fn validate(
    mut plan: RebalancePlan,
    limits: &RiskLimits,
    valuation: &Valuation,
    turnover_consumed_cents: i64,
    lots: &LotConfig,
) -> Result<ValidatedPlan> {
    let total = valuation.total_cents;
    let mut adjustments = Vec::new();

    for revalidation in [false, true] {
        let mut violated = false;

        // (a) post-trade single-asset weight. Comparisons run in whole
        // cents with one cent of slack for notional rounding, plus one
        // lot of slack for assets the plan trades: lot-rounding a
        // correcting leg legitimately leaves up to one lot of dust.
        let weight_cap_cents = (limits.max_single_asset_weight * total as f64).round() as i64;
        let post_values = post_trade_values(&plan, valuation);
        let offenders: Vec<Asset> = {
            let one_lot_slack = |asset: Asset| -> i64 {
                plan.legs
                    .iter()
                    .filter(|l| l.asset == asset)
                    .map(|l| (lots.lot_for(asset) * l.estimated_price_cents as f64).ceil() as i64)
                    .max()
                    .unwrap_or(0)
            };
            let mut offenders: Vec<Asset> = post_values
                .iter()
                .filter(|(a, v)| **v > weight_cap_cents + 1 + one_lot_slack(**a))
                .map(|(a, _)| *a)
                .collect();
            offenders.sort();
            offenders
        };

        for asset in offenders {
            let weight = post_values[&asset] as f64 / total as f64;
            if revalidation {
                return Err(Error::RiskLimit(format!(
                    "{asset} still at {:.1}% after scale-down (limit {:.1}%)",
                    weight * 100.0,
                    limits.max_single_asset_weight * 100.0,
                )));
            }

            let buy_notional: i64 = plan
                .legs
                .iter()
                .filter(|l| l.asset == asset && l.side == Side::Buy)
                .map(|l| l.notional_cents)
                .sum();
            if buy_notional == 0 {
                return Err(Error::RiskLimit(format!(
                    "{asset} at {:.1}% exceeds {:.1}% limit and no buy leg can be scaled",
                    weight * 100.0,
                    limits.max_single_asset_weight * 100.0,
                )));
            }

            let allowed_extra = weight_cap_cents - valuation.value_cents(asset);
            let factor = (allowed_extra.max(0) as f64 / buy_notional as f64).clamp(0.0, 1.0);

            for leg in plan
                .legs
                .iter_mut()
                .filter(|l| l.asset == asset && l.side == Side::Buy)
            {
                let old_qty = leg.quantity;
                leg.quantity = round_down_to_lot(old_qty * factor, lots.lot_for(asset));
                leg.notional_cents =
                    (leg.quantity * leg.estimated_price_cents as f64).round() as i64;
                adjustments.push(Adjustment {
                    asset,
                    rule: "max_single_asset_weight",
                    old_qty,
                    new_qty: leg.quantity,
                });
            }
            violated = true;
        }
        plan.legs.retain(|l| l.quantity > 0.0 && l.notional_cents > 0);

        // (b) daily turnover: hard cap, no scaling
        let plan_notional = plan.total_notional_cents();
        let remaining = limits.max_daily_turnover_cents - turnover_consumed_cents;
        if plan_notional > remaining {
            return Err(Error::RiskLimit(format!(
                "plan notional ${:.2} exceeds remaining daily turnover ${:.2}",
                plan_notional as f64 / 100.0,
                remaining.max(0) as f64 / 100.0,
            )));
        }

        // (c) per-leg notional cap, same one-cent slack
        for leg in &mut plan.legs {
            if leg.notional_cents > limits.max_trade_notional_cents + 1 {
                if revalidation {
                    return Err(Error::RiskLimit(format!(
                        "{} {} still ${:.2} after scale-down (cap ${:.2})",
                        leg.side,
                        leg.asset,
                        leg.notional_cents as f64 / 100.0,
                        limits.max_trade_notional_cents as f64 / 100.0,
                    )));
                }
                let old_qty = leg.quantity;
                let factor = limits.max_trade_notional_cents as f64 / leg.notional_cents as f64;
                leg.quantity = round_down_to_lot(old_qty * factor, lots.lot_for(leg.asset));
                leg.notional_cents =
                    (leg.quantity * leg.estimated_price_cents as f64).round() as i64;
                adjustments.push(Adjustment {
                    asset: leg.asset,
                    rule: "max_trade_notional",
                    old_qty,
                    new_qty: leg.quantity,
                });
                violated = true;
            }
        }
        plan.legs.retain(|l| l.quantity > 0.0 && l.notional_cents > 0);

        if !violated {
            break;
        }
    }

    Ok(ValidatedPlan { plan, adjustments })
}
