// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! Property-based tests for the planning pipeline invariants.
//!
//! These use proptest to verify that the drift, plan, and risk stages
//! hold their guarantees across randomly generated portfolios.

use ballast::config::LotConfig;
use ballast::drift::{self, Valuation};
use ballast::plan::{self, RebalancePlan, TradeLeg, round_down_to_lot};
use ballast::risk::{self, RiskLimits};
use ballast::types::{Asset, Holding, PriceMap, Side, Venue};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rustc_hash::FxHashMap;

fn asset(i: usize) -> Asset {
    Asset::new(&format!("A{i}"))
}

fn quote() -> Asset {
    Asset::new("USDT")
}

/// Random holdings: (quantity, price_cents) per asset, plus a quote
/// balance so totals stay positive.
fn holdings_strategy() -> impl Strategy<Value = Vec<(Asset, f64, i64)>> {
    prop::collection::vec((0.1f64..50.0, 1_00i64..1_000_000_00), 2..5).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (qty, price))| (asset(i), qty, price))
            .collect()
    })
}

/// Random target weights over the same assets, normalized to sum to 1.
fn weights_strategy(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.05f64..1.0, len).prop_map(|raw| {
        let sum: f64 = raw.iter().sum();
        raw.into_iter().map(|w| w / sum).collect()
    })
}

fn value(holdings: &[(Asset, f64, i64)]) -> (Vec<Holding>, PriceMap, Valuation) {
    let held: Vec<Holding> = holdings
        .iter()
        .map(|(asset, qty, _)| Holding {
            asset: *asset,
            venue: Venue::Pro,
            quantity: *qty,
        })
        .collect();
    let mut prices = PriceMap::default();
    for (asset, _, price) in holdings {
        prices.insert(*asset, *price);
    }
    prices.insert(quote(), 1_00);
    let valuation = drift::value_holdings(&held, &prices).unwrap();
    (held, prices, valuation)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // ========================================================================
    // DRIFT INVARIANTS
    // ========================================================================

    /// Both weight vectors sum to 1, so drift sums to zero.
    #[test]
    fn drift_vector_sums_to_zero(
        holdings in holdings_strategy(),
        raw_weights in weights_strategy(4),
    ) {
        let (_, _, valuation) = value(&holdings);
        let targets: Vec<(Asset, f64)> = holdings
            .iter()
            .zip(raw_weights.iter())
            .map(|((asset, _, _), weight)| (*asset, *weight))
            .collect();
        // Renormalize over the subset actually used
        let sum: f64 = targets.iter().map(|(_, w)| w).sum();
        let targets: Vec<(Asset, f64)> =
            targets.into_iter().map(|(a, w)| (a, w / sum)).collect();

        let drift = drift::compute_drift(&valuation, &targets);
        let total: f64 = drift.iter().map(|(_, d)| d).sum();
        prop_assert!(total.abs() < 1e-9, "drift sum {total}");
    }

    /// Current weights always sum to 1 for positive holdings.
    #[test]
    fn weights_sum_to_one(holdings in holdings_strategy()) {
        let (_, _, valuation) = value(&holdings);
        let total: f64 = valuation.weights.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "weight sum {total}");
    }

    // ========================================================================
    // PLAN INVARIANTS
    // ========================================================================

    /// Every emitted leg is lot-aligned, at least one lot, and within
    /// one lot of the minimum-trade floor.
    #[test]
    fn legs_respect_lot_and_minimum(
        holdings in holdings_strategy(),
        raw_weights in weights_strategy(4),
    ) {
        let (_, prices, valuation) = value(&holdings);
        let targets: Vec<(Asset, f64)> = {
            let pairs: Vec<_> = holdings
                .iter()
                .zip(raw_weights.iter())
                .map(|((asset, _, _), weight)| (*asset, *weight))
                .collect();
            let sum: f64 = pairs.iter().map(|(_, w)| w).sum();
            pairs.into_iter().map(|(a, w)| (a, w / sum)).collect()
        };
        let drift_vec = drift::compute_drift(&valuation, &targets);

        let mut lots = LotConfig::default();
        lots.default = 0.001;
        let min_trade_cents = 50_00;

        let legs = plan::generate(
            &drift_vec,
            valuation.total_cents,
            &prices,
            &lots,
            min_trade_cents,
            quote(),
        )
        .unwrap();

        for leg in &legs {
            let lot = lots.lot_for(leg.asset);
            prop_assert!(leg.quantity >= lot, "{} below one lot", leg.asset);
            let lots_count = leg.quantity / lot;
            prop_assert!(
                (lots_count - lots_count.round()).abs() < 1e-6,
                "{} not lot aligned: {}",
                leg.asset,
                leg.quantity
            );
            // Pre-rounding notional cleared the floor, so the rounded
            // leg sits within one lot of it.
            let one_lot_cents = lot * leg.price_cents as f64;
            prop_assert!(
                leg.notional_cents as f64 + one_lot_cents >= min_trade_cents as f64,
                "{} notional {} far below minimum",
                leg.asset,
                leg.notional_cents
            );
        }
    }

    /// SELL legs always precede BUY legs.
    #[test]
    fn sells_always_precede_buys(
        holdings in holdings_strategy(),
        raw_weights in weights_strategy(4),
    ) {
        let (_, prices, valuation) = value(&holdings);
        let targets: Vec<(Asset, f64)> = {
            let pairs: Vec<_> = holdings
                .iter()
                .zip(raw_weights.iter())
                .map(|((asset, _, _), weight)| (*asset, *weight))
                .collect();
            let sum: f64 = pairs.iter().map(|(_, w)| w).sum();
            pairs.into_iter().map(|(a, w)| (a, w / sum)).collect()
        };
        let drift_vec = drift::compute_drift(&valuation, &targets);

        let legs = plan::generate(
            &drift_vec,
            valuation.total_cents,
            &prices,
            &LotConfig::default(),
            10_00,
            quote(),
        )
        .unwrap();

        let first_buy = legs.iter().position(|l| l.side == Side::Buy);
        if let Some(first_buy) = first_buy {
            prop_assert!(
                legs[first_buy..].iter().all(|l| l.side == Side::Buy),
                "sell after first buy"
            );
        }
    }

    // ========================================================================
    // RISK INVARIANTS
    // ========================================================================

    /// A validated plan never leaves a post-trade weight above the cap,
    /// and never exceeds the remaining turnover budget.
    #[test]
    fn validated_plans_respect_limits(
        holdings in holdings_strategy(),
        buy_fraction in 0.01f64..0.8,
    ) {
        let (_, _, valuation) = value(&holdings);
        let (target_asset, _, price) = holdings[0];

        let quantity = buy_fraction * valuation.total_cents as f64 / price as f64;
        let legs = vec![TradeLeg {
            asset: target_asset,
            side: Side::Buy,
            quantity,
            venue: Venue::Pro,
            estimated_price_cents: price,
            notional_cents: (quantity * price as f64).round() as i64,
            depends_on_transfer: None,
        }];
        let plan = RebalancePlan {
            transfers: Vec::new(),
            legs,
            expected_total_cost_cents: 0,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap(),
        };

        let limits = RiskLimits {
            max_single_asset_weight: 0.5,
            max_daily_turnover_cents: valuation.total_cents,
            max_trade_notional_cents: valuation.total_cents / 2,
        };

        if let Ok(validated) = risk::validate(plan, &limits, &valuation, 0, &LotConfig::default()) {
            let mut post: FxHashMap<Asset, i64> = valuation.values_cents.clone();
            let mut total_notional = 0;
            for leg in &validated.plan.legs {
                *post.entry(leg.asset).or_insert(0) += leg.notional_cents;
                total_notional += leg.notional_cents;
                // One cent of slack mirrors the guard's integer-cents
                // comparisons
                prop_assert!(leg.notional_cents <= limits.max_trade_notional_cents + 1);
            }
            for (asset, value) in post {
                let weight = value as f64 / valuation.total_cents as f64;
                // Mirror the guard's tolerance: cents rounding plus one
                // lot of dust on the asset the plan trades
                let lot_dust = if asset == target_asset {
                    (LotConfig::default().default * price as f64).ceil()
                } else {
                    0.0
                };
                let slack = (2.0 + lot_dust) / valuation.total_cents as f64 + 1e-9;
                prop_assert!(
                    weight <= limits.max_single_asset_weight + slack,
                    "{asset} at {weight}"
                );
            }
            prop_assert!(total_notional <= limits.max_daily_turnover_cents);
        }
    }

    // ========================================================================
    // LOT ROUNDING
    // ========================================================================

    /// Rounding down never increases quantity and never drops more
    /// than one lot.
    #[test]
    fn lot_rounding_bounds(
        quantity in 0.0f64..1_000.0,
        lot in prop_oneof![Just(0.001f64), Just(0.01), Just(0.1), Just(1.0)],
    ) {
        let rounded = round_down_to_lot(quantity, lot);
        prop_assert!(rounded <= quantity + 1e-9);
        prop_assert!(quantity - rounded < lot + 1e-9);
        prop_assert!(rounded >= 0.0);
    }
}
