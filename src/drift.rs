//! Holdings valuation and allocation drift.
//!
//! Weights are computed from a supplied price map; holdings are
//! aggregated per asset across venues.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::types::{Asset, Holding, PriceMap};

/// Valued portfolio snapshot.
#[derive(Debug, Clone)]
pub struct Valuation {
    pub total_cents: i64,
    /// Current weight per held asset.
    pub weights: FxHashMap<Asset, f64>,
    /// Current value per held asset.
    pub values_cents: FxHashMap<Asset, i64>,
}

impl Valuation {
    pub fn weight(&self, asset: Asset) -> f64 {
        self.weights.get(&asset).copied().unwrap_or(0.0)
    }

    pub fn value_cents(&self, asset: Asset) -> i64 {
        self.values_cents.get(&asset).copied().unwrap_or(0)
    }
}

/// Value holdings at the supplied prices.
///
/// Fails when a held asset has a missing or non-positive price, or when
/// the total value is zero (weights are undefined).
pub fn value_holdings(holdings: &[Holding], prices: &PriceMap) -> Result<Valuation> {
    let mut values: FxHashMap<Asset, i64> = FxHashMap::default();

    for holding in holdings {
        if holding.quantity <= 0.0 {
            continue;
        }
        let price = match prices.get(&holding.asset) {
            Some(&p) if p > 0 => p,
            Some(&p) => {
                return Err(Error::Valuation(format!(
                    "non-positive price {p} for {}",
                    holding.asset
                )));
            }
            None => {
                return Err(Error::Valuation(format!(
                    "missing price for {}",
                    holding.asset
                )));
            }
        };
        let value = (holding.quantity * price as f64).round() as i64;
        *values.entry(holding.asset).or_insert(0) += value;
    }

    let total: i64 = values.values().sum();
    if total <= 0 {
        return Err(Error::Valuation("total portfolio value is zero".into()));
    }

    let weights = values
        .iter()
        .map(|(asset, value)| (*asset, *value as f64 / total as f64))
        .collect();

    Ok(Valuation {
        total_cents: total,
        weights,
        values_cents: values,
    })
}

/// Drift per asset over the union of held and targeted assets:
/// `target − current`. Held-but-untargeted assets drift toward zero.
///
/// Both weight vectors sum to 1, so the drift vector sums to 0 within
/// floating tolerance.
pub fn compute_drift(valuation: &Valuation, targets: &[(Asset, f64)]) -> Vec<(Asset, f64)> {
    let target_map: FxHashMap<Asset, f64> = targets.iter().copied().collect();

    let mut drift = Vec::with_capacity(targets.len());
    for &(asset, target) in targets {
        drift.push((asset, target - valuation.weight(asset)));
    }
    for (asset, weight) in &valuation.weights {
        if !target_map.contains_key(asset) {
            drift.push((*asset, -*weight));
        }
    }
    drift
}

/// Largest per-asset absolute drift, for the trigger threshold.
pub fn max_abs_drift(valuation: &Valuation, targets: &[(Asset, f64)]) -> f64 {
    compute_drift(valuation, targets)
        .iter()
        .map(|(_, d)| d.abs())
        .fold(0.0, f64::max)
}
