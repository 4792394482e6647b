//! Decides whether a rebalance cycle should fire now.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::drift::{Valuation, max_abs_drift};
use crate::portfolio::Policy;
use crate::types::Asset;

/// Why a cycle fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    Scheduled,
    Drift,
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Scheduled => write!(f, "scheduled"),
            TriggerReason::Drift => write!(f, "drift"),
            TriggerReason::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of a trigger evaluation.
#[derive(Debug, Clone, Copy)]
pub struct TriggerResult {
    pub should_trigger: bool,
    pub reason: Option<TriggerReason>,
    /// Largest per-asset |current − target|, for logging.
    pub max_drift: f64,
}

impl TriggerResult {
    fn fired(reason: TriggerReason, max_drift: f64) -> Self {
        Self {
            should_trigger: true,
            reason: Some(reason),
            max_drift,
        }
    }

    fn quiet(max_drift: f64) -> Self {
        Self {
            should_trigger: false,
            reason: None,
            max_drift,
        }
    }
}

/// Evaluate the trigger rules in order; first match wins.
///
/// 1. Interval elapsed since the last rebalance (a portfolio that has
///    never rebalanced is due immediately).
/// 2. Max per-asset drift beyond the tolerance.
/// 3. No trigger.
///
/// Pure function of its inputs: re-evaluating with identical inputs
/// gives the identical result.
pub fn evaluate(
    policy: &Policy,
    last_rebalanced_at: Option<DateTime<Utc>>,
    valuation: &Valuation,
    targets: &[(Asset, f64)],
    now: DateTime<Utc>,
) -> TriggerResult {
    let max_drift = max_abs_drift(valuation, targets);

    if let Some(interval) = policy.interval {
        let due = match last_rebalanced_at {
            None => true,
            Some(last) => now - last >= interval,
        };
        if due {
            return TriggerResult::fired(TriggerReason::Scheduled, max_drift);
        }
    }

    if max_drift > policy.tolerance {
        return TriggerResult::fired(TriggerReason::Drift, max_drift);
    }

    TriggerResult::quiet(max_drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rustc_hash::FxHashMap;

    fn btc() -> Asset {
        Asset::new("BTC")
    }
    fn eth() -> Asset {
        Asset::new("ETH")
    }

    fn valuation(weights: &[(Asset, f64)]) -> Valuation {
        let total = 1_000_000_00_i64;
        let weight_map: FxHashMap<Asset, f64> = weights.iter().copied().collect();
        let values = weights
            .iter()
            .map(|(a, w)| (*a, (total as f64 * w) as i64))
            .collect();
        Valuation {
            total_cents: total,
            weights: weight_map,
            values_cents: values,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap()
    }

    fn policy(interval_hours: Option<i64>, tolerance: f64) -> Policy {
        Policy {
            interval: interval_hours.map(chrono::Duration::hours),
            tolerance,
        }
    }

    #[test]
    fn interval_elapsed_fires_scheduled() {
        let v = valuation(&[(btc(), 0.5), (eth(), 0.5)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];
        let last = now() - chrono::Duration::hours(169);

        let result = evaluate(&policy(Some(168), 0.05), Some(last), &v, &targets, now());
        assert!(result.should_trigger);
        assert_eq!(result.reason, Some(TriggerReason::Scheduled));
    }

    #[test]
    fn never_rebalanced_is_due() {
        let v = valuation(&[(btc(), 0.5), (eth(), 0.5)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];

        let result = evaluate(&policy(Some(168), 0.05), None, &v, &targets, now());
        assert!(result.should_trigger);
        assert_eq!(result.reason, Some(TriggerReason::Scheduled));
    }

    #[test]
    fn drift_beyond_tolerance_fires() {
        let v = valuation(&[(btc(), 0.7), (eth(), 0.3)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];
        let last = now() - chrono::Duration::hours(1);

        let result = evaluate(&policy(Some(168), 0.05), Some(last), &v, &targets, now());
        assert!(result.should_trigger);
        assert_eq!(result.reason, Some(TriggerReason::Drift));
        assert!((result.max_drift - 0.2).abs() < 1e-9);
    }

    #[test]
    fn scheduled_wins_over_drift() {
        let v = valuation(&[(btc(), 0.7), (eth(), 0.3)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];
        let last = now() - chrono::Duration::hours(200);

        let result = evaluate(&policy(Some(168), 0.05), Some(last), &v, &targets, now());
        assert_eq!(result.reason, Some(TriggerReason::Scheduled));
    }

    #[test]
    fn within_tolerance_does_not_fire() {
        let v = valuation(&[(btc(), 0.52), (eth(), 0.48)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];
        let last = now() - chrono::Duration::hours(1);

        let result = evaluate(&policy(Some(168), 0.05), Some(last), &v, &targets, now());
        assert!(!result.should_trigger);
        assert!(result.reason.is_none());
    }

    #[test]
    fn drift_only_policy_ignores_schedule() {
        let v = valuation(&[(btc(), 0.52), (eth(), 0.48)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];

        // No interval, drift within tolerance, never rebalanced: quiet.
        let result = evaluate(&policy(None, 0.05), None, &v, &targets, now());
        assert!(!result.should_trigger);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let v = valuation(&[(btc(), 0.7), (eth(), 0.3)]);
        let targets = vec![(btc(), 0.5), (eth(), 0.5)];
        let last = now() - chrono::Duration::hours(1);
        let p = policy(Some(168), 0.05);

        let a = evaluate(&p, Some(last), &v, &targets, now());
        let b = evaluate(&p, Some(last), &v, &targets, now());
        assert_eq!(a.should_trigger, b.should_trigger);
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.max_drift, b.max_drift);
    }
}
