//! Portfolio state document: target weights, rebalance policy, and the
//! last-rebalance timestamp.
//!
//! The document is mutated in exactly two places: an explicit update by
//! the operator, and the executor stamping `last_rebalanced_at` when a
//! cycle reaches a terminal state with fills.

use std::path::Path;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::Asset;

/// A portfolio: named target allocation plus trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub targets: Vec<TargetWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyOverrides>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rebalanced_at: Option<DateTime<Utc>>,
}

/// A single target: asset + allocation weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetWeight {
    pub asset: Asset,
    pub weight: f64,
}

/// Optional per-portfolio policy overrides on top of the config defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_tolerance: Option<f64>,
}

/// Effective trigger policy after overrides are applied.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub interval: Option<chrono::Duration>,
    pub tolerance: f64,
}

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

impl Portfolio {
    /// Load and validate a portfolio JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::PortfolioRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let portfolio: Portfolio = serde_json::from_str(&contents)?;
        portfolio.validate()?;
        Ok(portfolio)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let portfolio: Portfolio = serde_json::from_str(json)?;
        portfolio.validate()?;
        Ok(portfolio)
    }

    /// Write the document back, preserving `last_rebalanced_at`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the allocation.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Portfolio("portfolio name must not be empty".into()));
        }
        if self.targets.is_empty() {
            return Err(Error::Portfolio("targets list is empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for t in &self.targets {
            if !seen.insert(t.asset) {
                return Err(Error::Portfolio(format!("duplicate asset: {}", t.asset)));
            }
        }

        for t in &self.targets {
            if t.weight <= 0.0 || t.weight > 1.0 {
                return Err(Error::Portfolio(format!(
                    "weight for {} ({}) must be in (0.0, 1.0]",
                    t.asset, t.weight
                )));
            }
        }

        let sum: f64 = self.targets.iter().map(|t| t.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(Error::Portfolio(format!(
                "target weights sum to {sum:.6} (must be 1.0)"
            )));
        }

        if let Some(ref overrides) = self.policy {
            if let Some(hours) = overrides.interval_hours {
                if hours == 0 {
                    return Err(Error::Portfolio("interval_hours override must be > 0".into()));
                }
            }
            if let Some(tol) = overrides.drift_tolerance {
                if tol <= 0.0 || tol >= 1.0 {
                    return Err(Error::Portfolio(
                        "drift_tolerance override must be in (0.0, 1.0)".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Targeted assets.
    pub fn assets(&self) -> Vec<Asset> {
        self.targets.iter().map(|t| t.asset).collect()
    }

    /// (asset, weight) pairs for the drift calculator.
    pub fn as_target_pairs(&self) -> Vec<(Asset, f64)> {
        self.targets.iter().map(|t| (t.asset, t.weight)).collect()
    }

    pub fn target_map(&self) -> FxHashMap<Asset, f64> {
        self.targets.iter().map(|t| (t.asset, t.weight)).collect()
    }

    /// Config policy with this portfolio's overrides applied.
    pub fn effective_policy(&self, config: &Config) -> Policy {
        let mut interval_hours = config.policy.interval_hours;
        let mut tolerance = config.policy.drift_tolerance;
        if let Some(ref overrides) = self.policy {
            if overrides.interval_hours.is_some() {
                interval_hours = overrides.interval_hours;
            }
            if let Some(tol) = overrides.drift_tolerance {
                tolerance = tol;
            }
        }
        Policy {
            interval: interval_hours.map(|h| chrono::Duration::hours(h as i64)),
            tolerance,
        }
    }
}
