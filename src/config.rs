//! TOML configuration loading and validation.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Asset, Venue};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub lots: LotConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// When a rebalance cycle should fire. Portfolio documents may override
/// these per-portfolio.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Scheduled cadence; omit to rebalance on drift only.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: Option<u64>,
    /// Max per-asset |current - target| weight before a drift trigger.
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,
}

fn default_interval_hours() -> Option<u64> {
    Some(168) // weekly
}
fn default_drift_tolerance() -> f64 {
    0.05
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Skip drift corrections smaller than this notional.
    #[serde(default = "default_min_trade")]
    pub min_trade_usd: f64,
    /// Asset that funds BUY legs and receives SELL proceeds.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

fn default_min_trade() -> f64 {
    10.0
}
fn default_quote_asset() -> String {
    "USDT".into()
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            min_trade_usd: default_min_trade(),
            quote_asset: default_quote_asset(),
        }
    }
}

impl TradeConfig {
    pub fn quote(&self) -> Asset {
        Asset::new(&self.quote_asset)
    }

    pub fn min_trade_cents(&self) -> i64 {
        (self.min_trade_usd * 100.0) as i64
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_weight")]
    pub max_single_asset_weight: f64,
    #[serde(default = "default_max_turnover")]
    pub max_daily_turnover_usd: f64,
    #[serde(default = "default_max_trade")]
    pub max_trade_usd: f64,
}

fn default_max_weight() -> f64 {
    0.50
}
fn default_max_turnover() -> f64 {
    50_000.0
}
fn default_max_trade() -> f64 {
    10_000.0
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_single_asset_weight: default_max_weight(),
            max_daily_turnover_usd: default_max_turnover(),
            max_trade_usd: default_max_trade(),
        }
    }
}

/// Paper or live order routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
    /// Total tries per leg, transient failures included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_cap")]
    pub retry_max_delay_ms: u64,
    /// Pause between consecutive order submissions.
    #[serde(default = "default_order_interval")]
    pub order_interval_ms: u64,
    /// Watch-loop tick; trigger rules decide whether the tick acts.
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Paper
}
fn default_order_timeout() -> u64 {
    30
}
fn default_transfer_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base() -> u64 {
    500
}
fn default_retry_cap() -> u64 {
    10_000
}
fn default_order_interval() -> u64 {
    250
}
fn default_tick() -> u64 {
    60
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            order_timeout_secs: default_order_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base(),
            retry_max_delay_ms: default_retry_cap(),
            order_interval_ms: default_order_interval(),
            tick_secs: default_tick(),
        }
    }
}

/// Cost-model knobs that are not venue fees.
#[derive(Debug, Clone, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_slippage")]
    pub slippage_bps: u32,
    /// Fixed opportunity-cost charge applied when a leg needs an
    /// inter-venue transfer before it can execute.
    #[serde(default = "default_latency_penalty")]
    pub latency_penalty_usd: f64,
}

fn default_slippage() -> u32 {
    10
}
fn default_latency_penalty() -> f64 {
    1.0
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            slippage_bps: default_slippage(),
            latency_penalty_usd: default_latency_penalty(),
        }
    }
}

impl CostConfig {
    pub fn latency_penalty_cents(&self) -> i64 {
        (self.latency_penalty_usd * 100.0) as i64
    }
}

/// Fee structure of one venue. Static per run.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueProfile {
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub min_order_usd: f64,
    /// Flat fee charged on a withdrawal out of this venue.
    pub transfer_fee_usd: f64,
    pub transfer_latency_secs: u64,
}

impl VenueProfile {
    pub fn min_order_cents(&self) -> i64 {
        (self.min_order_usd * 100.0) as i64
    }

    pub fn transfer_fee_cents(&self) -> i64 {
        (self.transfer_fee_usd * 100.0) as i64
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenuesConfig {
    #[serde(default = "default_standard_profile")]
    pub standard: VenueProfile,
    #[serde(default = "default_pro_profile")]
    pub pro: VenueProfile,
}

// The standard venue has no explicit fee schedule; its spread is modeled
// as a flat taker rate. The pro venue runs a maker/taker schedule.
fn default_standard_profile() -> VenueProfile {
    VenueProfile {
        maker_fee: 0.0125,
        taker_fee: 0.0125,
        min_order_usd: 1.0,
        transfer_fee_usd: 1.0,
        transfer_latency_secs: 300,
    }
}

fn default_pro_profile() -> VenueProfile {
    VenueProfile {
        maker_fee: 0.0010,
        taker_fee: 0.0025,
        min_order_usd: 5.0,
        transfer_fee_usd: 1.0,
        transfer_latency_secs: 300,
    }
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_profile(),
            pro: default_pro_profile(),
        }
    }
}

impl VenuesConfig {
    pub fn profile(&self, venue: Venue) -> &VenueProfile {
        match venue {
            Venue::Standard => &self.standard,
            Venue::Pro => &self.pro,
        }
    }
}

/// Per-asset minimum tradable increments. Both venues list the same
/// increments.
#[derive(Debug, Clone, Deserialize)]
pub struct LotConfig {
    #[serde(default = "default_lot")]
    pub default: f64,
    #[serde(default)]
    pub sizes: FxHashMap<String, f64>,
}

fn default_lot() -> f64 {
    0.000_001
}

impl Default for LotConfig {
    fn default() -> Self {
        Self {
            default: default_lot(),
            sizes: FxHashMap::default(),
        }
    }
}

impl LotConfig {
    pub fn lot_for(&self, asset: Asset) -> f64 {
        self.sizes.get(asset.as_str()).copied().unwrap_or(self.default)
    }
}

/// Simulated account used when `execution.mode = "paper"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperConfig {
    /// Asset prices in USD.
    #[serde(default)]
    pub prices: FxHashMap<String, f64>,
    #[serde(default)]
    pub balances: PaperBalances,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperBalances {
    #[serde(default)]
    pub standard: FxHashMap<String, f64>,
    #[serde(default)]
    pub pro: FxHashMap<String, f64>,
}

impl PaperBalances {
    pub fn for_venue(&self, venue: Venue) -> &FxHashMap<String, f64> {
        match venue {
            Venue::Standard => &self.standard,
            Venue::Pro => &self.pro,
        }
    }
}

/// Live venue gateway. API keys come from the environment, never from
/// this file.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_secret_env")]
    pub api_secret_env: String,
}

fn default_base_url() -> String {
    "https://pro-api.nexo.io".into()
}
fn default_key_env() -> String {
    "NEXO_PUBLIC_KEY".into()
}
fn default_secret_env() -> String {
    "NEXO_SECRET_KEY".into()
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_key_env(),
            api_secret_env: default_secret_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_events_file")]
    pub events_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_events_file() -> String {
    "events.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            events_file: default_events_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(hours) = self.policy.interval_hours {
            if hours == 0 {
                return Err(Error::Config("interval_hours must be > 0 when set".into()));
            }
        }
        if self.policy.drift_tolerance <= 0.0 || self.policy.drift_tolerance >= 1.0 {
            return Err(Error::Config("drift_tolerance must be in (0.0, 1.0)".into()));
        }
        if self.trade.min_trade_usd < 0.0 {
            return Err(Error::Config("min_trade_usd must be >= 0".into()));
        }
        if self.trade.quote_asset.is_empty() || self.trade.quote_asset.len() > 8 {
            return Err(Error::Config("quote_asset must be 1..=8 bytes".into()));
        }
        if self.risk.max_single_asset_weight <= 0.0 || self.risk.max_single_asset_weight > 1.0 {
            return Err(Error::Config(
                "max_single_asset_weight must be in (0.0, 1.0]".into(),
            ));
        }
        if self.risk.max_daily_turnover_usd <= 0.0 {
            return Err(Error::Config("max_daily_turnover_usd must be > 0".into()));
        }
        if self.risk.max_trade_usd <= 0.0 {
            return Err(Error::Config("max_trade_usd must be > 0".into()));
        }
        if self.execution.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be >= 1".into()));
        }
        if self.execution.tick_secs == 0 {
            return Err(Error::Config("tick_secs must be > 0".into()));
        }
        for venue in Venue::BOTH {
            let profile = self.venues.profile(venue);
            if !(0.0..1.0).contains(&profile.maker_fee) || !(0.0..1.0).contains(&profile.taker_fee)
            {
                return Err(Error::Config(format!(
                    "{venue} venue fees must be in [0.0, 1.0)"
                )));
            }
            if profile.min_order_usd < 0.0 || profile.transfer_fee_usd < 0.0 {
                return Err(Error::Config(format!(
                    "{venue} venue order/transfer minimums must be >= 0"
                )));
            }
        }
        if self.lots.default <= 0.0 {
            return Err(Error::Config("default lot size must be > 0".into()));
        }
        for (asset, lot) in &self.lots.sizes {
            if *lot <= 0.0 {
                return Err(Error::Config(format!("lot size for {asset} must be > 0")));
            }
            if asset.is_empty() || asset.len() > 8 {
                return Err(Error::Config(format!(
                    "lot table asset '{asset}' must be 1..=8 bytes"
                )));
            }
        }
        Ok(())
    }

    /// Full path to the rebalance event log.
    pub fn events_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.events_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[policy]
interval_hours = 168
drift_tolerance = 0.05

[trade]
min_trade_usd = 10.0
quote_asset = "USDT"

[risk]
max_single_asset_weight = 0.5
max_daily_turnover_usd = 50000.0
max_trade_usd = 10000.0

[execution]
mode = "paper"
order_timeout_secs = 30
max_attempts = 3
retry_base_delay_ms = 500
order_interval_ms = 250
tick_secs = 60

[cost]
slippage_bps = 10
latency_penalty_usd = 1.0

[venues.standard]
maker_fee = 0.0125
taker_fee = 0.0125
min_order_usd = 1.0
transfer_fee_usd = 1.0
transfer_latency_secs = 300

[venues.pro]
maker_fee = 0.001
taker_fee = 0.0025
min_order_usd = 5.0
transfer_fee_usd = 1.0
transfer_latency_secs = 300

[lots]
default = 0.000001

[lots.sizes]
BTC = 0.0001
ETH = 0.001

[paper.prices]
BTC = 45000.0
ETH = 3000.0
USDT = 1.0

[paper.balances.standard]
BTC = 0.1
USDT = 5000.0

[paper.balances.pro]
ETH = 2.5
USDT = 1000.0

[logging]
dir = "./logs"
events_file = "events.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(config.policy.interval_hours, Some(168));
        assert_eq!(config.execution.mode, ExecutionMode::Paper);
        assert_eq!(config.venues.pro.taker_fee, 0.0025);
        assert_eq!(config.lots.lot_for(Asset::new("BTC")), 0.0001);
        assert_eq!(config.lots.lot_for(Asset::new("ADA")), 0.000_001);
        assert_eq!(config.paper.balances.standard["USDT"], 5000.0);
        config.validate().unwrap();
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.policy.interval_hours, Some(168));
        assert_eq!(config.policy.drift_tolerance, 0.05);
        assert_eq!(config.trade.min_trade_usd, 10.0);
        assert_eq!(config.execution.mode, ExecutionMode::Paper);
        assert_eq!(config.venues.standard.taker_fee, 0.0125);
        config.validate().unwrap();
    }

    #[test]
    fn validate_catches_bad_tolerance() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.policy.drift_tolerance = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_max_weight() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.risk.max_single_asset_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_fee() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.venues.pro.taker_fee = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_zero_attempts() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.execution.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_lot() {
        let mut config: Config = toml::from_str(example_toml()).unwrap();
        config.lots.sizes.insert("DOGE".into(), 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_mode_parses() {
        let toml_str = r#"
[execution]
mode = "live"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.execution.mode, ExecutionMode::Live);
        assert_eq!(config.live.api_key_env, "NEXO_PUBLIC_KEY");
    }

    #[test]
    fn events_path_joins_dir() {
        let config: Config = toml::from_str(example_toml()).unwrap();
        assert_eq!(
            config.events_path(),
            std::path::PathBuf::from("./logs/events.jsonl")
        );
    }
}
