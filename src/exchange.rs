//! Venue access interfaces: market data, balances, orders, transfers.
//!
//! The engine talks to venues only through these traits; the paper and
//! live exchanges are two implementations of the same contract.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::types::{Asset, Side, Venue};

/// Errors surfaced by venue calls.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("venue unavailable: {0}")]
    Unavailable(String),

    #[error("insufficient {asset} on {venue}: have {available}, need {required}")]
    InsufficientBalance {
        asset: Asset,
        venue: Venue,
        available: f64,
        required: f64,
    },

    #[error("price unavailable for {0}")]
    PriceUnavailable(Asset),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("authentication error: {0}")]
    Auth(String),
}

impl ExchangeError {
    /// Transient errors are retried with backoff; everything else fails
    /// the leg immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_) | ExchangeError::RateLimited | ExchangeError::Unavailable(_)
        )
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Spot price source. Prices are cents per whole unit of the asset.
pub trait MarketData {
    fn price_cents(&self, asset: Asset) -> ExchangeResult<i64>;
}

/// Fill produced by an order. Identical shape in paper and live mode.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FillResult {
    pub filled_qty: f64,
    pub avg_price_cents: i64,
    pub fee_cents: i64,
}

/// Acknowledged inter-venue transfer.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransferResult {
    pub delivered: f64,
    pub fee_cents: i64,
}

/// Account access across both venues. Every call is timeout-bounded;
/// a call that produces no response within its timeout returns
/// [`ExchangeError::Timeout`].
pub trait ExchangeClient {
    fn balances(&self, venue: Venue) -> ExchangeResult<FxHashMap<Asset, f64>>;

    fn place_order(
        &self,
        venue: Venue,
        asset: Asset,
        side: Side,
        quantity: f64,
        timeout: Duration,
    ) -> ExchangeResult<FillResult>;

    fn transfer(
        &self,
        asset: Asset,
        amount: f64,
        from: Venue,
        to: Venue,
        timeout: Duration,
    ) -> ExchangeResult<TransferResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(ExchangeError::RateLimited.is_transient());
        assert!(ExchangeError::Unavailable("maintenance".into()).is_transient());

        assert!(!ExchangeError::InvalidOrder("bad qty".into()).is_transient());
        assert!(!ExchangeError::PriceUnavailable(Asset::new("BTC")).is_transient());
        assert!(
            !ExchangeError::InsufficientBalance {
                asset: Asset::new("BTC"),
                venue: Venue::Pro,
                available: 0.0,
                required: 0.5,
            }
            .is_transient()
        );
        assert!(!ExchangeError::Auth("bad key".into()).is_transient());
    }

    #[test]
    fn insufficient_balance_message() {
        let err = ExchangeError::InsufficientBalance {
            asset: Asset::new("ETH"),
            venue: Venue::Standard,
            available: 1.0,
            required: 2.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("ETH"));
        assert!(msg.contains("standard"));
        assert!(msg.contains("2.5"));
    }
}
