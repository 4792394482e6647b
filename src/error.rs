//! Error types for the rebalancer.

use std::path::PathBuf;

/// All errors that can occur during a rebalance cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("portfolio error: {0}")]
    Portfolio(String),

    #[error("failed to read portfolio file {path}: {source}")]
    PortfolioRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse portfolio JSON: {0}")]
    PortfolioParse(#[from] serde_json::Error),

    #[error("valuation error: {0}")]
    Valuation(String),

    #[error("risk limit exceeded: {0}")]
    RiskLimit(String),

    #[error("venue error: {0}")]
    Venue(String),

    #[error("order error: {0}")]
    Order(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("event store error: {0}")]
    Store(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
