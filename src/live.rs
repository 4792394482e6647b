//! Live venue gateway: signed REST calls against the custodial API.
//!
//! Compiled behind the `live` feature. Requests are HMAC-SHA256 signed
//! over the query string; API keys come from the environment, named in
//! `[live]` config. Every call carries an explicit timeout.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use sha2::Sha256;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exchange::{
    ExchangeClient, ExchangeError, ExchangeResult, FillResult, MarketData, TransferResult,
};
use crate::types::{Asset, Side, Venue};

type HmacSha256 = Hmac<Sha256>;

const QUOTE_TIMEOUT: Duration = Duration::from_secs(10);

fn sign(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(timeout)
    } else {
        ExchangeError::Unavailable(e.to_string())
    }
}

fn map_status(status: StatusCode, body: &str, what: &str) -> ExchangeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExchangeError::Auth(format!("{what}: {body}"))
        }
        s if s.is_server_error() => ExchangeError::Unavailable(format!("{what} returned {s}")),
        s => ExchangeError::InvalidOrder(format!("{what} returned {s}: {body}")),
    }
}

fn parse_amount(value: &str, what: &str) -> ExchangeResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| ExchangeError::Unavailable(format!("{what}: malformed amount '{value}'")))
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    #[serde(rename = "assetName")]
    asset: String,
    #[serde(rename = "availableBalance")]
    available: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "executedQuantity")]
    executed_quantity: String,
    #[serde(rename = "executedPrice")]
    executed_price: String,
    fee: String,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    amount: String,
    fee: String,
}

/// Blocking REST client for the custodial account's two venues.
pub struct LiveExchange {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    quote: Asset,
}

impl LiveExchange {
    /// Build from `[live]` config, reading key material from the
    /// environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.live.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", config.live.api_key_env)))?;
        let api_secret = std::env::var(&config.live.api_secret_env)
            .map_err(|_| Error::Config(format!("{} is not set", config.live.api_secret_env)))?;

        Ok(Self {
            client: Client::new(),
            base_url: config.live.base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            quote: config.trade.quote(),
        })
    }

    fn pair(&self, asset: Asset) -> String {
        format!("{}/{}", asset, self.quote)
    }

    fn signed_get(
        &self,
        path: &str,
        query: &str,
        timeout: Duration,
        what: &str,
    ) -> ExchangeResult<reqwest::blocking::Response> {
        let query = format!("{query}&timestamp={}", timestamp_ms());
        let signature = sign(&query, &self.api_secret);
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        debug!("GET {path}");
        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .timeout(timeout)
            .send()
            .map_err(|e| map_request_error(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(map_status(status, &body, what));
        }
        Ok(response)
    }

    fn signed_post(
        &self,
        path: &str,
        query: &str,
        timeout: Duration,
        what: &str,
    ) -> ExchangeResult<reqwest::blocking::Response> {
        let query = format!("{query}&timestamp={}", timestamp_ms());
        let signature = sign(&query, &self.api_secret);
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        debug!("POST {path}");
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .timeout(timeout)
            .send()
            .map_err(|e| map_request_error(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(map_status(status, &body, what));
        }
        Ok(response)
    }
}

impl MarketData for LiveExchange {
    fn price_cents(&self, asset: Asset) -> ExchangeResult<i64> {
        if asset == self.quote {
            return Ok(1_00);
        }
        let query = format!("pair={}", self.pair(asset));
        let response = self.signed_get("/api/v1/quote", &query, QUOTE_TIMEOUT, "quote")?;
        let quote: QuoteResponse = response
            .json()
            .map_err(|e| ExchangeError::Unavailable(format!("quote parse: {e}")))?;
        let price = parse_amount(&quote.price, "quote")?;
        if price <= 0.0 {
            return Err(ExchangeError::PriceUnavailable(asset));
        }
        Ok((price * 100.0).round() as i64)
    }
}

impl ExchangeClient for LiveExchange {
    fn balances(&self, venue: Venue) -> ExchangeResult<FxHashMap<Asset, f64>> {
        let query = format!("venue={venue}");
        let response = self.signed_get(
            "/api/v1/accountSummary",
            &query,
            QUOTE_TIMEOUT,
            "accountSummary",
        )?;
        let summary: BalancesResponse = response
            .json()
            .map_err(|e| ExchangeError::Unavailable(format!("accountSummary parse: {e}")))?;

        let mut balances = FxHashMap::default();
        for entry in summary.balances {
            if entry.asset.is_empty() || entry.asset.len() > 8 {
                continue;
            }
            let available = parse_amount(&entry.available, "accountSummary")?;
            if available > 0.0 {
                balances.insert(Asset::new(&entry.asset), available);
            }
        }
        Ok(balances)
    }

    fn place_order(
        &self,
        venue: Venue,
        asset: Asset,
        side: Side,
        quantity: f64,
        timeout: Duration,
    ) -> ExchangeResult<FillResult> {
        let side = match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };
        let query = format!(
            "pair={}&side={side}&quantity={quantity}&venue={venue}&type=market",
            self.pair(asset)
        );
        let response = self.signed_post("/api/v1/orders", &query, timeout, "order")?;
        let order: OrderResponse = response
            .json()
            .map_err(|e| ExchangeError::Unavailable(format!("order parse: {e}")))?;

        let filled_qty = parse_amount(&order.executed_quantity, "order")?;
        let price = parse_amount(&order.executed_price, "order")?;
        let fee = parse_amount(&order.fee, "order")?;
        Ok(FillResult {
            filled_qty,
            avg_price_cents: (price * 100.0).round() as i64,
            fee_cents: (fee * 100.0).round() as i64,
        })
    }

    fn transfer(
        &self,
        asset: Asset,
        amount: f64,
        from: Venue,
        to: Venue,
        timeout: Duration,
    ) -> ExchangeResult<TransferResult> {
        let query = format!("asset={asset}&amount={amount}&from={from}&to={to}");
        let response = self.signed_post("/api/v1/transfers", &query, timeout, "transfer")?;
        let transfer: TransferResponse = response
            .json()
            .map_err(|e| ExchangeError::Unavailable(format!("transfer parse: {e}")))?;

        let delivered = parse_amount(&transfer.amount, "transfer")?;
        let fee = parse_amount(&transfer.fee, "transfer")?;
        Ok(TransferResult {
            delivered,
            fee_cents: (fee * 100.0).round() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let a = sign("pair=BTC/USDT&timestamp=1700000000000", "secret");
        let b = sign("pair=BTC/USDT&timestamp=1700000000000", "secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = sign("pair=BTC/USDT&timestamp=1700000000001", "secret");
        assert_ne!(a, other);
    }

    #[test]
    fn balances_response_parses() {
        let json = r#"{
            "balances": [
                { "assetName": "BTC", "availableBalance": "0.5", "totalBalance": "0.6" },
                { "assetName": "USDT", "availableBalance": "1200.0" }
            ]
        }"#;
        let parsed: BalancesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.balances.len(), 2);
        assert_eq!(parsed.balances[0].asset, "BTC");
        assert_eq!(parsed.balances[0].available, "0.5");
    }

    #[test]
    fn order_response_parses() {
        let json = r#"{
            "orderId": "abc-123",
            "executedQuantity": "0.25",
            "executedPrice": "45123.50",
            "fee": "28.20"
        }"#;
        let parsed: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parse_amount(&parsed.executed_quantity, "t").unwrap(), 0.25);
        assert_eq!(parse_amount(&parsed.executed_price, "t").unwrap(), 45_123.5);
    }

    #[test]
    fn malformed_amount_is_an_error() {
        assert!(parse_amount("not-a-number", "t").is_err());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "", "order"),
            ExchangeError::RateLimited
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "bad key", "order"),
            ExchangeError::Auth(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "", "order"),
            ExchangeError::Unavailable(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "below minimum", "order"),
            ExchangeError::InvalidOrder(_)
        ));
    }
}
