//! Simulated exchange for paper trading and tests.
//!
//! Fills are deterministic: full quantity at the quoted price, taker
//! fee applied, balances moved accordingly. Failures can be scripted
//! per asset to exercise retry and partial-failure paths.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exchange::{
    ExchangeClient, ExchangeError, ExchangeResult, FillResult, MarketData, TransferResult,
};
use crate::types::{Asset, Side, Venue};

/// A recorded order submission, for assertions in tests.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub venue: Venue,
    pub asset: Asset,
    pub side: Side,
    pub quantity: f64,
}

/// Builder for [`PaperExchange`].
pub struct PaperExchangeBuilder {
    prices: FxHashMap<Asset, i64>,
    balances: FxHashMap<(Venue, Asset), f64>,
    taker_fees: FxHashMap<Venue, f64>,
    transfer_fees: FxHashMap<Venue, i64>,
    quote: Asset,
}

impl PaperExchangeBuilder {
    pub fn price(mut self, asset: Asset, price_cents: i64) -> Self {
        self.prices.insert(asset, price_cents);
        self
    }

    pub fn balance(mut self, venue: Venue, asset: Asset, quantity: f64) -> Self {
        self.balances.insert((venue, asset), quantity);
        self
    }

    pub fn taker_fee(mut self, venue: Venue, rate: f64) -> Self {
        self.taker_fees.insert(venue, rate);
        self
    }

    pub fn transfer_fee(mut self, venue: Venue, fee_cents: i64) -> Self {
        self.transfer_fees.insert(venue, fee_cents);
        self
    }

    pub fn quote(mut self, asset: Asset) -> Self {
        self.quote = asset;
        self
    }

    pub fn build(self) -> PaperExchange {
        PaperExchange {
            prices: self.prices,
            taker_fees: self.taker_fees,
            transfer_fees: self.transfer_fees,
            quote: self.quote,
            balances: Mutex::new(self.balances),
            orders: Mutex::new(Vec::new()),
            failures: Mutex::new(FxHashMap::default()),
        }
    }
}

/// In-memory venue pair with deterministic fills.
pub struct PaperExchange {
    prices: FxHashMap<Asset, i64>,
    taker_fees: FxHashMap<Venue, f64>,
    transfer_fees: FxHashMap<Venue, i64>,
    quote: Asset,
    balances: Mutex<FxHashMap<(Venue, Asset), f64>>,
    orders: Mutex<Vec<RecordedOrder>>,
    failures: Mutex<FxHashMap<Asset, VecDeque<ExchangeError>>>,
}

impl PaperExchange {
    pub fn builder() -> PaperExchangeBuilder {
        let mut taker_fees = FxHashMap::default();
        taker_fees.insert(Venue::Standard, 0.0125);
        taker_fees.insert(Venue::Pro, 0.0025);
        let mut transfer_fees = FxHashMap::default();
        transfer_fees.insert(Venue::Standard, 1_00);
        transfer_fees.insert(Venue::Pro, 1_00);

        PaperExchangeBuilder {
            prices: FxHashMap::default(),
            balances: FxHashMap::default(),
            taker_fees,
            transfer_fees,
            quote: Asset::new("USDT"),
        }
    }

    /// Build the simulated account from `[paper]` config: prices and
    /// starting balances, fee schedule from the venue profiles.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.paper.prices.is_empty() {
            return Err(Error::Config(
                "paper mode needs [paper.prices] with at least the quote asset".into(),
            ));
        }

        let mut builder = PaperExchange::builder().quote(config.trade.quote());
        for venue in Venue::BOTH {
            let profile = config.venues.profile(venue);
            builder = builder
                .taker_fee(venue, profile.taker_fee)
                .transfer_fee(venue, profile.transfer_fee_cents());
        }
        for (name, usd) in &config.paper.prices {
            if name.is_empty() || name.len() > 8 {
                return Err(Error::Config(format!(
                    "paper price asset '{name}' must be 1..=8 bytes"
                )));
            }
            builder = builder.price(Asset::new(name), (usd * 100.0).round() as i64);
        }
        for venue in Venue::BOTH {
            for (name, qty) in config.paper.balances.for_venue(venue) {
                if name.is_empty() || name.len() > 8 {
                    return Err(Error::Config(format!(
                        "paper balance asset '{name}' must be 1..=8 bytes"
                    )));
                }
                builder = builder.balance(venue, Asset::new(name), *qty);
            }
        }
        Ok(builder.build())
    }

    /// Queue an error for the next order on `asset`. Queued errors are
    /// consumed one per submission attempt.
    pub fn fail_next(&self, asset: Asset, error: ExchangeError) {
        self.failures
            .lock()
            .unwrap()
            .entry(asset)
            .or_default()
            .push_back(error);
    }

    /// All orders submitted so far, for assertions in tests.
    pub fn recorded_orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn balance(&self, venue: Venue, asset: Asset) -> f64 {
        self.balances
            .lock()
            .unwrap()
            .get(&(venue, asset))
            .copied()
            .unwrap_or(0.0)
    }

    fn price_of(&self, asset: Asset) -> ExchangeResult<i64> {
        match self.prices.get(&asset) {
            Some(&p) if p > 0 => Ok(p),
            _ => Err(ExchangeError::PriceUnavailable(asset)),
        }
    }
}

impl MarketData for PaperExchange {
    fn price_cents(&self, asset: Asset) -> ExchangeResult<i64> {
        self.price_of(asset)
    }
}

impl ExchangeClient for PaperExchange {
    fn balances(&self, venue: Venue) -> ExchangeResult<FxHashMap<Asset, f64>> {
        let balances = self.balances.lock().unwrap();
        Ok(balances
            .iter()
            .filter(|((v, _), qty)| *v == venue && **qty > 0.0)
            .map(|((_, asset), qty)| (*asset, *qty))
            .collect())
    }

    fn place_order(
        &self,
        venue: Venue,
        asset: Asset,
        side: Side,
        quantity: f64,
        _timeout: Duration,
    ) -> ExchangeResult<FillResult> {
        if let Some(queue) = self.failures.lock().unwrap().get_mut(&asset) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        if quantity <= 0.0 {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity {quantity} must be positive"
            )));
        }

        let price = self.price_of(asset)?;
        let quote_price = self.price_of(self.quote)?;
        let notional_cents = (quantity * price as f64).round() as i64;
        let fee_rate = self.taker_fees.get(&venue).copied().unwrap_or(0.0);
        let fee_cents = (notional_cents as f64 * fee_rate).round() as i64;

        let mut balances = self.balances.lock().unwrap();
        match side {
            Side::Buy => {
                let required = (notional_cents + fee_cents) as f64 / quote_price as f64;
                let available = balances.get(&(venue, self.quote)).copied().unwrap_or(0.0);
                if available + 1e-9 < required {
                    return Err(ExchangeError::InsufficientBalance {
                        asset: self.quote,
                        venue,
                        available,
                        required,
                    });
                }
                *balances.entry((venue, self.quote)).or_insert(0.0) -= required;
                *balances.entry((venue, asset)).or_insert(0.0) += quantity;
            }
            Side::Sell => {
                let available = balances.get(&(venue, asset)).copied().unwrap_or(0.0);
                if available + 1e-9 < quantity {
                    return Err(ExchangeError::InsufficientBalance {
                        asset,
                        venue,
                        available,
                        required: quantity,
                    });
                }
                *balances.entry((venue, asset)).or_insert(0.0) -= quantity;
                *balances.entry((venue, self.quote)).or_insert(0.0) +=
                    (notional_cents - fee_cents) as f64 / quote_price as f64;
            }
        }
        drop(balances);

        self.orders.lock().unwrap().push(RecordedOrder {
            venue,
            asset,
            side,
            quantity,
        });

        Ok(FillResult {
            filled_qty: quantity,
            avg_price_cents: price,
            fee_cents,
        })
    }

    fn transfer(
        &self,
        asset: Asset,
        amount: f64,
        from: Venue,
        to: Venue,
        _timeout: Duration,
    ) -> ExchangeResult<TransferResult> {
        if amount <= 0.0 {
            return Err(ExchangeError::InvalidOrder(format!(
                "transfer amount {amount} must be positive"
            )));
        }
        if from == to {
            return Err(ExchangeError::InvalidOrder(
                "transfer source and destination are the same venue".into(),
            ));
        }

        let price = self.price_of(asset)?;
        let fee_cents = self.transfer_fees.get(&from).copied().unwrap_or(0);
        let fee_qty = fee_cents as f64 / price as f64;

        let mut balances = self.balances.lock().unwrap();
        let available = balances.get(&(from, asset)).copied().unwrap_or(0.0);
        let required = amount + fee_qty;
        if available + 1e-9 < required {
            return Err(ExchangeError::InsufficientBalance {
                asset,
                venue: from,
                available,
                required,
            });
        }
        *balances.entry((from, asset)).or_insert(0.0) -= required;
        *balances.entry((to, asset)).or_insert(0.0) += amount;

        Ok(TransferResult {
            delivered: amount,
            fee_cents,
        })
    }
}
