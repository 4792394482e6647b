//! Core identifiers: assets, venues, trade sides, holdings.
//!
//! Prices and notionals are integer cents; quantities are `f64` base-asset
//! units because crypto lots are fractional.

use std::fmt;

use rustc_hash::FxHashMap;

/// Asset ticker stored inline (max 8 bytes, no allocation).
///
/// Cheap to copy and hash; used as a map key throughout the planning
/// pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asset {
    bytes: [u8; 8],
    len: u8,
}

impl Asset {
    /// Create an asset symbol.
    ///
    /// # Panics
    /// Panics if `s` exceeds 8 bytes. Document loaders reject longer
    /// symbols before this is reached.
    pub fn new(s: &str) -> Self {
        assert!(s.len() <= 8, "asset symbol '{s}' exceeds 8 bytes");
        let mut bytes = [0u8; 8];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Self {
            bytes,
            len: s.len() as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({})", self.as_str())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for Asset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Asset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || s.len() > 8 {
            return Err(serde::de::Error::custom(format!(
                "asset symbol '{s}' must be 1..=8 bytes"
            )));
        }
        Ok(Asset::new(&s))
    }
}

/// One of the two trading environments the account spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Standard,
    Pro,
}

impl Venue {
    pub const BOTH: [Venue; 2] = [Venue::Standard, Venue::Pro];

    pub fn other(self) -> Venue {
        match self {
            Venue::Standard => Venue::Pro,
            Venue::Pro => Venue::Standard,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Standard => write!(f, "standard"),
            Venue::Pro => write!(f, "pro"),
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Quantity of one asset held on one venue. Quantities are non-negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holding {
    pub asset: Asset,
    pub venue: Venue,
    pub quantity: f64,
}

/// Spot prices in cents per whole unit, keyed by asset.
pub type PriceMap = FxHashMap<Asset, i64>;
