pub mod aggregator;
pub mod cache;
pub mod fetchers;

use std::fmt;

use serde::{Deserialize, Serialize};

/// The recognized upstream ticker sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Coinbase,
    Kraken,
    Coingecko,
    Bitstamp,
}

pub const ALL_SOURCES: [PriceSource; 4] = [
    PriceSource::Coinbase,
    PriceSource::Kraken,
    PriceSource::Coingecko,
    PriceSource::Bitstamp,
];

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Coinbase => "coinbase",
            PriceSource::Kraken => "kraken",
            PriceSource::Coingecko => "coingecko",
            PriceSource::Bitstamp => "bitstamp",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "coinbase" => Some(PriceSource::Coinbase),
            "kraken" => Some(PriceSource::Kraken),
            "coingecko" => Some(PriceSource::Coingecko),
            "bitstamp" => Some(PriceSource::Bitstamp),
            _ => None,
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One successful upstream observation. `ts_ms` is wall time at fetch
/// completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub source: PriceSource,
    pub value: f64,
    pub ts_ms: u64,
}
