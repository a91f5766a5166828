use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::utils::current_timestamp_ms;

use super::{PriceSample, PriceSource};

impl PriceSource {
    /// Public ticker endpoint for the BTC/USD spot price.
    pub fn endpoint(&self) -> &'static str {
        match self {
            PriceSource::Coinbase => "https://api.exchange.coinbase.com/products/BTC-USD/ticker",
            PriceSource::Kraken => "https://api.kraken.com/0/public/Ticker?pair=XBTUSD",
            PriceSource::Coingecko => {
                "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd"
            }
            PriceSource::Bitstamp => "https://www.bitstamp.net/api/v2/ticker/btcusd",
        }
    }

    /// Pull the price out of a source-shaped ticker payload.
    pub fn extract_price(&self, payload: &Value) -> Option<f64> {
        match self {
            PriceSource::Coinbase => {
                let data: CoinbaseTicker = serde_json::from_value(payload.clone()).ok()?;
                data.price.parse().ok()
            }
            PriceSource::Kraken => {
                let data: KrakenTicker = serde_json::from_value(payload.clone()).ok()?;
                data.result.get("XXBTZUSD")?.c.first()?.parse().ok()
            }
            PriceSource::Coingecko => {
                let data: CoingeckoTicker = serde_json::from_value(payload.clone()).ok()?;
                Some(data.bitcoin.usd)
            }
            PriceSource::Bitstamp => {
                let data: BitstampTicker = serde_json::from_value(payload.clone()).ok()?;
                data.last.parse().ok()
            }
        }
    }
}

#[derive(Deserialize)]
struct CoinbaseTicker {
    price: String,
}

#[derive(Deserialize)]
struct KrakenTicker {
    result: HashMap<String, KrakenPair>,
}

#[derive(Deserialize)]
struct KrakenPair {
    c: Vec<String>,
}

#[derive(Deserialize)]
struct CoingeckoTicker {
    bitcoin: CoingeckoQuote,
}

#[derive(Deserialize)]
struct CoingeckoQuote {
    usd: f64,
}

#[derive(Deserialize)]
struct BitstampTicker {
    last: String,
}

fn sanitize(source: PriceSource, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidPrice(source))
    }
}

/// HTTP ticker client: one deadline per attempt, bounded retries, and
/// parallel fan-out across sources.
pub struct PriceFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
}

impl PriceFetcher {
    pub fn new(settings: &Settings) -> Self {
        PriceFetcher {
            client: reqwest::Client::new(),
            timeout: Duration::from_millis(settings.fetch_timeout_ms),
            retries: settings.fetch_retries,
        }
    }

    /// Fetch one source; a retry consumes a fresh deadline.
    pub async fn fetch_one(&self, source: PriceSource) -> Result<PriceSample> {
        let mut last_err = Error::Fetch {
            src: source,
            reason: "no attempts made".to_string(),
        };
        for attempt in 0..=self.retries {
            match self.attempt(source).await {
                Ok(sample) => return Ok(sample),
                Err(e) => {
                    debug!("attempt {attempt} against {source} failed: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn attempt(&self, source: PriceSource) -> Result<PriceSample> {
        let payload: Value = self
            .client
            .get(source.endpoint())
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                src: source,
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| Error::Fetch {
                src: source,
                reason: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| Error::Fetch {
                src: source,
                reason: e.to_string(),
            })?;

        let value = source.extract_price(&payload).ok_or(Error::Fetch {
            src: source,
            reason: "unrecognized ticker payload".to_string(),
        })?;

        Ok(PriceSample {
            source,
            value: sanitize(source, value)?,
            ts_ms: current_timestamp_ms(),
        })
    }

    /// Fan out all requested sources in parallel and keep the successes.
    /// Individual failures are absorbed here; quorum is the caller's concern.
    pub async fn fetch_all(&self, sources: &[PriceSource]) -> Vec<PriceSample> {
        let results = join_all(sources.iter().map(|source| self.fetch_one(*source))).await;
        let mut samples = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!("upstream sample dropped: {e}"),
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coinbase_payload_extraction() {
        let payload = json!({"trade_id": 1, "price": "60123.45", "size": "0.01"});
        assert_eq!(
            PriceSource::Coinbase.extract_price(&payload),
            Some(60123.45)
        );
    }

    #[test]
    fn kraken_payload_extraction() {
        let payload = json!({
            "error": [],
            "result": {"XXBTZUSD": {"a": ["60200.0", "1", "1.0"], "c": ["60150.1", "0.02"]}}
        });
        assert_eq!(PriceSource::Kraken.extract_price(&payload), Some(60150.1));
    }

    #[test]
    fn coingecko_payload_extraction() {
        let payload = json!({"bitcoin": {"usd": 60042.0}});
        assert_eq!(PriceSource::Coingecko.extract_price(&payload), Some(60042.0));
    }

    #[test]
    fn bitstamp_payload_extraction() {
        let payload = json!({"last": "59980.55", "high": "61000"});
        assert_eq!(PriceSource::Bitstamp.extract_price(&payload), Some(59980.55));
    }

    #[test]
    fn unrecognized_payload_yields_none() {
        let payload = json!({"unexpected": true});
        for source in super::super::ALL_SOURCES {
            assert_eq!(source.extract_price(&payload), None);
        }
    }

    #[test]
    fn non_positive_and_non_finite_prices_are_rejected() {
        assert!(sanitize(PriceSource::Coinbase, 60000.0).is_ok());
        assert!(sanitize(PriceSource::Coinbase, 0.0).is_err());
        assert!(sanitize(PriceSource::Coinbase, -1.0).is_err());
        assert!(sanitize(PriceSource::Coinbase, f64::NAN).is_err());
        assert!(sanitize(PriceSource::Coinbase, f64::INFINITY).is_err());
    }
}
