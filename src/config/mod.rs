use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Runtime settings, loaded from an optional `config/default` file with the
/// environment layered on top. Variable names are unprefixed: `MIN_QUORUM`,
/// `FETCH_TIMEOUT_MS`, `RELAY_PRIVKEY_HEX`, ...
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: String,
    pub min_quorum: usize,
    pub fetch_timeout_ms: u64,
    pub fetch_retries: u32,
    pub cache_ttl_ms: u64,
    pub max_request_maxage_ms: u64,
    pub max_event_bytes: usize,
    pub max_stored_events: usize,
    pub rate_ip_rps: f64,
    pub rate_pubkey_rps: f64,
    pub rate_burst: f64,
    pub relay_privkey_hex: Option<String>,
    pub relay_pubkey_hex: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "0.0.0.0:8080".to_string(),
            min_quorum: 3,
            fetch_timeout_ms: 2500,
            fetch_retries: 1,
            cache_ttl_ms: 2000,
            max_request_maxage_ms: 60_000,
            max_event_bytes: 64_000,
            max_stored_events: 10_000,
            rate_ip_rps: 3.0,
            rate_pubkey_rps: 2.0,
            rate_burst: 10.0,
            relay_privkey_hex: None,
            relay_pubkey_hex: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::default())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
