pub mod config;
pub mod error;
pub mod nostr;
pub mod price_infra;
pub mod relay;
pub mod utils;

/// The only pair this relay quotes.
pub const SUPPORTED_PAIR: &str = "BTC-USD";
