use thiserror::Error;

use crate::price_infra::PriceSource;

#[derive(Error, Debug)]
pub enum Error {
    // Event codec errors
    #[error("malformed event envelope: {0}")]
    BadEnvelope(String),

    #[error("event id does not match canonical hash")]
    BadId,

    #[error("schnorr signature verification failed")]
    BadSig,

    #[error("invalid relay key material: {0}")]
    BadKey(String),

    // Admission errors
    #[error("rate limited ({0})")]
    RateLimited(RateDimension),

    // Price pipeline errors
    #[error("unsupported pair: {0}")]
    UnsupportedPair(String),

    #[error("insufficient quorum: need {need}, got {got}")]
    InsufficientQuorum { need: usize, got: usize },

    #[error("fetch failed for {src}: {reason}")]
    Fetch { src: PriceSource, reason: String },

    #[error("non-positive or non-finite price from {0}")]
    InvalidPrice(PriceSource),

    // System errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which token bucket rejected an event; clients see the dimension in the
/// OK frame message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDimension {
    Ip,
    Pubkey,
}

impl std::fmt::Display for RateDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateDimension::Ip => write!(f, "ip"),
            RateDimension::Pubkey => write!(f, "pubkey"),
        }
    }
}
