pub mod event;
pub mod filter;

/// Event kinds the relay acts on. Any other kind is stored and relayed
/// without triggering price work.
pub const KIND_PRICE_REQUEST: u32 = 38000;
pub const KIND_PRICE_RESPONSE: u32 = 38001;
pub const KIND_PRICE_ERROR: u32 = 38002;

// Reserved tag names.
pub const TAG_EVENT: &str = "e";
pub const TAG_PUBKEY: &str = "p";
pub const TAG_TYPE: &str = "t";
pub const TAG_PAIR: &str = "pair";
pub const TAG_SOURCE: &str = "src";
