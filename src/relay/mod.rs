pub mod handler;
pub mod info;
pub mod rate_limit;
pub mod store;
pub mod websocket;
