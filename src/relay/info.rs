use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde_json::{json, Value};

use crate::nostr::filter::MAX_QUERY_LIMIT;
use crate::relay::handler::AppState;

/// Advertised limits; the message-length one is enforced on the socket.
pub const MAX_SUBSCRIPTIONS: usize = 64;
pub const MAX_FILTERS: usize = 16;

fn info_document(state: &AppState) -> Value {
    json!({
        "name": "pricerelay",
        "description": "BTC/USD price oracle over the Nostr relay protocol",
        "pubkey": state.signer.public_key_hex(),
        "contact": "",
        "supported_nips": [1, 11],
        "software": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "limitations": {
            "max_message_length": state.settings.max_event_bytes,
            "max_subscriptions": MAX_SUBSCRIPTIONS,
            "max_filters": MAX_FILTERS,
            "max_limit": MAX_QUERY_LIMIT,
        },
    })
}

/// NIP-11 relay information document.
pub async fn relay_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/nostr+json")],
        info_document(&state).to_string(),
    )
}

pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn info_document_carries_identity_and_limits() {
        let state = AppState::new(Settings::default()).unwrap();
        let doc = info_document(&state);

        assert_eq!(doc["pubkey"], state.signer.public_key_hex());
        assert_eq!(doc["limitations"]["max_message_length"], 64_000);
        assert_eq!(doc["limitations"]["max_limit"], 2000);
        assert_eq!(doc["supported_nips"], json!([1, 11]));
    }

    #[tokio::test]
    async fn info_response_is_nostr_json() {
        let state = Arc::new(AppState::new(Settings::default()).unwrap());
        let response = relay_info(State(state)).await.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/nostr+json"
        );
    }
}
