use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricerelay::config::Settings;
use pricerelay::error::{Error, Result};
use pricerelay::relay::handler::AppState;
use pricerelay::relay::info::{health, relay_info};
use pricerelay::relay::websocket::websocket_handler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    let listen_addr: SocketAddr = settings
        .listen_addr
        .parse()
        .map_err(|e| Error::Config(format!("bad LISTEN_ADDR: {e}")))?;

    let state = Arc::new(AppState::new(settings)?);
    info!(pubkey = state.signer.public_key_hex(), "relay identity ready");

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/relay-info", get(relay_info))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
