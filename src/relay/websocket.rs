use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::nostr::event::Event;
use crate::nostr::filter::Filter;
use crate::nostr::KIND_PRICE_REQUEST;
use crate::relay::handler::{handle_price_request, AppState};

/// Per-connection state, touched only by the connection's own read task.
struct Connection {
    ip: IpAddr,
    subscriptions: HashMap<String, Vec<Filter>>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, ip = %addr.ip(), "client connected");

    let (mut sink, mut stream) = socket.split();

    // All outbound frames funnel through one queue so the read loop and the
    // live fan-out never contend for the socket.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Live delivery: every accepted event goes to every client as
    // ["EVENT", event]; clients filter on their side.
    let mut events_rx = state.events_tx.subscribe();
    let fanout_tx = out_tx.clone();
    let fanout_task = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    if fanout_tx.send(json!(["EVENT", event]).to_string()).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "slow consumer dropped broadcast events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let _ = out_tx.send(notice_frame("connected"));

    let mut conn = Connection {
        ip: addr.ip(),
        subscriptions: HashMap::new(),
    };

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let outcome = process_frame(&state, &mut conn, &text);
                for frame in outcome.replies {
                    if out_tx.send(frame).is_err() {
                        break;
                    }
                }
                // Spawned only after the OK frame is queued, so the terminal
                // response always trails the acknowledgement.
                if let Some(request) = outcome.price_request {
                    tokio::spawn(handle_price_request(Arc::clone(&state), request));
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Subscriptions die with the connection; in-flight price work does not.
    write_task.abort();
    fanout_task.abort();
    info!(%conn_id, "client disconnected");
}

/// Result of dispatching one inbound frame: direct replies plus, for an
/// accepted 38000, the request to hand to the orchestrator.
#[derive(Default)]
struct FrameOutcome {
    replies: Vec<String>,
    price_request: Option<Event>,
}

impl FrameOutcome {
    fn reply(frame: String) -> Self {
        FrameOutcome {
            replies: vec![frame],
            price_request: None,
        }
    }

    fn silent() -> Self {
        FrameOutcome::default()
    }
}

/// Dispatch one inbound frame. Bad input is reported or ignored; it never
/// tears down the connection.
fn process_frame(state: &Arc<AppState>, conn: &mut Connection, text: &str) -> FrameOutcome {
    if text.len() > state.settings.max_event_bytes {
        return FrameOutcome::reply(notice_frame("payload too large"));
    }

    let frame: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return FrameOutcome::silent(),
    };
    let Some(parts) = frame.as_array() else {
        return FrameOutcome::silent();
    };

    match parts.first().and_then(Value::as_str) {
        Some("EVENT") => handle_event_frame(state, conn, parts.get(1)),
        Some("REQ") => handle_req_frame(state, conn, parts),
        Some("CLOSE") => {
            if let Some(sub_id) = parts.get(1).and_then(Value::as_str) {
                conn.subscriptions.remove(sub_id);
            }
            FrameOutcome::silent()
        }
        _ => FrameOutcome::silent(),
    }
}

fn handle_event_frame(
    state: &Arc<AppState>,
    conn: &mut Connection,
    raw: Option<&Value>,
) -> FrameOutcome {
    let Some(raw) = raw else {
        return FrameOutcome::reply(ok_frame("", false, "invalid: bad sig or id"));
    };

    let event = match Event::from_value(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!("rejected envelope: {e}");
            let id = raw.get("id").and_then(Value::as_str).unwrap_or("");
            return FrameOutcome::reply(ok_frame(id, false, "invalid: bad sig or id"));
        }
    };

    if let Err(e) = event.verify() {
        debug!(id = %event.id, "rejected event: {e}");
        return FrameOutcome::reply(ok_frame(&event.id, false, "invalid: bad sig or id"));
    }

    if let Err(e) = state.admission.admit(conn.ip, &event.pubkey) {
        debug!(id = %event.id, "rejected event: {e}");
        return FrameOutcome::reply(ok_frame(&event.id, false, &e.to_string()));
    }

    state.publish(event.clone());
    FrameOutcome {
        replies: vec![ok_frame(&event.id, true, "accepted")],
        price_request: (event.kind == KIND_PRICE_REQUEST).then_some(event),
    }
}

fn handle_req_frame(state: &Arc<AppState>, conn: &mut Connection, parts: &[Value]) -> FrameOutcome {
    let Some(sub_id) = parts.get(1).and_then(Value::as_str) else {
        return FrameOutcome::silent();
    };

    let mut filters = Vec::new();
    for raw in &parts[2..] {
        match serde_json::from_value::<Filter>(raw.clone()) {
            Ok(filter) => filters.push(filter),
            Err(e) => {
                debug!(sub_id, "dropping REQ with malformed filter: {e}");
                return FrameOutcome::silent();
            }
        }
    }

    // Replaces any prior subscription with the same id.
    conn.subscriptions.insert(sub_id.to_string(), filters.clone());

    let mut replies: Vec<String> = state
        .store
        .query(&filters)
        .iter()
        .map(|event| json!(["EVENT", sub_id, event]).to_string())
        .collect();
    replies.push(json!(["EOSE", sub_id]).to_string());
    FrameOutcome {
        replies,
        price_request: None,
    }
}

fn notice_frame(text: &str) -> String {
    json!(["NOTICE", text]).to_string()
}

fn ok_frame(event_id: &str, accepted: bool, message: &str) -> String {
    json!(["OK", event_id, accepted, message]).to_string()
}
