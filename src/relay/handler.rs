use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::nostr::event::{Event, RelaySigner};
use crate::nostr::{
    KIND_PRICE_ERROR, KIND_PRICE_RESPONSE, TAG_EVENT, TAG_PAIR, TAG_PUBKEY, TAG_SOURCE, TAG_TYPE,
};
use crate::price_infra::aggregator::{aggregate, Method};
use crate::price_infra::cache::{FetchRole, PriceCache};
use crate::price_infra::fetchers::PriceFetcher;
use crate::price_infra::{PriceSample, PriceSource, ALL_SOURCES};
use crate::relay::rate_limit::AdmissionControl;
use crate::relay::store::EventStore;
use crate::utils::current_timestamp_ms;
use crate::SUPPORTED_PAIR;

/// Shared handles reachable from every connection task. Each handle takes
/// its own internal lock; the signer is read-only after startup.
pub struct AppState {
    pub settings: Settings,
    pub signer: RelaySigner,
    pub store: EventStore,
    pub admission: AdmissionControl,
    pub cache: PriceCache,
    pub fetcher: PriceFetcher,
    pub events_tx: broadcast::Sender<Event>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let signer = RelaySigner::from_config(
            settings.relay_privkey_hex.as_deref(),
            settings.relay_pubkey_hex.as_deref(),
        )?;
        let store = EventStore::new(settings.max_stored_events);
        let admission = AdmissionControl::new(&settings);
        let cache = PriceCache::new(settings.cache_ttl_ms);
        let fetcher = PriceFetcher::new(&settings);
        let (events_tx, _) = broadcast::channel(256);

        Ok(AppState {
            settings,
            signer,
            store,
            admission,
            cache,
            fetcher,
            events_tx,
        })
    }

    /// Every accepted event reaches the store and every connected client.
    pub fn publish(&self, event: Event) {
        self.store.insert(event.clone());
        // No subscribers just means no connections are open.
        let _ = self.events_tx.send(event);
    }

    fn sign_and_publish(&self, kind: u32, tags: Vec<Vec<String>>, content: Value) -> Event {
        let event = self.signer.sign(kind, tags, content.to_string());
        self.publish(event.clone());
        event
    }
}

/// Decoded 38000 content. Best-effort: malformed or missing fields fall back
/// to defaults rather than rejecting the request.
#[derive(Debug, PartialEq)]
pub struct PriceRequest {
    pub pair: String,
    pub method: Method,
    pub sources: Vec<PriceSource>,
    pub max_age_ms: u64,
}

impl PriceRequest {
    pub fn parse(content: &str, settings: &Settings) -> Self {
        let value: Value = serde_json::from_str(content).unwrap_or(Value::Null);

        let pair = value
            .get("pair")
            .and_then(Value::as_str)
            .unwrap_or(SUPPORTED_PAIR)
            .to_string();

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .and_then(Method::parse)
            .unwrap_or(Method::TrimmedMean);

        // Unrecognized names are dropped; an empty result means all sources.
        let mut sources: Vec<PriceSource> = Vec::new();
        if let Some(requested) = value.get("sources").and_then(Value::as_array) {
            for name in requested.iter().filter_map(Value::as_str) {
                if let Some(source) = PriceSource::parse(name) {
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                }
            }
        }
        if sources.is_empty() {
            sources = ALL_SOURCES.to_vec();
        }

        let max_age_ms = value
            .get("maxAgeMs")
            .and_then(Value::as_u64)
            .unwrap_or(20_000)
            .min(settings.max_request_maxage_ms);

        PriceRequest {
            pair,
            method,
            sources,
            max_age_ms,
        }
    }
}

struct CacheStatus {
    hit: bool,
    age_ms: u64,
}

/// Orchestrates one accepted 38000 through cache, fetchers, and aggregator.
/// Runs as its own task: a client disconnect never cancels it, and exactly
/// one terminal 38001 or 38002 is emitted.
pub async fn handle_price_request(state: Arc<AppState>, request: Event) {
    let params = PriceRequest::parse(&request.content, &state.settings);

    if params.pair != SUPPORTED_PAIR {
        let err = Error::UnsupportedPair(params.pair.clone());
        warn!(req = %request.id, "{err}");
        emit_error(
            &state,
            &request,
            &params.pair,
            json!({"error": "unsupported pair", "pair": params.pair}),
        );
        return;
    }

    let now = current_timestamp_ms();
    if let Some((samples, age_ms)) = state.cache.get(now) {
        if age_ms <= params.max_age_ms {
            respond(
                &state,
                &request,
                &params,
                &samples,
                CacheStatus { hit: true, age_ms },
            );
            return;
        }
    }

    let samples = match state.cache.join_fetch() {
        FetchRole::Leader(guard) => {
            let samples = state.fetcher.fetch_all(&params.sources).await;
            let quorum_met = !samples.is_empty() && samples.len() >= state.settings.min_quorum;
            guard.finish(samples.clone(), current_timestamp_ms(), quorum_met);
            samples
        }
        FetchRole::Waiter(mut rx) => rx.recv().await.unwrap_or_default(),
    };

    if samples.is_empty() || samples.len() < state.settings.min_quorum {
        let err = Error::InsufficientQuorum {
            need: state.settings.min_quorum,
            got: samples.len(),
        };
        warn!(req = %request.id, "{err}");
        let requested: Vec<&str> = params.sources.iter().map(|s| s.as_str()).collect();
        emit_error(
            &state,
            &request,
            &params.pair,
            json!({
                "error": "insufficient quorum",
                "need": state.settings.min_quorum,
                "got": samples.len(),
                "sources_requested": requested,
            }),
        );
        return;
    }

    respond(
        &state,
        &request,
        &params,
        &samples,
        CacheStatus {
            hit: false,
            age_ms: 0,
        },
    );
}

fn respond(
    state: &AppState,
    request: &Event,
    params: &PriceRequest,
    samples: &[PriceSample],
    cache: CacheStatus,
) {
    let agg = aggregate(samples, params.method);
    let sources_used: Vec<&str> = agg.used.iter().map(|s| s.source.as_str()).collect();

    let mut tags = reply_tags(request, &params.pair, "price");
    for sample in &agg.used {
        tags.push(vec![
            TAG_SOURCE.to_string(),
            sample.source.as_str().to_string(),
        ]);
    }

    let content = json!({
        "pair": params.pair,
        "ts": current_timestamp_ms(),
        "value": agg.value,
        "method": agg.method.as_str(),
        "sources_used": sources_used,
        "samples": agg.used,
        "cache": {"hit": cache.hit, "ageMs": cache.age_ms},
    });

    let event = state.sign_and_publish(KIND_PRICE_RESPONSE, tags, content);
    info!(
        req = %request.id,
        resp = %event.id,
        value = agg.value,
        method = agg.method.as_str(),
        cache_hit = cache.hit,
        "price response"
    );
}

fn emit_error(state: &AppState, request: &Event, pair: &str, payload: Value) {
    state.sign_and_publish(KIND_PRICE_ERROR, reply_tags(request, pair, "price-error"), payload);
}

fn reply_tags(request: &Event, pair: &str, marker: &str) -> Vec<Vec<String>> {
    vec![
        vec![
            TAG_EVENT.to_string(),
            request.id.clone(),
            "reply".to_string(),
        ],
        vec![TAG_PUBKEY.to_string(), request.pubkey.clone()],
        vec![TAG_TYPE.to_string(), marker.to_string()],
        vec![TAG_PAIR.to_string(), pair.to_string()],
    ]
}
