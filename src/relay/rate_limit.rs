use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::Settings;
use crate::error::{Error, RateDimension, Result};

/// Token bucket: refill `rps` tokens per second up to `burst`, spend one per
/// admitted request. In-memory only, per key, updates serialized on the map
/// lock.
pub struct TokenBucketLimiter<K> {
    buckets: Mutex<HashMap<K, Bucket>>,
    rps: f64,
    burst: f64,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl<K: Eq + Hash> TokenBucketLimiter<K> {
    pub fn new(rps: f64, burst: f64) -> Self {
        TokenBucketLimiter {
            buckets: Mutex::new(HashMap::new()),
            rps,
            burst,
        }
    }

    pub fn allow(&self, key: K) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// A denial persists the refreshed bucket state; it never counts against
    /// future bursts beyond the bucket math.
    pub fn allow_at(&self, key: K, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: self.burst,
            last: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }
}

/// Two-dimensional admission: the IP bucket is checked first and
/// short-circuits, so clients learn which dimension rejected them.
pub struct AdmissionControl {
    ip: TokenBucketLimiter<IpAddr>,
    pubkey: TokenBucketLimiter<String>,
}

impl AdmissionControl {
    pub fn new(settings: &Settings) -> Self {
        AdmissionControl {
            ip: TokenBucketLimiter::new(settings.rate_ip_rps, settings.rate_burst),
            pubkey: TokenBucketLimiter::new(settings.rate_pubkey_rps, settings.rate_burst),
        }
    }

    pub fn admit(&self, ip: IpAddr, pubkey: &str) -> Result<()> {
        if !self.ip.allow(ip) {
            return Err(Error::RateLimited(RateDimension::Ip));
        }
        if !self.pubkey.allow(pubkey.to_string()) {
            return Err(Error::RateLimited(RateDimension::Pubkey));
        }
        Ok(())
    }
}
