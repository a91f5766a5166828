use std::sync::Mutex;

use tokio::sync::broadcast;

use super::PriceSample;

/// The one cached sample set. Sources within an entry are unique because a
/// fan-out yields at most one sample per source.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub ts_ms: u64,
    pub samples: Vec<PriceSample>,
}

/// Outcome of joining the single-flight fetch: the first caller leads the
/// fan-out, everyone else waits on its sample set.
pub enum FetchRole<'a> {
    Leader(FetchGuard<'a>),
    Waiter(broadcast::Receiver<Vec<PriceSample>>),
}

/// Held by the leader while the fan-out runs. Dropping without `finish`
/// wakes every waiter with an empty sample set so nobody hangs.
pub struct FetchGuard<'a> {
    cache: &'a PriceCache,
    done: bool,
}

impl FetchGuard<'_> {
    pub fn finish(mut self, samples: Vec<PriceSample>, now_ms: u64, store: bool) {
        self.done = true;
        self.cache.complete(samples, now_ms, store);
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.complete(Vec::new(), 0, false);
        }
    }
}

/// TTL-bounded price cache with single-flight coalescing. One coarse lock
/// guards both the entry and the in-flight coordination state.
pub struct PriceCache {
    ttl_ms: u64,
    state: Mutex<CacheState>,
}

struct CacheState {
    entry: Option<CacheEntry>,
    inflight: Option<broadcast::Sender<Vec<PriceSample>>>,
}

impl PriceCache {
    pub fn new(ttl_ms: u64) -> Self {
        PriceCache {
            ttl_ms,
            state: Mutex::new(CacheState {
                entry: None,
                inflight: None,
            }),
        }
    }

    /// The entry with its age, or a miss once past the TTL.
    pub fn get(&self, now_ms: u64) -> Option<(Vec<PriceSample>, u64)> {
        let state = self.state.lock().unwrap();
        let entry = state.entry.as_ref()?;
        let age_ms = now_ms.saturating_sub(entry.ts_ms);
        if age_ms <= self.ttl_ms {
            Some((entry.samples.clone(), age_ms))
        } else {
            None
        }
    }

    /// Join the in-flight fetch, or become the leader when none is running.
    pub fn join_fetch(&self) -> FetchRole<'_> {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = &state.inflight {
            return FetchRole::Waiter(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        state.inflight = Some(tx);
        FetchRole::Leader(FetchGuard {
            cache: self,
            done: false,
        })
    }

    fn complete(&self, samples: Vec<PriceSample>, now_ms: u64, store: bool) {
        let inflight = {
            let mut state = self.state.lock().unwrap();
            if store {
                state.entry = Some(CacheEntry {
                    ts_ms: now_ms,
                    samples: samples.clone(),
                });
            }
            state.inflight.take()
        };
        if let Some(tx) = inflight {
            // No receivers is fine; nobody joined this flight.
            let _ = tx.send(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_infra::PriceSource;
    use std::sync::Arc;

    fn samples() -> Vec<PriceSample> {
        vec![
            PriceSample {
                source: PriceSource::Coinbase,
                value: 60000.0,
                ts_ms: 1_000,
            },
            PriceSample {
                source: PriceSource::Kraken,
                value: 60010.0,
                ts_ms: 1_000,
            },
        ]
    }

    fn lead(cache: &PriceCache) -> FetchGuard<'_> {
        match cache.join_fetch() {
            FetchRole::Leader(guard) => guard,
            FetchRole::Waiter(_) => panic!("expected to lead"),
        }
    }

    #[test]
    fn entry_expires_at_ttl() {
        let cache = PriceCache::new(2000);
        assert!(cache.get(1_000).is_none());

        lead(&cache).finish(samples(), 1_000, true);
        let (got, age) = cache.get(1_500).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(age, 500);

        // Inclusive at the TTL boundary, a miss one past it.
        assert!(cache.get(3_000).is_some());
        assert!(cache.get(3_001).is_none());
    }

    #[test]
    fn unstored_result_leaves_cache_cold() {
        let cache = PriceCache::new(2000);
        lead(&cache).finish(samples(), 1_000, false);
        assert!(cache.get(1_001).is_none());
    }

    #[test]
    fn set_overwrites_previous_entry() {
        let cache = PriceCache::new(2000);
        lead(&cache).finish(samples(), 1_000, true);
        lead(&cache).finish(vec![samples().remove(0)], 5_000, true);
        let (got, age) = cache.get(5_100).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(age, 100);
    }

    #[tokio::test]
    async fn cold_burst_elects_a_single_leader() {
        let cache = Arc::new(PriceCache::new(2000));

        let mut leader = None;
        let mut waiters = Vec::new();
        for _ in 0..8 {
            match cache.join_fetch() {
                FetchRole::Leader(guard) => {
                    assert!(leader.is_none(), "second leader elected");
                    leader = Some(guard);
                }
                FetchRole::Waiter(rx) => waiters.push(rx),
            }
        }
        assert_eq!(waiters.len(), 7);

        leader.unwrap().finish(samples(), 1_000, true);
        for mut rx in waiters {
            assert_eq!(rx.recv().await.unwrap().len(), 2);
        }

        // The flight is over; the next cold caller leads again.
        assert!(matches!(cache.join_fetch(), FetchRole::Leader(_)));
    }

    #[tokio::test]
    async fn dropped_leader_wakes_waiters_empty() {
        let cache = PriceCache::new(2000);
        let guard = lead(&cache);
        let mut rx = match cache.join_fetch() {
            FetchRole::Waiter(rx) => rx,
            FetchRole::Leader(_) => panic!("flight already open"),
        };
        drop(guard);
        assert!(rx.recv().await.unwrap().is_empty());
        assert!(cache.get(1_000).is_none());
    }
}
