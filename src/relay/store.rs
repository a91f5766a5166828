use std::collections::VecDeque;
use std::sync::Mutex;

use crate::nostr::event::Event;
use crate::nostr::filter::Filter;

/// Bounded in-memory event log. Append-only, FIFO eviction by arrival order;
/// writers and backfill readers serialize on one coarse lock.
pub struct EventStore {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventStore {
    pub fn new(capacity: usize) -> Self {
        EventStore {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn insert(&self, event: Event) {
        let mut events = self.events.lock().unwrap();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backfill query: per filter, walk newest to oldest until its limit is
    /// reached; results are concatenated across filters, so an event
    /// matching several filters appears once per match.
    pub fn query(&self, filters: &[Filter]) -> Vec<Event> {
        let events = self.events.lock().unwrap();
        let mut out = Vec::new();
        for filter in filters {
            let limit = filter.effective_limit();
            let mut matched = 0;
            for event in events.iter().rev() {
                if matched == limit {
                    break;
                }
                if filter.matches(event) {
                    out.push(event.clone());
                    matched += 1;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, kind: u32, created_at: u64) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "p1".to_string(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn filter(raw: serde_json::Value) -> Filter {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn overflow_evicts_from_the_head() {
        let store = EventStore::new(3);
        for i in 0..5 {
            store.insert(event(&format!("e{i}"), 1, i));
        }
        assert_eq!(store.len(), 3);
        let remaining = store.query(&[filter(json!({}))]);
        let ids: Vec<&str> = remaining.iter().map(|e| e.id.as_str()).collect();
        // Newest to oldest; e0 and e1 were evicted.
        assert_eq!(ids, vec!["e4", "e3", "e2"]);
    }

    #[test]
    fn query_by_id_right_after_insert_returns_it() {
        let store = EventStore::new(10);
        let e = event("target", 38001, 100);
        store.insert(e.clone());
        let got = store.query(&[filter(json!({"ids": ["target"]}))]);
        assert_eq!(got, vec![e]);
    }

    #[test]
    fn per_filter_limit_applies_newest_first() {
        let store = EventStore::new(100);
        for i in 0..10 {
            store.insert(event(&format!("e{i}"), 1, i));
        }
        let got = store.query(&[filter(json!({"limit": 3}))]);
        let ids: Vec<&str> = got.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e9", "e8", "e7"]);
    }

    #[test]
    fn multiple_filters_concatenate_with_duplicates() {
        let store = EventStore::new(10);
        store.insert(event("a", 38001, 1));
        let got = store.query(&[
            filter(json!({"kinds": [38001]})),
            filter(json!({"ids": ["a"]})),
        ]);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn non_matching_filter_returns_nothing() {
        let store = EventStore::new(10);
        store.insert(event("a", 1, 1));
        assert!(store.query(&[filter(json!({"kinds": [38000]}))]).is_empty());
        assert!(!store.is_empty());
    }
}
