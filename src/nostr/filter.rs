use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::event::Event;

pub const DEFAULT_QUERY_LIMIT: usize = 200;
pub const MAX_QUERY_LIMIT: usize = 2000;

/// Subscription filter per NIP-01. Absent fields are wildcards; `since` and
/// `until` are inclusive bounds on `created_at`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    pub authors: Option<Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
    /// Tag constraints arrive as `"#x"` keys. Unknown non-tag keys land here
    /// too and are ignored at match time.
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

impl Filter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|author| *author == event.pubkey) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        // Union semantics per tag name: at least one of the event's values
        // for that tag must be in the requested set.
        for (name, wanted) in self.tag_constraints() {
            if !event
                .tag_values(name)
                .any(|value| wanted.iter().any(|w| *w == value))
            {
                return false;
            }
        }
        true
    }

    /// `"#x"` keys whose value is an array; non-string entries are skipped.
    fn tag_constraints(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.extra.iter().filter_map(|(key, value)| {
            let name = key.strip_prefix('#')?;
            let wanted = value.as_array()?.iter().filter_map(Value::as_str).collect();
            Some((name, wanted))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: u32, created_at: u64, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "e1".to_string(),
            pubkey: "p1".to_string(),
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    fn filter(raw: Value) -> Filter {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn empty_filter_is_a_wildcard() {
        assert!(filter(json!({})).matches(&event(1, 10, vec![])));
    }

    #[test]
    fn membership_fields_filter() {
        let e = event(38001, 10, vec![]);
        assert!(filter(json!({"kinds": [38001]})).matches(&e));
        assert!(!filter(json!({"kinds": [38000]})).matches(&e));
        assert!(filter(json!({"ids": ["e1", "e2"]})).matches(&e));
        assert!(!filter(json!({"ids": ["e2"]})).matches(&e));
        assert!(filter(json!({"authors": ["p1"]})).matches(&e));
        assert!(!filter(json!({"authors": ["p2"]})).matches(&e));
    }

    #[test]
    fn since_until_are_inclusive() {
        let e = event(1, 100, vec![]);
        assert!(filter(json!({"since": 100})).matches(&e));
        assert!(!filter(json!({"since": 101})).matches(&e));
        assert!(filter(json!({"until": 100})).matches(&e));
        assert!(!filter(json!({"until": 99})).matches(&e));
    }

    #[test]
    fn tag_constraint_is_a_union_over_values() {
        let e = event(
            38001,
            10,
            vec![
                vec!["e".to_string(), "req1".to_string(), "reply".to_string()],
                vec!["e".to_string(), "req2".to_string()],
            ],
        );
        assert!(filter(json!({"#e": ["req2", "other"]})).matches(&e));
        assert!(!filter(json!({"#e": ["other"]})).matches(&e));
        // An event without the tag never matches a tag constraint.
        assert!(!filter(json!({"#p": ["p1"]})).matches(&event(1, 10, vec![])));
    }

    #[test]
    fn non_tag_extra_keys_are_ignored() {
        let f = filter(json!({"search": "btc", "kinds": [1]}));
        assert!(f.matches(&event(1, 10, vec![])));
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(filter(json!({})).effective_limit(), 200);
        assert_eq!(filter(json!({"limit": 5})).effective_limit(), 5);
        assert_eq!(filter(json!({"limit": 50_000})).effective_limit(), 2000);
    }
}
