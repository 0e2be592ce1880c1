use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

/// Cache keys bumped at sync run start and end.
pub const SYNC_CACHE_KEYS: [&str; 7] = [
    "overview",
    "senders",
    "categories",
    "alerts",
    "eda",
    "expenses_overview",
    "expenses_tx",
];

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const SHORT_TTL: Duration = Duration::from_secs(10);

/// In-process memoization for the analytics aggregates.
#[derive(Clone, Default)]
pub struct ApiCache {
    inner: Arc<Mutex<HashMap<String, (Instant, Value)>>>,
}

impl ApiCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        let (stored_at, value) = inner.get(key)?;
        (stored_at.elapsed() < ttl).then(|| value.clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .insert(key.to_string(), (Instant::now(), value));
    }

    pub fn invalidate(&self, keys: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        for key in keys {
            inner.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set_invalidate() {
        let cache = ApiCache::new();
        assert!(cache.get("overview", DEFAULT_TTL).is_none());

        cache.set("overview", json!({"total": 3}));
        assert_eq!(cache.get("overview", DEFAULT_TTL).unwrap()["total"], 3);

        cache.invalidate(&["overview"]);
        assert!(cache.get("overview", DEFAULT_TTL).is_none());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = ApiCache::new();
        cache.set("eda", json!(1));
        assert!(cache.get("eda", Duration::from_secs(0)).is_none());
    }
}
