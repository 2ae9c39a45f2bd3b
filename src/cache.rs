use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Clone)]
struct CacheEntry {
    body: Value,
    created_at: Instant,
}

/// TTL cache for aggregation responses. Cleared wholesale, never selectively.
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `endpoint` plus the query parameters in sorted order.
    pub fn key(endpoint: &str, params: &[(&str, Option<String>)]) -> String {
        let mut parts: Vec<String> = params
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{name}={v}")))
            .collect();
        parts.sort();
        format!("{endpoint}?{}", parts.join("&"))
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        entries.retain(|_, v| v.created_at.elapsed() <= ttl);
        entries.get(key).map(|entry| entry.body.clone())
    }

    pub async fn insert(&self, key: String, body: Value) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CacheEntry {
                body,
                created_at: Instant::now(),
            },
        );
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}
