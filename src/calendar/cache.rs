use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

/// Short-lived response cache, owned by the calendar client instance it is
/// injected into. Never process-global: concurrent tests and multi-tenant
/// dispatchers must not share hidden state.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Value)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if self.ttl.is_zero() {
            return None;
        }
        let entries = self.entries.read().await;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub async fn put(&self, key: &str, value: Value) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().await;
        // Opportunistic sweep so the map doesn't grow unbounded.
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
        entries.insert(key.to_string(), (Instant::now(), value));
    }
}
