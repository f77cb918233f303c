use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
    /// Bucket new archives are written to.
    pub bucket: String,
    /// Extra enqueue attempts before a create/replace reports failure.
    pub enqueue_retries: u32,
    pub enqueue_backoff_ms: u64,
    /// Bearer token -> user id.
    pub tokens: BTreeMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_owned(),
            bucket: "default".to_owned(),
            enqueue_retries: 2,
            enqueue_backoff_ms: 100,
            tokens: BTreeMap::new(),
        }
    }
}

impl ApiConfig {
    pub fn enqueue_backoff(&self) -> Duration {
        Duration::from_millis(self.enqueue_backoff_ms)
    }
}
