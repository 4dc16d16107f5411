//! Stream substrate: append-only named logs, consumer groups, at-least-once
//! delivery, explicit ack, claim-on-timeout, and a TTL dedup set.
//!
//! Built on the `redis` crate against Redis Streams, the same crate used
//! elsewhere in this corpus for Redis-backed stores (e.g. `dashflow-redis`):
//! `XADD`/`XREADGROUP`/`XACK`/`XCLAIM` plus `SET key val NX PX ttl` for the dedup
//! fingerprint set.

pub mod memory;
pub mod redis_stream;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub const RAW_EVENTS: &str = "raw_events";
pub const NORMALIZED_EVENTS: &str = "normalized_events";
pub const RISK_ENTITIES: &str = "risk_entities";
pub const RISK_SCORES: &str = "risk_scores";
pub const NEW_ALERTS: &str = "new_alerts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupResult {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }
}

/// Named, ordered, append-only logs with consumer groups.
#[async_trait]
pub trait StreamSubstrate: Send + Sync {
    async fn publish(&self, stream: &str, fields: HashMap<String, String>) -> Result<String>;

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>>;

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<()>;

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>>;

    async fn dedup(&self, key: &str, ttl: Duration) -> Result<DedupResult>;
}

/// Builds the canonical field map for a `normalized_events` publish.
pub fn fields_from<I, K, V>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
