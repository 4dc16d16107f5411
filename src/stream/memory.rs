//! In-memory `StreamSubstrate` used by unit/property tests and the Redis-less
//! demo path. Mirrors the at-least-once/claim semantics of the Redis backend
//! without a live server.

use super::{DedupResult, StreamEntry, StreamSubstrate};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Pending {
    entry: StreamEntry,
    consumer: String,
    delivered_at: Instant,
}

struct StreamLog {
    entries: Vec<StreamEntry>,
    next_id: u64,
    // group -> (consumer cursor, pending entries by id)
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    pending: HashMap<String, Pending>,
}

#[derive(Default)]
pub struct InMemoryStreamSubstrate {
    streams: Mutex<HashMap<String, StreamLog>>,
    dedup: Mutex<HashMap<String, Instant>>,
}

impl InMemoryStreamSubstrate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamSubstrate for InMemoryStreamSubstrate {
    async fn publish(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let mut streams = self.streams.lock();
        let log = streams.entry(stream.to_string()).or_insert_with(|| StreamLog {
            entries: Vec::new(),
            next_id: 0,
            groups: HashMap::new(),
        });
        let id = format!("{}-0", log.next_id);
        log.next_id += 1;
        log.entries.push(StreamEntry { id: id.clone(), fields });
        Ok(id)
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        _block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock();
        let log = streams.entry(stream.to_string()).or_insert_with(|| StreamLog {
            entries: Vec::new(),
            next_id: 0,
            groups: HashMap::new(),
        });
        let state = log.groups.entry(group.to_string()).or_default();

        let mut out = Vec::new();
        while out.len() < max_count && state.cursor < log.entries.len() {
            let entry = log.entries[state.cursor].clone();
            state.cursor += 1;
            state.pending.insert(
                entry.id.clone(),
                Pending {
                    entry: entry.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                },
            );
            out.push(entry);
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<()> {
        let mut streams = self.streams.lock();
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| anyhow!("unknown stream {stream}"))?;
        let state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow!("unknown group {group}"))?;
        for id in ids {
            state.pending.remove(id);
        }
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock();
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| anyhow!("unknown stream {stream}"))?;
        let state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow!("unknown group {group}"))?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for pending in state.pending.values_mut() {
            if now.duration_since(pending.delivered_at) >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                claimed.push(pending.entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn dedup(&self, key: &str, ttl: Duration) -> Result<DedupResult> {
        let mut dedup = self.dedup.lock();
        let now = Instant::now();
        if let Some(expires_at) = dedup.get(key) {
            if *expires_at > now {
                return Ok(DedupResult::AlreadyPresent);
            }
        }
        dedup.insert(key.to_string(), now + ttl);
        Ok(DedupResult::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fields_from;

    #[tokio::test]
    async fn publish_then_consume_delivers_once_per_group() {
        let sub = InMemoryStreamSubstrate::new();
        sub.publish("s", fields_from([("k", "v")])).await.unwrap();

        let a = sub
            .consume("s", "g", "c1", Duration::from_millis(0), 10)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);

        let b = sub
            .consume("s", "g", "c2", Duration::from_millis(0), 10)
            .await
            .unwrap();
        assert!(b.is_empty(), "second consumer in same group gets nothing new");
    }

    #[tokio::test]
    async fn unacked_entry_is_claimable_after_min_idle() {
        let sub = InMemoryStreamSubstrate::new();
        sub.publish("s", fields_from([("k", "v")])).await.unwrap();
        let delivered = sub
            .consume("s", "g", "c1", Duration::from_millis(0), 10)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);

        let too_soon = sub
            .claim("s", "g", "c2", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(too_soon.is_empty());

        let claimed = sub
            .claim("s", "g", "c2", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, delivered[0].id);
    }

    #[tokio::test]
    async fn dedup_round_trip() {
        let sub = InMemoryStreamSubstrate::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(sub.dedup("fp1", ttl).await.unwrap(), DedupResult::Inserted);
        assert_eq!(
            sub.dedup("fp1", ttl).await.unwrap(),
            DedupResult::AlreadyPresent
        );
    }
}
