//! Redis Streams-backed `StreamSubstrate`.

use super::{DedupResult, StreamEntry, StreamSubstrate};
use crate::retry::with_backoff;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

pub struct RedisStreamSubstrate {
    conn: ConnectionManager,
}

impl RedisStreamSubstrate {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }

    /// Ensures the consumer group exists, creating the stream if needed
    /// (`XGROUP CREATE ... MKSTREAM`). Idempotent: `BUSYGROUP` is swallowed.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP means the group already exists: not an error, nothing to retry.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e).context("XGROUP CREATE failed"),
        }
    }
}

fn parse_stream_reply(
    reply: Vec<(String, Vec<(String, Vec<(String, String)>)>)>,
) -> Vec<StreamEntry> {
    let mut out = Vec::new();
    for (_stream_name, entries) in reply {
        for (id, kvs) in entries {
            let fields: HashMap<String, String> = kvs.into_iter().collect();
            out.push(StreamEntry { id, fields });
        }
    }
    out
}

#[async_trait]
impl StreamSubstrate for RedisStreamSubstrate {
    async fn publish(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let conn = self.conn.clone();
        let id: String = with_backoff("redis.xadd", || {
            let mut conn = conn.clone();
            let mut cmd = redis::cmd("XADD");
            cmd.arg(stream).arg("*");
            for (k, v) in &fields {
                cmd.arg(k).arg(v);
            }
            async move { cmd.query_async(&mut conn).await }
        })
        .await
        .context("XADD failed")?;
        Ok(id)
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.ensure_group(stream, group).await?;
        let conn = self.conn.clone();
        let reply: Option<Vec<(String, Vec<(String, Vec<(String, String)>)>)>> =
            with_backoff("redis.xreadgroup", || {
                let mut conn = conn.clone();
                async move {
                    redis::cmd("XREADGROUP")
                        .arg("GROUP")
                        .arg(group)
                        .arg(consumer)
                        .arg("COUNT")
                        .arg(max_count)
                        .arg("BLOCK")
                        .arg(block.as_millis() as i64)
                        .arg("STREAMS")
                        .arg(stream)
                        .arg(">")
                        .query_async(&mut conn)
                        .await
                }
            })
            .await
            .context("XREADGROUP failed")?;

        match reply {
            Some(r) => Ok(parse_stream_reply(r)),
            None => Ok(Vec::new()),
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.clone();
        let _: i64 = with_backoff("redis.xack", || {
            let mut conn = conn.clone();
            let mut cmd = redis::cmd("XACK");
            cmd.arg(stream).arg(group);
            for id in ids {
                cmd.arg(id);
            }
            async move { cmd.query_async(&mut conn).await }
        })
        .await
        .context("XACK failed")?;
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>> {
        self.ensure_group(stream, group).await?;
        let conn = self.conn.clone();
        // XAUTOCLAIM stream group consumer min-idle-time start
        let reply: (String, Vec<(String, Vec<(String, String)>)>, Vec<String>) =
            with_backoff("redis.xautoclaim", || {
                let mut conn = conn.clone();
                async move {
                    redis::cmd("XAUTOCLAIM")
                        .arg(stream)
                        .arg(group)
                        .arg(consumer)
                        .arg(min_idle.as_millis() as i64)
                        .arg("0")
                        .query_async(&mut conn)
                        .await
                }
            })
            .await
            .context("XAUTOCLAIM failed")?;

        let (_cursor, entries, _deleted) = reply;
        let mut out = Vec::new();
        for (id, kvs) in entries {
            let fields: HashMap<String, String> = kvs.into_iter().collect();
            out.push(StreamEntry { id, fields });
        }
        Ok(out)
    }

    async fn dedup(&self, key: &str, ttl: Duration) -> Result<DedupResult> {
        let conn = self.conn.clone();
        let redis_key = format!("dedup:{key}");
        let set: Option<String> = with_backoff("redis.set_nx_px", || {
            let mut conn = conn.clone();
            let redis_key = redis_key.clone();
            async move {
                conn.set_options(
                    &redis_key,
                    "1",
                    redis::SetOptions::default()
                        .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as usize))
                        .conditional_set(redis::ExistenceCheck::NX),
                )
                .await
            }
        })
        .await
        .context("SET NX PX failed")?;
        Ok(match set {
            Some(_) => DedupResult::Inserted,
            None => DedupResult::AlreadyPresent,
        })
    }
}
