//! Ingestion stage: periodic pull from connectors, fingerprint dedup, publish
//! to `normalized_events`.
//!
//! The scheduler loop is a periodic ticker over a list of connectors, each
//! isolated from the others' failures.

use crate::connector::{normalize, Connector};
use crate::metrics::StageMetrics;
use crate::models::Article;
use crate::store::EventStore;
use crate::stream::{fields_from, DedupResult, StreamSubstrate, NORMALIZED_EVENTS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Lowercased, trimmed-headline MD5 fingerprint used as both the dedup key
/// and the article's primary key.
pub fn fingerprint(headline: &str) -> String {
    let normalized = headline.trim().to_lowercase();
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

pub struct IngestionStage {
    connectors: Vec<Arc<dyn Connector>>,
    store: Arc<EventStore>,
    substrate: Arc<dyn StreamSubstrate>,
    dedup_ttl: Duration,
    metrics: StageMetrics,
}

impl IngestionStage {
    pub fn new(
        connectors: Vec<Arc<dyn Connector>>,
        store: Arc<EventStore>,
        substrate: Arc<dyn StreamSubstrate>,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            connectors,
            store,
            substrate,
            dedup_ttl,
            metrics: StageMetrics::new("ingestion"),
        }
    }

    /// Fetches every connector once, isolating one connector's failure from
    /// the rest, and returns the number of articles newly published.
    pub async fn run_tick(&self) -> usize {
        let mut published = 0;
        for connector in &self.connectors {
            match self.run_connector(connector.as_ref()).await {
                Ok(n) => published += n,
                Err(e) => {
                    error!(connector = connector.name(), error = %e, "connector fetch failed");
                }
            }
        }
        self.metrics.log_snapshot();
        published
    }

    async fn run_connector(&self, connector: &dyn Connector) -> anyhow::Result<usize> {
        let raw_items = connector.fetch().await?;
        let mut published = 0;
        for raw in raw_items {
            let event = normalize(raw);
            let event_id = fingerprint(&event.headline);

            match self.substrate.dedup(&event_id, self.dedup_ttl).await {
                Ok(DedupResult::AlreadyPresent) => {
                    self.metrics.record_failure(crate::error::FailureKind::Duplicate);
                    continue;
                }
                Ok(DedupResult::Inserted) => {}
                Err(e) => {
                    warn!(connector = connector.name(), error = %e, "dedup check failed, skipping item");
                    continue;
                }
            }

            let article = Article {
                event_id: event_id.clone(),
                timestamp: event.timestamp,
                source: event.source.clone(),
                headline: event.headline.clone(),
                body: event.body.clone(),
                url: event.url.clone(),
                processed: false,
                risk_event_id: None,
                process_note: None,
            };
            if !self.store.insert_article(&article)? {
                continue;
            }

            self.substrate
                .publish(
                    NORMALIZED_EVENTS,
                    fields_from([
                        ("event_id", event_id.clone()),
                        ("source", event.source),
                        ("headline", event.headline),
                        ("body", event.body),
                        ("url", event.url),
                        ("timestamp", event.timestamp.to_rfc3339()),
                    ]),
                )
                .await?;
            self.metrics.record_success();
            published += 1;
        }
        Ok(published)
    }

    /// Runs `run_tick` on a fixed interval until `shutdown` resolves.
    pub async fn run_forever(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let n = self.run_tick().await;
                    info!(published = n, "ingestion tick complete");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ingestion stage shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::RawItem;
    use crate::stream::memory::InMemoryStreamSubstrate;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedConnector {
        name: String,
        items: Vec<RawItem>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FixedConnector {
        fn name(&self) -> &str {
            &self.name
        }
        async fn fetch(&self) -> anyhow::Result<Vec<RawItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.clone())
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        fn name(&self) -> &str {
            "failing"
        }
        async fn fetch(&self) -> anyhow::Result<Vec<RawItem>> {
            Err(anyhow::anyhow!("source down"))
        }
    }

    fn tmp_store() -> (Arc<EventStore>, tempfile::NamedTempFile) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = Arc::new(EventStore::open(tmp.path().to_str().unwrap()).unwrap());
        (store, tmp)
    }

    #[tokio::test]
    async fn duplicate_headline_within_ttl_is_published_once() {
        let (store, _tmp) = tmp_store();
        let substrate: Arc<dyn StreamSubstrate> = Arc::new(InMemoryStreamSubstrate::new());
        let connector = Arc::new(FixedConnector {
            name: "wire".to_string(),
            items: vec![RawItem {
                id_or_url: "https://example.com/a".to_string(),
                title: "Factory fire halts copper supply".to_string(),
                body: Some("details".to_string()),
                description: None,
                published_at: Some(Utc::now()),
                source_name: "wire".to_string(),
            }],
            calls: AtomicUsize::new(0),
        });
        let stage = IngestionStage::new(
            vec![connector.clone()],
            store.clone(),
            substrate.clone(),
            Duration::from_secs(172_800),
        );

        assert_eq!(stage.run_tick().await, 1);
        assert_eq!(stage.run_tick().await, 0, "second tick sees the same headline and dedups");
    }

    #[tokio::test]
    async fn one_connector_failing_does_not_block_others() {
        let (store, _tmp) = tmp_store();
        let substrate: Arc<dyn StreamSubstrate> = Arc::new(InMemoryStreamSubstrate::new());
        let ok_connector = Arc::new(FixedConnector {
            name: "wire".to_string(),
            items: vec![RawItem {
                id_or_url: "https://example.com/b".to_string(),
                title: "Port strike delays shipments".to_string(),
                body: Some("details".to_string()),
                description: None,
                published_at: Some(Utc::now()),
                source_name: "wire".to_string(),
            }],
            calls: AtomicUsize::new(0),
        });
        let stage = IngestionStage::new(
            vec![Arc::new(FailingConnector), ok_connector],
            store,
            substrate,
            Duration::from_secs(172_800),
        );

        assert_eq!(stage.run_tick().await, 1);
    }

    #[test]
    fn fingerprint_is_case_and_whitespace_insensitive() {
        assert_eq!(
            fingerprint("  Copper Supply Halted  "),
            fingerprint("copper supply halted")
        );
    }
}
