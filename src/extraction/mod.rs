//! Extraction stage: relevance filter, structured LLM extraction, entity
//! linking, persist-and-emit.

use crate::embeddings::{cosine_similarity, EmbeddingClient, KeywordEmbeddingCache};
use crate::error::{Disposition, FailureKind, StageError};
use crate::llm::{
    is_complex, parse_extraction, OpenRouterClient, EXTRACTION_SYSTEM_PROMPT_TEMPLATE,
    STRICT_RETRY_SUFFIX,
};
use crate::metrics::StageMetrics;
use crate::models::RiskEvent;
use crate::store::EventStore;
use crate::stream::{fields_from, StreamEntry, StreamSubstrate, NORMALIZED_EVENTS, RISK_ENTITIES};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const GROUP: &str = "risk_extraction_group";

pub struct ExtractionStage {
    store: Arc<EventStore>,
    substrate: Arc<dyn StreamSubstrate>,
    embedding_client: EmbeddingClient,
    keyword_cache: KeywordEmbeddingCache,
    llm: OpenRouterClient,
    relevance_threshold: f64,
    embedding_timeout: Duration,
    llm_timeout: Duration,
    fast_model: String,
    capable_model: String,
    metrics: StageMetrics,
}

impl ExtractionStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<EventStore>,
        substrate: Arc<dyn StreamSubstrate>,
        embedding_client: EmbeddingClient,
        llm: OpenRouterClient,
        relevance_threshold: f64,
        embedding_timeout: Duration,
        llm_timeout: Duration,
        fast_model: String,
        capable_model: String,
    ) -> Self {
        Self {
            store,
            substrate,
            embedding_client,
            keyword_cache: KeywordEmbeddingCache::new(),
            llm,
            relevance_threshold,
            embedding_timeout,
            llm_timeout,
            fast_model,
            capable_model,
            metrics: StageMetrics::new("extraction"),
        }
    }

    pub async fn process_one(&self, entry: &StreamEntry) -> Result<(), StageError> {
        let event_id = entry
            .field("event_id")
            .ok_or_else(|| {
                StageError::new(
                    FailureKind::InvariantViolation,
                    anyhow::anyhow!("normalized event missing event_id"),
                )
            })?
            .to_string();

        let Some(article) = self.store.get_article(&event_id)? else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };
        if article.processed {
            self.metrics.record_failure(FailureKind::Duplicate);
            return Ok(());
        }
        if self.store.get_risk_event_by_article(&event_id)?.is_some() {
            self.store
                .mark_article_processed(&event_id, None, Some("already_extracted"))?;
            self.metrics.record_failure(FailureKind::Duplicate);
            return Ok(());
        }

        let Some(company) = self.store.get_company()? else {
            return Err(StageError::new(
                FailureKind::InvariantViolation,
                anyhow::anyhow!("no company profile configured"),
            ));
        };
        let suppliers = self.store.list_suppliers()?;
        let supplier_names: Vec<String> = suppliers.iter().map(|s| s.name.clone()).collect();

        let corpus = company.keyword_corpus(&supplier_names);
        let keyword_vector = self
            .keyword_cache
            .get_or_compute(&corpus, &self.embedding_client, self.embedding_timeout)
            .await?;
        let article_text = format!("{} {}", article.headline, article.body);
        let article_vector = self
            .embedding_client
            .embed(&article_text, self.embedding_timeout)
            .await?;
        let similarity = cosine_similarity(&article_vector, &keyword_vector);

        if similarity <= self.relevance_threshold {
            self.store
                .mark_article_processed(&event_id, None, Some("irrelevant"))?;
            self.metrics.record_success();
            return Ok(());
        }

        let model = if is_complex(&article.headline, &article.body) {
            &self.capable_model
        } else {
            &self.fast_model
        };
        let system_prompt = EXTRACTION_SYSTEM_PROMPT_TEMPLATE
            .replace("{company}", &company.display_name)
            .replace("{suppliers}", &supplier_names.join(", "))
            .replace("{materials}", &company.raw_materials.join(", "))
            .replace("{geographies}", &company.key_geographies.join(", "));

        let extracted = match self.call_and_parse(model, &system_prompt, &article_text).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(event_id, error = %e, "extraction parse failed after retry, persisting as non-risk");
                self.metrics.record_failure(FailureKind::MalformedLlmOutput);
                let ev = RiskEvent::new(uuid::Uuid::new_v4().to_string(), event_id.clone());
                self.store.put_risk_event(&ev)?;
                self.store
                    .mark_article_processed(&event_id, Some(&ev.id), Some("malformed_llm_output"))?;
                return Ok(());
            }
        };

        let mut ev = RiskEvent::new(uuid::Uuid::new_v4().to_string(), event_id.clone());
        ev.is_risk = extracted.is_risk;
        ev.risk_type = extracted.risk_type;
        ev.severity = extracted.severity;
        ev.confirmation = extracted.confirmation();
        ev.time_horizon = extracted.time_horizon;
        ev.reasoning = extracted.reasoning;
        ev.recommended_action = extracted.recommended_action;

        let (linked, unlinked) = link_entities(&extracted.affected_supply_chain_nodes, &suppliers);
        ev.affected_supply_chain_nodes = linked.clone();
        ev.affected_entities = extracted
            .affected_entities
            .into_iter()
            .chain(unlinked)
            .collect();
        ev.primary_supplier_id = linked.first().cloned();

        self.store.put_risk_event(&ev)?;
        self.store
            .mark_article_processed(&event_id, Some(&ev.id), None)?;

        self.substrate
            .publish(
                RISK_ENTITIES,
                fields_from([("risk_event_id", ev.id.clone()), ("article_id", event_id)]),
            )
            .await?;
        self.metrics.record_success();
        Ok(())
    }

    async fn call_and_parse(
        &self,
        model: &str,
        system_prompt: &str,
        article_text: &str,
    ) -> Result<crate::llm::ExtractionSchema> {
        let first = self
            .llm
            .chat_completion(model, system_prompt, article_text, 600, 0.1, self.llm_timeout)
            .await?;
        if let Ok(parsed) = parse_extraction(&first.content) {
            return Ok(parsed);
        }

        let stricter_system = format!("{system_prompt}\n{STRICT_RETRY_SUFFIX}");
        let second = self
            .llm
            .chat_completion(model, &stricter_system, article_text, 600, 0.0, self.llm_timeout)
            .await?;
        parse_extraction(&second.content)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_forever(
        self: Arc<Self>,
        consumer: String,
        block: Duration,
        batch_size: usize,
        claim_min_idle: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let claimed = self
                .substrate
                .claim(NORMALIZED_EVENTS, GROUP, &consumer, claim_min_idle)
                .await
                .unwrap_or_default();
            let fresh = match self
                .substrate
                .consume(NORMALIZED_EVENTS, GROUP, &consumer, block, batch_size)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "extraction consume failed");
                    continue;
                }
            };
            let entries: Vec<_> = claimed.into_iter().chain(fresh).collect();
            for entry in &entries {
                match self.process_one(entry).await {
                    Ok(()) => {
                        let _ = self.substrate.ack(NORMALIZED_EVENTS, GROUP, &[entry.id.clone()]).await;
                    }
                    Err(e) => {
                        self.metrics.record_failure(e.kind);
                        match e.kind.disposition() {
                            Disposition::Ack => {
                                warn!(entry_id = entry.id, error = %e, "extraction failed permanently, acking");
                                let _ = self
                                    .substrate
                                    .ack(NORMALIZED_EVENTS, GROUP, &[entry.id.clone()])
                                    .await;
                            }
                            Disposition::Retry => {
                                warn!(entry_id = entry.id, error = %e, "extraction failed transiently, leaving unacked");
                            }
                        }
                    }
                }
            }
            if entries.is_empty() {
                info!("extraction idle tick");
            }
        }
    }
}

/// Case-insensitive exact-then-substring matching of LLM-returned node names
/// against known supplier display names.
fn link_entities(
    names: &[String],
    suppliers: &[crate::models::Supplier],
) -> (Vec<String>, Vec<String>) {
    let mut linked = Vec::new();
    let mut unlinked = Vec::new();
    for name in names {
        let lower = name.to_lowercase();
        if let Some(exact) = suppliers.iter().find(|s| s.name.to_lowercase() == lower) {
            linked.push(exact.id.clone());
            continue;
        }
        if let Some(partial) = suppliers
            .iter()
            .find(|s| s.name.to_lowercase().contains(&lower) || lower.contains(&s.name.to_lowercase()))
        {
            linked.push(partial.id.clone());
            continue;
        }
        unlinked.push(name.clone());
    }
    (linked, unlinked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Supplier, SupplierStatus};

    fn supplier(id: &str, name: &str) -> Supplier {
        Supplier {
            id: id.to_string(),
            name: name.to_string(),
            country: "DE".to_string(),
            region: "EU".to_string(),
            tier: 1,
            materials: vec!["copper".to_string()],
            supply_volume_pct: 50.0,
            status: SupplierStatus::Active,
            approved_vendor: true,
            esg_score: 70.0,
            credit_rating: "A".to_string(),
            max_capacity: 100.0,
            lead_time_weeks: 4.0,
            switching_cost: 2.0,
            risk_score_current: 0.0,
            supplies_to: None,
        }
    }

    #[test]
    fn link_entities_matches_exact_case_insensitive() {
        let suppliers = vec![supplier("s1", "Acme Metals")];
        let (linked, unlinked) = link_entities(&["acme metals".to_string()], &suppliers);
        assert_eq!(linked, vec!["s1".to_string()]);
        assert!(unlinked.is_empty());
    }

    #[test]
    fn link_entities_falls_back_to_substring() {
        let suppliers = vec![supplier("s1", "Acme Metals Inc")];
        let (linked, unlinked) = link_entities(&["Acme Metals".to_string()], &suppliers);
        assert_eq!(linked, vec!["s1".to_string()]);
        assert!(unlinked.is_empty());
    }

    #[test]
    fn link_entities_keeps_unmatched_as_free_form() {
        let suppliers = vec![supplier("s1", "Acme Metals")];
        let (linked, unlinked) = link_entities(&["Unrelated Corp".to_string()], &suppliers);
        assert!(linked.is_empty());
        assert_eq!(unlinked, vec!["Unrelated Corp".to_string()]);
    }
}
