//! Alerting stage: threshold gate, alternate-supplier ranking, recommendation
//! synthesis, persist-and-emit.

use crate::error::{Disposition, FailureKind, StageError};
use crate::llm::{recommendation_prompt, template_recommendation, OpenRouterClient};
use crate::metrics::StageMetrics;
use crate::models::{credit_rating_score, Alert, AlternateCandidate, RiskType, Severity, Supplier};
use crate::store::EventStore;
use crate::stream::{fields_from, StreamEntry, StreamSubstrate, NEW_ALERTS, RISK_SCORES};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const GROUP: &str = "alerting_group";

pub struct AlertingStage {
    store: Arc<EventStore>,
    substrate: Arc<dyn StreamSubstrate>,
    llm: OpenRouterClient,
    alert_threshold: f64,
    llm_timeout: Duration,
    metrics: StageMetrics,
}

impl AlertingStage {
    pub fn new(
        store: Arc<EventStore>,
        substrate: Arc<dyn StreamSubstrate>,
        llm: OpenRouterClient,
        alert_threshold: f64,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            store,
            substrate,
            llm,
            alert_threshold,
            llm_timeout,
            metrics: StageMetrics::new("alerting"),
        }
    }

    pub async fn process_one(&self, entry: &StreamEntry) -> Result<(), StageError> {
        let risk_event_id = entry
            .field("risk_event_id")
            .ok_or_else(|| {
                StageError::new(
                    FailureKind::InvariantViolation,
                    anyhow::anyhow!("risk_scores message missing risk_event_id"),
                )
            })?
            .to_string();

        let Some(ev) = self.store.get_risk_event(&risk_event_id)? else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };
        if self.store.get_alert_by_risk_event(&ev.id)?.is_some() {
            self.metrics.record_failure(FailureKind::Duplicate);
            return Ok(());
        }
        let Some(composite) = ev.composite_score else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };

        if composite < self.alert_threshold {
            self.metrics.record_success();
            return Ok(());
        }

        let Some(primary_id) = ev.primary_supplier_id.as_deref() else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };
        let Some(primary_supplier) = self.store.get_supplier(primary_id)? else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };

        // Query alternates for every affected supplier, not just the primary
        // one, then merge by candidate id keeping the highest score seen.
        let affected_ids: Vec<&str> = if ev.affected_supply_chain_nodes.is_empty() {
            vec![primary_id]
        } else {
            ev.affected_supply_chain_nodes.iter().map(|s| s.as_str()).collect()
        };

        let mut materials: Vec<String> = Vec::new();
        let mut merged: HashMap<String, AlternateCandidate> = HashMap::new();
        for affected_id in &affected_ids {
            let Some(affected_supplier) = self.store.get_supplier(affected_id)? else {
                continue;
            };
            let material = affected_supplier.materials.first().cloned().unwrap_or_default();
            if !material.is_empty() && !materials.contains(&material) {
                materials.push(material.clone());
            }
            let candidates = self.store.list_alternate_candidates(&material, &affected_supplier.id)?;
            let required_volume =
                affected_supplier.max_capacity * (affected_supplier.supply_volume_pct / 100.0);
            let ranked = rank_candidates(&candidates, &affected_supplier.country, required_volume);
            for candidate in ranked {
                merged
                    .entry(candidate.id.clone())
                    .and_modify(|existing| {
                        if candidate.score > existing.score {
                            *existing = candidate.clone();
                        }
                    })
                    .or_insert(candidate);
            }
        }
        if materials.is_empty() {
            materials.push(primary_supplier.materials.first().cloned().unwrap_or_default());
        }

        let mut ranked: Vec<AlternateCandidate> = merged.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.lead_time_weeks.partial_cmp(&b.lead_time_weeks).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.name.cmp(&b.name))
        });
        let top5: Vec<_> = ranked.into_iter().take(5).collect();

        let candidate_names: Vec<String> = top5.iter().map(|c| c.name.clone()).collect();
        let risk_summary = format!(
            "{:?} risk at {} ({}): {}",
            ev.risk_type.unwrap_or(RiskType::Operational),
            primary_supplier.name,
            ev.severity_band.map(|s| s.as_str()).unwrap_or("unknown"),
            ev.reasoning
        );
        let recommendation = self.synthesize_recommendation(&risk_summary, &candidate_names, &top5).await;

        let severity_band = ev.severity_band.unwrap_or(Severity::Low);
        let title = format!(
            "{} risk: {}",
            ev.risk_type.map(|t| format!("{t:?}")).unwrap_or_else(|| "Operational".to_string()),
            primary_supplier.name
        );

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            risk_event_id: ev.id.clone(),
            severity_band,
            composite_score: composite,
            title,
            description: ev.reasoning.clone(),
            affected_suppliers: ev.affected_supply_chain_nodes.clone(),
            affected_materials: materials,
            alternates: top5,
            recommendation,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            created_at: chrono::Utc::now(),
        };

        if !self.store.insert_alert(&alert)? {
            self.metrics.record_failure(FailureKind::Duplicate);
            return Ok(());
        }

        self.substrate
            .publish(NEW_ALERTS, fields_from([("alert_id", alert.id.clone())]))
            .await?;
        self.metrics.record_success();
        Ok(())
    }

    async fn synthesize_recommendation(
        &self,
        risk_summary: &str,
        candidate_names: &[String],
        candidates: &[AlternateCandidate],
    ) -> String {
        let Some(top) = candidates.first() else {
            return "No alternate suppliers available; monitor the primary supplier closely.".to_string();
        };
        let prompt = recommendation_prompt(risk_summary, candidate_names);
        let result = self
            .llm
            .chat_completion(
                "openai/gpt-4o-mini",
                "You are a supply-chain risk analyst writing a short action recommendation.",
                &prompt,
                200,
                0.3,
                self.llm_timeout,
            )
            .await;
        match result {
            Ok(out) if !out.content.trim().is_empty() => out.content.trim().to_string(),
            _ => template_recommendation(&top.name, &top.country, top.lead_time_weeks),
        }
    }

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
                .claim(RISK_SCORES, GROUP, &consumer, claim_min_idle)
                .await
                .unwrap_or_default();
            let fresh = match self
                .substrate
                .consume(RISK_SCORES, GROUP, &consumer, block, batch_size)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "alerting consume failed");
                    continue;
                }
            };
            let entries: Vec<_> = claimed.into_iter().chain(fresh).collect();
            for entry in &entries {
                match self.process_one(entry).await {
                    Ok(()) => {
                        let _ = self.substrate.ack(RISK_SCORES, GROUP, &[entry.id.clone()]).await;
                    }
                    Err(e) => {
                        self.metrics.record_failure(e.kind);
                        match e.kind.disposition() {
                            Disposition::Ack => {
                                warn!(entry_id = entry.id, error = %e, "alerting failed permanently, acking");
                                let _ =
                                    self.substrate.ack(RISK_SCORES, GROUP, &[entry.id.clone()]).await;
                            }
                            Disposition::Retry => {
                                warn!(entry_id = entry.id, error = %e, "alerting failed transiently, leaving unacked");
                            }
                        }
                    }
                }
            }
            if entries.is_empty() {
                info!("alerting idle tick");
            }
        }
    }
}

fn score_candidate(s: &Supplier, disrupted_country: &str, required_volume: f64) -> (f64, HashMap<String, f64>) {
    let geo = if s.country != disrupted_country { 1.0 } else { 0.3 };
    let capacity = if required_volume > 0.0 {
        (s.max_capacity / required_volume).min(1.0)
    } else {
        1.0
    };
    let relationship = if s.approved_vendor {
        1.0
    } else if s.status == crate::models::SupplierStatus::PreQualified {
        0.8
    } else {
        0.4
    };
    let esg = s.esg_score / 100.0;
    let financial = credit_rating_score(&s.credit_rating);
    let switching = 1.0 - (s.switching_cost / 10.0);
    let lead_time = 1.0 / (1.0 + s.lead_time_weeks / 4.0);

    let breakdown = HashMap::from([
        ("geographic_diversity".to_string(), geo),
        ("capacity_coverage".to_string(), capacity),
        ("existing_relationship".to_string(), relationship),
        ("esg".to_string(), esg),
        ("financial_stability".to_string(), financial),
        ("switching_cost".to_string(), switching),
        ("lead_time".to_string(), lead_time),
    ]);

    let weighted = geo * 0.20
        + capacity * 0.25
        + relationship * 0.20
        + esg * 0.10
        + financial * 0.10
        + switching * 0.05
        + lead_time * 0.10;

    (weighted * 10.0, breakdown)
}

fn rank_candidates(candidates: &[Supplier], disrupted_country: &str, required_volume: f64) -> Vec<AlternateCandidate> {
    let mut scored: Vec<(Supplier, f64, HashMap<String, f64>)> = candidates
        .iter()
        .map(|s| {
            let (score, breakdown) = score_candidate(s, disrupted_country, required_volume);
            (s.clone(), score, breakdown)
        })
        .collect();

    // Stable tie-break: higher capacity, then shorter lead time, then name.
    scored.sort_by(|(a, a_score, _), (b, b_score, _)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.max_capacity.partial_cmp(&a.max_capacity).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.lead_time_weeks.partial_cmp(&b.lead_time_weeks).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.name.cmp(&b.name))
    });

    scored
        .into_iter()
        .map(|(supplier, score, breakdown)| AlternateCandidate {
            id: supplier.id,
            name: supplier.name,
            country: supplier.country,
            score,
            lead_time_weeks: supplier.lead_time_weeks,
            breakdown,
        })
        .collect()
}
