//! Scoring + propagation stage: deterministic composite score, severity band,
//! breadth-first graph propagation, supplier risk update.

use crate::error::{Disposition, FailureKind, StageError};
use crate::graph::GraphCache;
use crate::metrics::StageMetrics;
use crate::models::{Confirmation, ScoreComponents, Severity, Supplier, TimeHorizon};
use crate::store::EventStore;
use crate::stream::{fields_from, StreamEntry, StreamSubstrate, RISK_ENTITIES, RISK_SCORES};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const GROUP: &str = "risk_scoring_group";

pub struct ScoringStage {
    store: Arc<EventStore>,
    substrate: Arc<dyn StreamSubstrate>,
    graph_cache: Arc<GraphCache>,
    propagation_threshold: f64,
    metrics: StageMetrics,
}

impl ScoringStage {
    pub fn new(
        store: Arc<EventStore>,
        substrate: Arc<dyn StreamSubstrate>,
        graph_cache: Arc<GraphCache>,
        propagation_threshold: f64,
    ) -> Self {
        Self {
            store,
            substrate,
            graph_cache,
            propagation_threshold,
            metrics: StageMetrics::new("scoring"),
        }
    }

    pub async fn process_one(&self, entry: &StreamEntry) -> Result<(), StageError> {
        let risk_event_id = entry
            .field("risk_event_id")
            .ok_or_else(|| {
                StageError::new(
                    FailureKind::InvariantViolation,
                    anyhow::anyhow!("risk_entities message missing risk_event_id"),
                )
            })?
            .to_string();

        let Some(mut ev) = self.store.get_risk_event(&risk_event_id)? else {
            self.metrics.record_failure(FailureKind::MissingReference);
            return Ok(());
        };
        if ev.composite_score.is_some() {
            self.metrics.record_failure(FailureKind::Duplicate);
            return Ok(());
        }
        if !ev.is_risk || ev.primary_supplier_id.is_none() {
            self.metrics.record_success();
            return Ok(());
        }
        let Some(company) = self.store.get_company()? else {
            return Err(StageError::new(
                FailureKind::InvariantViolation,
                anyhow::anyhow!("no company profile configured"),
            ));
        };
        let suppliers = self.store.list_suppliers()?;
        let by_id: HashMap<&str, &Supplier> = suppliers.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut dominant: Option<(&Supplier, ScoreComponents)> = None;
        for node in &ev.affected_supply_chain_nodes {
            let Some(supplier) = by_id.get(node.as_str()) else {
                continue;
            };
            let material = supplier.materials.first().cloned().unwrap_or_default();
            let components = compute_components(
                &self.store,
                &company,
                supplier,
                &material,
                ev.severity,
                ev.confirmation,
                ev.time_horizon,
            )?;
            let better = dominant
                .as_ref()
                .map(|(_, c)| components.impact > c.impact)
                .unwrap_or(true);
            if better {
                dominant = Some((supplier, components));
            }
        }

        let Some((dominant_supplier, components)) = dominant else {
            self.metrics.record_failure(FailureKind::MissingReference);
            self.store.mark_article_processed(
                &ev.article_id,
                Some(&ev.id),
                Some("unlinkable_supplier"),
            )?;
            return Ok(());
        };

        let composite = components.composite();
        let severity_band = Severity::from_score(composite);

        let graph = self.graph_cache.get()?;
        let vulnerability_of = |id: &str| -> f64 {
            by_id
                .get(id)
                .map(|s| 1.0 - s.mitigation_score())
                .unwrap_or(0.5)
        };
        let propagation = graph.propagate(
            &dominant_supplier.id,
            composite,
            vulnerability_of,
            self.propagation_threshold,
        );

        for (supplier_id, propagated) in &propagation {
            if supplier_id == crate::graph::COMPANY_NODE {
                continue;
            }
            self.store.raise_supplier_risk_score(supplier_id, *propagated)?;
        }

        ev.components = Some(components);
        ev.composite_score = Some(composite);
        ev.severity_band = Some(severity_band);
        ev.propagation = propagation;
        self.store.put_risk_event(&ev)?;

        self.substrate
            .publish(RISK_SCORES, fields_from([("risk_event_id", ev.id.clone())]))
            .await?;
        self.metrics.record_success();
        Ok(())
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
                .claim(RISK_ENTITIES, GROUP, &consumer, claim_min_idle)
                .await
                .unwrap_or_default();
            let fresh = match self
                .substrate
                .consume(RISK_ENTITIES, GROUP, &consumer, block, batch_size)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "scoring consume failed");
                    continue;
                }
            };
            let entries: Vec<_> = claimed.into_iter().chain(fresh).collect();
            for entry in &entries {
                match self.process_one(entry).await {
                    Ok(()) => {
                        let _ = self.substrate.ack(RISK_ENTITIES, GROUP, &[entry.id.clone()]).await;
                    }
                    Err(e) => {
                        self.metrics.record_failure(e.kind);
                        match e.kind.disposition() {
                            Disposition::Ack => {
                                warn!(entry_id = entry.id, error = %e, "scoring failed permanently, acking");
                                let _ =
                                    self.substrate.ack(RISK_ENTITIES, GROUP, &[entry.id.clone()]).await;
                            }
                            Disposition::Retry => {
                                warn!(entry_id = entry.id, error = %e, "scoring failed transiently, leaving unacked");
                            }
                        }
                    }
                }
            }
            if entries.is_empty() {
                info!("scoring idle tick");
            }
        }
    }
}

fn probability_base(severity: Option<Severity>) -> f64 {
    match severity {
        Some(Severity::Critical) => 0.95,
        Some(Severity::High) => 0.80,
        Some(Severity::Medium) => 0.55,
        Some(Severity::Low) | None => 0.25,
    }
}

fn compute_components(
    store: &EventStore,
    company: &crate::models::Company,
    supplier: &Supplier,
    material: &str,
    severity: Option<Severity>,
    confirmation: Option<Confirmation>,
    time_horizon: Option<TimeHorizon>,
) -> Result<ScoreComponents> {
    let mut probability = probability_base(severity);
    if matches!(
        confirmation,
        Some(Confirmation::Uncertain) | Some(Confirmation::Unconfirmed)
    ) {
        probability *= 0.7;
    }

    let dependency_ratio = supplier.supply_volume_pct / 100.0;
    let criticality = company.criticality(material);
    let inventory_days = company.buffer_days(material);
    let buffer_score = 1.0 / (1.0 + inventory_days / 30.0);
    let impact = dependency_ratio * (criticality / 10.0) * buffer_score * 10.0;

    let urgency = time_horizon.map(|h| h.urgency()).unwrap_or(1.0);

    let alternate_count = store.list_alternate_candidates(material, &supplier.id)?.len() as f64;
    let mitigation = 1.0 + (0.2 * alternate_count).min(1.0);

    Ok(ScoreComponents {
        probability,
        impact,
        urgency,
        mitigation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupplierStatus;
    use tempfile::NamedTempFile;

    fn sample_company() -> crate::models::Company {
        crate::models::Company {
            display_name: "Acme Corp".to_string(),
            industry: "Manufacturing".to_string(),
            raw_materials: vec!["copper".to_string()],
            material_criticality: [("copper".to_string(), 8u8)].into_iter().collect(),
            material_buffer_days: [("copper".to_string(), 15.0)].into_iter().collect(),
            key_geographies: vec!["Germany".to_string()],
            alert_contacts: Vec::new(),
        }
    }

    fn sample_supplier(id: &str, pct: f64) -> Supplier {
        Supplier {
            id: id.to_string(),
            name: format!("Supplier {id}"),
            country: "DE".to_string(),
            region: "EU".to_string(),
            tier: 1,
            materials: vec!["copper".to_string()],
            supply_volume_pct: pct,
            status: SupplierStatus::Active,
            approved_vendor: true,
            esg_score: 70.0,
            credit_rating: "A".to_string(),
            max_capacity: 1000.0,
            lead_time_weeks: 6.0,
            switching_cost: 3.0,
            risk_score_current: 0.0,
            supplies_to: None,
        }
    }

    #[test]
    fn single_supplier_no_alternates_matches_worked_example() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventStore::open(tmp.path().to_str().unwrap()).unwrap();
        store.put_supplier(&sample_supplier("s1", 65.0)).unwrap();
        let company = sample_company();

        let components = compute_components(
            &store,
            &company,
            &sample_supplier("s1", 65.0),
            "copper",
            Some(Severity::High),
            Some(Confirmation::Confirmed),
            Some(TimeHorizon::Days),
        )
        .unwrap();

        assert!((components.probability - 0.80).abs() < 1e-9);
        assert!((components.impact - 4.333).abs() < 1e-2);
        assert!((components.mitigation - 1.0).abs() < 1e-9, "no alternates registered");
        let composite = components.composite();
        assert!((composite - 5.20).abs() < 1e-2);
    }

    #[test]
    fn alternates_reduce_composite_via_higher_mitigation() {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventStore::open(tmp.path().to_str().unwrap()).unwrap();
        store.put_supplier(&sample_supplier("s1", 65.0)).unwrap();
        store.put_supplier(&sample_supplier("s2", 10.0)).unwrap();
        store.put_supplier(&sample_supplier("s3", 10.0)).unwrap();
        store.put_supplier(&sample_supplier("s4", 10.0)).unwrap();
        let company = sample_company();

        let components = compute_components(
            &store,
            &company,
            &sample_supplier("s1", 65.0),
            "copper",
            Some(Severity::High),
            Some(Confirmation::Confirmed),
            Some(TimeHorizon::Days),
        )
        .unwrap();

        assert!((components.mitigation - 1.6).abs() < 1e-9, "3 alternates -> 1.0 + 0.2*3");
        assert!((components.composite() - 3.25).abs() < 1e-1);
    }
}
