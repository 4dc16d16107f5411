//! Core data model: company profile, suppliers, raw articles, risk events, alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw-material dependency risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Geopolitical,
    NaturalDisaster,
    Financial,
    Regulatory,
    Operational,
    Cybersecurity,
    Esg,
    SupplyDisruption,
    PriceVolatility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// `>=10 critical, >=6 high, >=3 medium, else low`.
    pub fn from_score(score: f64) -> Self {
        if score >= 10.0 {
            Severity::Critical
        } else if score >= 6.0 {
            Severity::High
        } else if score >= 3.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    Unconfirmed,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeHorizon {
    Immediate,
    Days,
    Weeks,
    Months,
}

impl TimeHorizon {
    /// `{immediate:2.0, days:1.5, weeks:1.0, months:0.5}`.
    pub fn urgency(&self) -> f64 {
        match self {
            TimeHorizon::Immediate => 2.0,
            TimeHorizon::Days => 1.5,
            TimeHorizon::Weeks => 1.0,
            TimeHorizon::Months => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    Active,
    PreQualified,
    Alternate,
    Inactive,
}

impl SupplierStatus {
    pub fn is_candidate(&self) -> bool {
        matches!(
            self,
            SupplierStatus::Active | SupplierStatus::PreQualified | SupplierStatus::Alternate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupplierStatus::Active => "active",
            SupplierStatus::PreQualified => "pre_qualified",
            SupplierStatus::Alternate => "alternate",
            SupplierStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "pre_qualified" => Some(Self::PreQualified),
            "alternate" => Some(Self::Alternate),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertContact {
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Singleton company profile, seeded once and read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub display_name: String,
    pub industry: String,
    pub raw_materials: Vec<String>,
    pub material_criticality: HashMap<String, u8>,
    pub material_buffer_days: HashMap<String, f64>,
    pub key_geographies: Vec<String>,
    pub alert_contacts: Vec<AlertContact>,
}

impl Company {
    /// Criticality of `material` on a `[1,10]` scale, default 5.
    pub fn criticality(&self, material: &str) -> f64 {
        self.material_criticality
            .get(material)
            .copied()
            .unwrap_or(5) as f64
    }

    pub fn buffer_days(&self, material: &str) -> f64 {
        self.material_buffer_days.get(material).copied().unwrap_or(0.0)
    }

    /// Keyword corpus for the relevance-filter embedding.
    pub fn keyword_corpus(&self, supplier_names: &[String]) -> String {
        let mut parts = vec![self.display_name.clone()];
        parts.extend(supplier_names.iter().cloned());
        parts.extend(self.raw_materials.iter().cloned());
        parts.extend(self.key_geographies.iter().cloned());
        parts.join(" ")
    }
}

/// A supplier node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub country: String,
    pub region: String,
    pub tier: u8,
    pub materials: Vec<String>,
    pub supply_volume_pct: f64,
    pub status: SupplierStatus,
    pub approved_vendor: bool,
    pub esg_score: f64,
    pub credit_rating: String,
    pub max_capacity: f64,
    pub lead_time_weeks: f64,
    pub switching_cost: f64,
    pub risk_score_current: f64,
    /// Id of the supplier (or `None` for the company itself) this supplier ships to;
    /// the recursive "upstream-supplier descriptor" from the source model collapses to
    /// this single back-pointer, which is exactly what the derived graph needs to place
    /// an edge.
    pub supplies_to: Option<String>,
}

impl Supplier {
    pub fn supplies(&self, material: &str) -> bool {
        self.materials.iter().any(|m| m == material)
    }

    /// How well this supplier's own standing mitigates against the risk
    /// propagated onto it, in `[0, 1]`: a blend of ESG score, credit rating,
    /// and how much outstanding risk the store has already recorded for it.
    pub fn mitigation_score(&self) -> f64 {
        let esg_component = (self.esg_score / 100.0).clamp(0.0, 1.0);
        let credit_component = credit_rating_score(&self.credit_rating);
        let risk_component = 1.0 / (1.0 + self.risk_score_current / 10.0);
        ((esg_component + credit_component + risk_component) / 3.0).clamp(0.0, 1.0)
    }
}

/// Credit rating letter grade to a `[0, 1]` financial-stability score.
/// Shared by `Supplier::mitigation_score` and alternate-supplier ranking.
pub(crate) fn credit_rating_score(rating: &str) -> f64 {
    match rating.trim().to_ascii_uppercase().as_str() {
        "AAA" => 1.0,
        "AA" => 0.9,
        "A" => 0.8,
        "BBB" => 0.7,
        "BB" => 0.55,
        "B" => 0.4,
        "CCC" => 0.25,
        "CC" => 0.15,
        "C" => 0.05,
        _ => 0.5,
    }
}

/// An ingested article after normalization and dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub headline: String,
    pub body: String,
    pub url: String,
    pub processed: bool,
    pub risk_event_id: Option<String>,
    pub process_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub probability: f64,
    pub impact: f64,
    pub urgency: f64,
    pub mitigation: f64,
}

impl ScoreComponents {
    /// `probability * impact * urgency / mitigation`.
    pub fn composite(&self) -> f64 {
        self.probability * self.impact * self.urgency / self.mitigation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: String,
    pub article_id: String,
    pub is_risk: bool,
    pub risk_type: Option<RiskType>,
    pub affected_entities: Vec<String>,
    pub affected_supply_chain_nodes: Vec<String>,
    pub severity: Option<Severity>,
    pub confirmation: Option<Confirmation>,
    pub time_horizon: Option<TimeHorizon>,
    pub reasoning: String,
    pub recommended_action: Option<String>,
    pub components: Option<ScoreComponents>,
    pub composite_score: Option<f64>,
    pub severity_band: Option<Severity>,
    pub propagation: HashMap<String, f64>,
    pub primary_supplier_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RiskEvent {
    pub fn new(id: String, article_id: String) -> Self {
        Self {
            id,
            article_id,
            is_risk: false,
            risk_type: None,
            affected_entities: Vec::new(),
            affected_supply_chain_nodes: Vec::new(),
            severity: None,
            confirmation: None,
            time_horizon: None,
            reasoning: String::new(),
            recommended_action: None,
            components: None,
            composite_score: None,
            severity_band: None,
            propagation: HashMap::new(),
            primary_supplier_id: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateCandidate {
    pub id: String,
    pub name: String,
    pub country: String,
    pub score: f64,
    pub lead_time_weeks: f64,
    pub breakdown: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub risk_event_id: String,
    pub severity_band: Severity,
    pub composite_score: f64,
    pub title: String,
    pub description: String,
    pub affected_suppliers: Vec<String>,
    pub affected_materials: Vec<String>,
    pub alternates: Vec<AlternateCandidate>,
    pub recommendation: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplier(esg: f64, credit: &str, risk: f64) -> Supplier {
        Supplier {
            id: "s1".to_string(),
            name: "Test Supplier".to_string(),
            country: "DE".to_string(),
            region: "EU".to_string(),
            tier: 1,
            materials: vec!["copper".to_string()],
            supply_volume_pct: 50.0,
            status: SupplierStatus::Active,
            approved_vendor: true,
            esg_score: esg,
            credit_rating: credit.to_string(),
            max_capacity: 100.0,
            lead_time_weeks: 4.0,
            switching_cost: 2.0,
            risk_score_current: risk,
            supplies_to: None,
        }
    }

    #[test]
    fn mitigation_score_rewards_stronger_suppliers() {
        let strong = supplier(90.0, "AAA", 0.0);
        let weak = supplier(30.0, "CCC", 8.0);
        assert!(strong.mitigation_score() > weak.mitigation_score());
        assert!(strong.mitigation_score() <= 1.0);
        assert!(weak.mitigation_score() >= 0.0);
    }

    #[test]
    fn mitigation_score_falls_as_outstanding_risk_rises() {
        let low_risk = supplier(70.0, "A", 0.0);
        let high_risk = supplier(70.0, "A", 9.0);
        assert!(low_risk.mitigation_score() > high_risk.mitigation_score());
    }

    #[test]
    fn credit_rating_is_monotonic() {
        assert!(credit_rating_score("AAA") > credit_rating_score("BBB"));
        assert!(credit_rating_score("BBB") > credit_rating_score("C"));
    }
}
