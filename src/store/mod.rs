//! Event store: companies, suppliers, articles, risk events, alerts.
//!
//! A single `rusqlite::Connection` behind a `parking_lot::Mutex`, opened with
//! `SQLITE_OPEN_NO_MUTEX` because locking is handled on the Rust side, WAL pragmas for
//! concurrent worker access, and an `INSERT ... ON CONFLICT DO UPDATE` upsert idiom
//! throughout rather than read-modify-write.

use crate::models::{Alert, Article, Company, RiskEvent, Severity, Supplier, SupplierStatus};
use crate::retry::with_backoff_sync;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS company (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    profile_json TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS suppliers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    country TEXT NOT NULL,
    region TEXT NOT NULL,
    tier INTEGER NOT NULL,
    materials_json TEXT NOT NULL,
    supply_volume_pct REAL NOT NULL,
    status TEXT NOT NULL,
    approved_vendor INTEGER NOT NULL,
    esg_score REAL NOT NULL,
    credit_rating TEXT NOT NULL,
    max_capacity REAL NOT NULL,
    lead_time_weeks REAL NOT NULL,
    switching_cost REAL NOT NULL,
    risk_score_current REAL NOT NULL DEFAULT 0.0,
    supplies_to TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_suppliers_status ON suppliers(status);

CREATE TABLE IF NOT EXISTS articles (
    event_id TEXT PRIMARY KEY,
    ts TEXT NOT NULL,
    source TEXT NOT NULL,
    headline TEXT NOT NULL,
    body TEXT NOT NULL,
    url TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    risk_event_id TEXT,
    process_note TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_articles_processed ON articles(processed, ts DESC);

CREATE TABLE IF NOT EXISTS risk_events (
    id TEXT PRIMARY KEY,
    article_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    composite_score REAL,
    severity_band TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_risk_events_article ON risk_events(article_id);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    risk_event_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    severity_band TEXT NOT NULL,
    composite_score REAL NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_risk_event ON alerts(risk_event_id);
CREATE INDEX IF NOT EXISTS idx_alerts_score ON alerts(composite_score DESC);
"#;

/// Wraps the schema's `record_json` column for a RiskEvent row.
fn risk_event_to_row(ev: &RiskEvent) -> Result<String> {
    serde_json::to_string(ev).context("failed to serialize risk event")
}

fn row_to_risk_event(json: &str) -> Result<RiskEvent> {
    serde_json::from_str(json).context("failed to deserialize risk event")
}

fn alert_to_row(alert: &Alert) -> Result<String> {
    serde_json::to_string(alert).context("failed to serialize alert")
}

fn row_to_alert(json: &str) -> Result<Alert> {
    serde_json::from_str(json).context("failed to deserialize alert")
}

/// Monotonic counter bumped on every supplier mutation; `graph.rs` uses it to
/// invalidate the cached dependency graph without re-reading the store on every pass.
#[derive(Debug, Default)]
pub struct SupplierVersion(std::sync::atomic::AtomicU64);

impl SupplierVersion {
    pub fn get(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }

    fn bump(&self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }
}

pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    pub supplier_version: Arc<SupplierVersion>,
}

impl EventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open event store at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize event store schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            supplier_version: Arc::new(SupplierVersion::default()),
        })
    }

    // -- Company -----------------------------------------------------------

    pub fn put_company(&self, company: &Company) -> Result<()> {
        let json = serde_json::to_string(company)?;
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.put_company", || {
            conn.execute(
                "INSERT INTO company (id, profile_json, version) VALUES (1, ?1, 1)
                 ON CONFLICT(id) DO UPDATE SET profile_json = excluded.profile_json,
                    version = company.version + 1",
                params![json],
            )
        })?;
        Ok(())
    }

    pub fn get_company(&self) -> Result<Option<Company>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row("SELECT profile_json FROM company WHERE id = 1", [], |r| {
                r.get(0)
            })
            .ok();
        row.map(|j| serde_json::from_str(&j).context("failed to deserialize company"))
            .transpose()
    }

    // -- Suppliers -----------------------------------------------------------

    pub fn put_supplier(&self, supplier: &Supplier) -> Result<()> {
        let materials_json = serde_json::to_string(&supplier.materials)?;
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.put_supplier", || {
            conn.execute(
                "INSERT INTO suppliers (
                    id, name, country, region, tier, materials_json, supply_volume_pct,
                    status, approved_vendor, esg_score, credit_rating, max_capacity,
                    lead_time_weeks, switching_cost, risk_score_current, supplies_to
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
                 ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name, country=excluded.country, region=excluded.region,
                    tier=excluded.tier, materials_json=excluded.materials_json,
                    supply_volume_pct=excluded.supply_volume_pct, status=excluded.status,
                    approved_vendor=excluded.approved_vendor, esg_score=excluded.esg_score,
                    credit_rating=excluded.credit_rating, max_capacity=excluded.max_capacity,
                    lead_time_weeks=excluded.lead_time_weeks, switching_cost=excluded.switching_cost,
                    risk_score_current=excluded.risk_score_current, supplies_to=excluded.supplies_to",
                params![
                    supplier.id,
                    supplier.name,
                    supplier.country,
                    supplier.region,
                    supplier.tier,
                    materials_json,
                    supplier.supply_volume_pct,
                    supplier.status.as_str(),
                    supplier.approved_vendor as i64,
                    supplier.esg_score,
                    supplier.credit_rating,
                    supplier.max_capacity,
                    supplier.lead_time_weeks,
                    supplier.switching_cost,
                    supplier.risk_score_current,
                    supplier.supplies_to,
                ],
            )
        })?;
        drop(conn);
        self.supplier_version.bump();
        Ok(())
    }

    /// Updates `risk_score_current` to `max(existing, propagated)`.
    pub fn raise_supplier_risk_score(&self, supplier_id: &str, propagated: f64) -> Result<()> {
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.raise_supplier_risk_score", || {
            conn.execute(
                "UPDATE suppliers SET risk_score_current = MAX(risk_score_current, ?2)
                 WHERE id = ?1",
                params![supplier_id, propagated],
            )
        })?;
        drop(conn);
        self.supplier_version.bump();
        Ok(())
    }

    pub fn get_supplier(&self, id: &str) -> Result<Option<Supplier>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, country, region, tier, materials_json, supply_volume_pct,
                    status, approved_vendor, esg_score, credit_rating, max_capacity,
                    lead_time_weeks, switching_cost, risk_score_current, supplies_to
             FROM suppliers WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_supplier(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, country, region, tier, materials_json, supply_volume_pct,
                    status, approved_vendor, esg_score, credit_rating, max_capacity,
                    lead_time_weeks, switching_cost, risk_score_current, supplies_to
             FROM suppliers",
        )?;
        let suppliers = stmt
            .query_map([], Self::row_to_supplier)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(suppliers)
    }

    /// Candidate alternates for `material`: overlapping material, candidate status, not
    /// `exclude_id`.
    pub fn list_alternate_candidates(&self, material: &str, exclude_id: &str) -> Result<Vec<Supplier>> {
        Ok(self
            .list_suppliers()?
            .into_iter()
            .filter(|s| s.id != exclude_id && s.status.is_candidate() && s.supplies(material))
            .collect())
    }

    fn row_to_supplier(row: &rusqlite::Row) -> rusqlite::Result<Supplier> {
        let materials_json: String = row.get(5)?;
        let status_str: String = row.get(7)?;
        let materials: Vec<String> = serde_json::from_str(&materials_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let status = SupplierStatus::parse(&status_str).unwrap_or(SupplierStatus::Inactive);
        Ok(Supplier {
            id: row.get(0)?,
            name: row.get(1)?,
            country: row.get(2)?,
            region: row.get(3)?,
            tier: row.get::<_, i64>(4)? as u8,
            materials,
            supply_volume_pct: row.get(6)?,
            status,
            approved_vendor: row.get::<_, i64>(8)? != 0,
            esg_score: row.get(9)?,
            credit_rating: row.get(10)?,
            max_capacity: row.get(11)?,
            lead_time_weeks: row.get(12)?,
            switching_cost: row.get(13)?,
            risk_score_current: row.get(14)?,
            supplies_to: row.get(15)?,
        })
    }

    // -- Articles -----------------------------------------------------------

    /// Inserts a new article, returning `false` (no row inserted) if the fingerprint
    /// already exists — the store-level idempotence boundary.
    pub fn insert_article(&self, article: &Article) -> Result<bool> {
        let conn = self.conn.lock();
        let changes = with_backoff_sync("sqlite.insert_article", || {
            conn.execute(
                "INSERT OR IGNORE INTO articles
                    (event_id, ts, source, headline, body, url, processed, risk_event_id, process_note)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    article.event_id,
                    article.timestamp.to_rfc3339(),
                    article.source,
                    article.headline,
                    article.body,
                    article.url,
                    article.processed as i64,
                    article.risk_event_id,
                    article.process_note,
                ],
            )
        })?;
        Ok(changes > 0)
    }

    pub fn get_article(&self, event_id: &str) -> Result<Option<Article>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, ts, source, headline, body, url, processed, risk_event_id, process_note
             FROM articles WHERE event_id = ?1",
        )?;
        let mut rows = stmt.query([event_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_article(row)?)),
            None => Ok(None),
        }
    }

    /// Marks an article processed, recording either the produced risk event id or an
    /// explanatory note (e.g. `"irrelevant"`) when no RiskEvent was emitted.
    pub fn mark_article_processed(
        &self,
        event_id: &str,
        risk_event_id: Option<&str>,
        note: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.mark_article_processed", || {
            conn.execute(
                "UPDATE articles SET processed = 1, risk_event_id = ?2, process_note = ?3
                 WHERE event_id = ?1",
                params![event_id, risk_event_id, note],
            )
        })?;
        Ok(())
    }

    fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
        let ts: String = row.get(1)?;
        Ok(Article {
            event_id: row.get(0)?,
            timestamp: DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            source: row.get(2)?,
            headline: row.get(3)?,
            body: row.get(4)?,
            url: row.get(5)?,
            processed: row.get::<_, i64>(6)? != 0,
            risk_event_id: row.get(7)?,
            process_note: row.get(8)?,
        })
    }

    // -- Risk events -----------------------------------------------------------

    /// Upsert by id.
    pub fn put_risk_event(&self, ev: &RiskEvent) -> Result<()> {
        let json = risk_event_to_row(ev)?;
        let composite = ev.composite_score;
        let band = ev.severity_band.map(|s| s.as_str());
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.put_risk_event", || {
            conn.execute(
                "INSERT INTO risk_events (id, article_id, record_json, composite_score, severity_band, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(id) DO UPDATE SET
                    record_json=excluded.record_json,
                    composite_score=excluded.composite_score,
                    severity_band=excluded.severity_band",
                params![
                    ev.id,
                    ev.article_id,
                    json,
                    composite,
                    band,
                    ev.created_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_risk_event(&self, id: &str) -> Result<Option<RiskEvent>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row("SELECT record_json FROM risk_events WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .ok();
        row.map(|j| row_to_risk_event(&j)).transpose()
    }

    /// `None` if no RiskEvent has been produced for this article yet. A unique index
    /// on `article_id` means re-delivery always finds the same record.
    pub fn get_risk_event_by_article(&self, article_id: &str) -> Result<Option<RiskEvent>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row(
                "SELECT record_json FROM risk_events WHERE article_id = ?1",
                [article_id],
                |r| r.get(0),
            )
            .ok();
        row.map(|j| row_to_risk_event(&j)).transpose()
    }

    /// Risk events that named this supplier as primary or among the affected
    /// supply chain nodes, most recent first. Filters after a full scan in
    /// Rust rather than a column, mirroring `list_alternate_candidates`.
    pub fn get_supplier_risk_history(&self, supplier_id: &str) -> Result<Vec<RiskEvent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record_json FROM risk_events ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let ev = row_to_risk_event(&row?)?;
            if ev.primary_supplier_id.as_deref() == Some(supplier_id)
                || ev.affected_supply_chain_nodes.iter().any(|n| n == supplier_id)
            {
                out.push(ev);
            }
        }
        Ok(out)
    }

    // -- Alerts -----------------------------------------------------------

    /// Inserts an alert, returning `false` if one already exists for this risk event
    /// (unique index on `risk_event_id` guards against double-emit).
    pub fn insert_alert(&self, alert: &Alert) -> Result<bool> {
        let json = alert_to_row(alert)?;
        let conn = self.conn.lock();
        let changes = with_backoff_sync("sqlite.insert_alert", || {
            conn.execute(
                "INSERT OR IGNORE INTO alerts
                    (id, risk_event_id, record_json, severity_band, composite_score, acknowledged, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    alert.id,
                    alert.risk_event_id,
                    json,
                    alert.severity_band.as_str(),
                    alert.composite_score,
                    alert.acknowledged as i64,
                    alert.created_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(changes > 0)
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row("SELECT record_json FROM alerts WHERE id = ?1", [id], |r| r.get(0))
            .ok();
        row.map(|j| row_to_alert(&j)).transpose()
    }

    pub fn get_alert_by_risk_event(&self, risk_event_id: &str) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row(
                "SELECT record_json FROM alerts WHERE risk_event_id = ?1",
                [risk_event_id],
                |r| r.get(0),
            )
            .ok();
        row.map(|j| row_to_alert(&j)).transpose()
    }

    /// List alerts, most recent / highest score first; optionally filtered by severity
    /// band, acknowledgement state, and recency (`created_after`, inclusive).
    pub fn list_alerts(
        &self,
        severity: Option<Severity>,
        acknowledged: Option<bool>,
    ) -> Result<Vec<Alert>> {
        self.list_alerts_since(severity, acknowledged, None)
    }

    pub fn list_alerts_since(
        &self,
        severity: Option<Severity>,
        acknowledged: Option<bool>,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_json FROM alerts
             WHERE (?1 IS NULL OR severity_band = ?1)
               AND (?2 IS NULL OR acknowledged = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
             ORDER BY composite_score DESC, created_at DESC",
        )?;
        let rows = stmt.query_map(
            params![
                severity.map(|s| s.as_str()),
                acknowledged.map(|b| b as i64),
                created_after.map(|t| t.to_rfc3339()),
            ],
            |r| r.get::<_, String>(0),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row_to_alert(&row?)?);
        }
        Ok(out)
    }

    pub fn ack_alert(&self, id: &str, acknowledger: &str) -> Result<bool> {
        let Some(mut alert) = self.get_alert(id)? else {
            return Ok(false);
        };
        alert.acknowledged = true;
        alert.acknowledged_by = Some(acknowledger.to_string());
        alert.acknowledged_at = Some(Utc::now());
        let json = alert_to_row(&alert)?;
        let conn = self.conn.lock();
        with_backoff_sync("sqlite.ack_alert", || {
            conn.execute(
                "UPDATE alerts SET record_json = ?2, acknowledged = 1 WHERE id = ?1",
                params![id, json],
            )
        })?;
        Ok(true)
    }

    /// Counts of alerts by severity band, suppliers by status, and suppliers by
    /// current risk band.
    pub fn summary(&self) -> Result<Summary> {
        let conn = self.conn.lock();
        let mut alerts_by_severity = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT severity_band, COUNT(*) FROM alerts GROUP BY severity_band")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (band, count) = row?;
                alerts_by_severity.insert(band, count as u64);
            }
        }
        let mut suppliers_by_status = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM suppliers GROUP BY status")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, count) = row?;
                suppliers_by_status.insert(status, count as u64);
            }
        }
        let mut suppliers_by_risk_band = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT risk_score_current FROM suppliers")?;
            let rows = stmt.query_map([], |r| r.get::<_, f64>(0))?;
            for row in rows {
                let band = Severity::from_score(row?).as_str();
                *suppliers_by_risk_band.entry(band.to_string()).or_insert(0u64) += 1;
            }
        }
        Ok(Summary {
            alerts_by_severity,
            suppliers_by_status,
            suppliers_by_risk_band,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Summary {
    pub alerts_by_severity: HashMap<String, u64>,
    pub suppliers_by_status: HashMap<String, u64>,
    pub suppliers_by_risk_band: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confirmation, RiskType, TimeHorizon};
    use tempfile::NamedTempFile;

    fn open_test_store() -> (EventStore, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let store = EventStore::open(tmp.path().to_str().unwrap()).unwrap();
        (store, tmp)
    }

    fn sample_supplier(id: &str) -> Supplier {
        Supplier {
            id: id.to_string(),
            name: format!("Supplier {id}"),
            country: "DE".to_string(),
            region: "EU".to_string(),
            tier: 1,
            materials: vec!["copper".to_string()],
            supply_volume_pct: 65.0,
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
    fn article_dedup_is_idempotent_on_event_id() {
        let (store, _tmp) = open_test_store();
        let article = Article {
            event_id: "fp1".to_string(),
            timestamp: Utc::now(),
            source: "wire".to_string(),
            headline: "M supply halted at X".to_string(),
            body: String::new(),
            url: "https://example.com".to_string(),
            processed: false,
            risk_event_id: None,
            process_note: None,
        };
        assert!(store.insert_article(&article).unwrap());
        assert!(!store.insert_article(&article).unwrap());
        assert!(store.get_article("fp1").unwrap().is_some());
    }

    #[test]
    fn supplier_upsert_bumps_version_and_raises_risk_score() {
        let (store, _tmp) = open_test_store();
        let before = store.supplier_version.get();
        store.put_supplier(&sample_supplier("s1")).unwrap();
        assert!(store.supplier_version.get() > before);

        store.raise_supplier_risk_score("s1", 4.0).unwrap();
        store.raise_supplier_risk_score("s1", 2.0).unwrap();
        let s = store.get_supplier("s1").unwrap().unwrap();
        assert!((s.risk_score_current - 4.0).abs() < 1e-9);
    }

    #[test]
    fn alert_insert_is_unique_per_risk_event() {
        let (store, _tmp) = open_test_store();
        let mut ev = RiskEvent::new("ev1".to_string(), "a1".to_string());
        ev.is_risk = true;
        ev.risk_type = Some(RiskType::SupplyDisruption);
        ev.confirmation = Some(Confirmation::Confirmed);
        ev.time_horizon = Some(TimeHorizon::Weeks);
        store.put_risk_event(&ev).unwrap();

        let alert = Alert {
            id: "al1".to_string(),
            risk_event_id: "ev1".to_string(),
            severity_band: Severity::Medium,
            composite_score: 5.2,
            title: "Supply disruption".to_string(),
            description: "...".to_string(),
            affected_suppliers: vec!["s1".to_string()],
            affected_materials: vec!["copper".to_string()],
            alternates: Vec::new(),
            recommendation: "Activate alternate supplier".to_string(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            created_at: Utc::now(),
        };
        assert!(store.insert_alert(&alert).unwrap());
        assert!(!store.insert_alert(&alert).unwrap());

        let listed = store.list_alerts(None, None).unwrap();
        assert_eq!(listed.len(), 1);

        assert!(store.ack_alert("al1", "ops@example.com").unwrap());
        let acked = store.get_alert("al1").unwrap().unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn alternate_candidates_exclude_self_and_non_candidate_status() {
        let (store, _tmp) = open_test_store();
        store.put_supplier(&sample_supplier("s1")).unwrap();
        let mut s2 = sample_supplier("s2");
        s2.status = SupplierStatus::Inactive;
        store.put_supplier(&s2).unwrap();
        let s3 = sample_supplier("s3");
        store.put_supplier(&s3).unwrap();

        let candidates = store.list_alternate_candidates("copper", "s1").unwrap();
        let ids: Vec<_> = candidates.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"s3"));
        assert!(!ids.contains(&"s1"));
        assert!(!ids.contains(&"s2"));
    }
}
