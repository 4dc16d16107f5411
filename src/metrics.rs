//! Per-stage success/failure counters.
//!
//! One instance per pipeline stage, snapshotted through `tracing` rather than a
//! scrape endpoint since the core has no HTTP surface of its own.

use crate::error::FailureKind;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct StageMetrics {
    name: &'static str,
    success: AtomicU64,
    transient_fail: AtomicU64,
    permanent_fail: AtomicU64,
    duplicates: AtomicU64,
}

impl StageMetrics {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            success: AtomicU64::new(0),
            transient_fail: AtomicU64::new(0),
            permanent_fail: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind) {
        match kind {
            FailureKind::Transient | FailureKind::Cancelled => {
                self.transient_fail.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Duplicate => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::MalformedLlmOutput
            | FailureKind::MissingReference
            | FailureKind::InvariantViolation => {
                self.permanent_fail.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            stage: self.name,
            success: self.success.load(Ordering::Relaxed),
            transient_fail: self.transient_fail.load(Ordering::Relaxed),
            permanent_fail: self.permanent_fail.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        info!(
            stage = s.stage,
            success = s.success,
            transient_fail = s.transient_fail,
            permanent_fail = s.permanent_fail,
            duplicates = s.duplicates,
            "stage metrics"
        );
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageMetricsSnapshot {
    pub stage: &'static str,
    pub success: u64,
    pub transient_fail: u64,
    pub permanent_fail: u64,
    pub duplicates: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_kind() {
        let m = StageMetrics::new("test_stage");
        m.record_success();
        m.record_success();
        m.record_failure(FailureKind::Transient);
        m.record_failure(FailureKind::Duplicate);
        m.record_failure(FailureKind::InvariantViolation);

        let s = m.snapshot();
        assert_eq!(s.success, 2);
        assert_eq!(s.transient_fail, 1);
        assert_eq!(s.duplicates, 1);
        assert_eq!(s.permanent_fail, 1);
    }
}
