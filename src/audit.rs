// 📜 Audit Trail - One immutable record per accepted change
//
// History is authoritative; an entity's current value is a cache of the last
// record's cumulative value. Records are never updated or deleted.
//
// Each record carries a SHA-256 digest chained to the previous record of the
// same entity, so a rewritten history is detectable on replay.

use crate::entity::{TrackedEntity, UpdateRequest, UpdateSource};
use crate::reconciliation::{Reconciled, ReconciliationBranch};
use crate::temporal::DateRange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

// ============================================================================
// AUDIT RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Strictly increasing across the log (microsecond timestamp + tiebreak)
    pub record_id: i64,
    pub entity_id: String,

    pub previous_value: f64,
    /// Value as the user entered it
    pub new_value: f64,
    /// Value actually stored (differs from new_value after a meter swap)
    pub cumulative_value: f64,

    pub effective_date_local: NaiveDate,
    pub entered_at_utc: DateTime<Utc>,

    pub actor_id: String,
    pub source: UpdateSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub meter_replaced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_meter_final: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_meter_start: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_digest: Option<String>,
    pub digest: String,
}

impl AuditRecord {
    /// Digest over every field except `digest` itself.
    pub fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{:?}|{:?}|{}|{}|{}",
            self.record_id,
            self.entity_id,
            self.previous_value,
            self.new_value,
            self.cumulative_value,
            self.effective_date_local,
            self.entered_at_utc.to_rfc3339(),
            self.actor_id,
            self.source.as_str(),
            self.notes.as_deref().unwrap_or(""),
            self.meter_replaced,
            self.old_meter_final,
            self.new_meter_start,
            self.location.as_deref().unwrap_or(""),
            self.batch_id.map(|b| b.to_string()).unwrap_or_default(),
            self.previous_digest.as_deref().unwrap_or(""),
        ));
        format!("{:x}", hasher.finalize())
    }

    pub fn digest_matches(&self) -> bool {
        self.compute_digest() == self.digest
    }
}

// ============================================================================
// SEQUENCER
// ============================================================================

/// Monotonic record ids: wall-clock microseconds, bumped by one on collision
/// or when the clock steps backwards.
#[derive(Debug, Default)]
pub struct Sequencer {
    last: AtomicI64,
}

impl Sequencer {
    pub fn new() -> Self {
        Sequencer::default()
    }

    /// Continue after the highest id already persisted.
    pub fn resume(last: i64) -> Self {
        Sequencer {
            last: AtomicI64::new(last),
        }
    }

    pub fn next(&self, now: DateTime<Utc>) -> i64 {
        let stamp = now.timestamp_micros();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = stamp.max(last + 1);
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

// ============================================================================
// AUDIT LOGGER
// ============================================================================

/// Builds audit records. Building never fails; persisting is the store's job
/// and happens together with the value commit.
#[derive(Debug, Default)]
pub struct AuditLogger {
    sequencer: Sequencer,
}

impl AuditLogger {
    pub fn new() -> Self {
        AuditLogger::default()
    }

    pub fn resume(last_record_id: i64) -> Self {
        AuditLogger {
            sequencer: Sequencer::resume(last_record_id),
        }
    }

    pub fn record(
        &self,
        entity: &TrackedEntity,
        request: &UpdateRequest,
        reconciled: &Reconciled,
        entered_at: DateTime<Utc>,
        previous_digest: Option<String>,
    ) -> AuditRecord {
        let (old_meter_final, new_meter_start) = match reconciled.branch {
            ReconciliationBranch::MeterReplacement {
                old_meter_final,
                new_meter_start,
            } => (Some(old_meter_final), Some(new_meter_start)),
            ReconciliationBranch::Direct => (None, None),
        };

        let mut record = AuditRecord {
            record_id: self.sequencer.next(entered_at),
            entity_id: entity.entity_id.clone(),
            previous_value: reconciled.previous,
            new_value: reconciled.raw_new,
            cumulative_value: reconciled.cumulative,
            effective_date_local: request.effective_date_local,
            entered_at_utc: entered_at,
            actor_id: request.actor_id.clone(),
            source: request.source,
            notes: request.notes.clone(),
            meter_replaced: reconciled.is_meter_replacement(),
            old_meter_final,
            new_meter_start,
            location: request.location.clone(),
            batch_id: request.batch_id,
            previous_digest,
            digest: String::new(),
        };
        record.digest = record.compute_digest();
        record
    }

    pub fn last_record_id(&self) -> i64 {
        self.sequencer.last()
    }
}

// ============================================================================
// HISTORY
// ============================================================================

/// Oldest-first snapshot of one entity's records. Iterating twice yields the
/// same records; a fresh query picks up anything appended since.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub entity_id: String,
    pub range: DateRange,
    pub records: Vec<AuditRecord>,
}

impl History {
    pub fn new(entity_id: &str, range: DateRange, mut records: Vec<AuditRecord>) -> Self {
        records.sort_by_key(|r| r.record_id);
        History {
            entity_id: entity_id.to_string(),
            range,
            records,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AuditRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current value implied by the history, if any record exists.
    pub fn replay(&self) -> Option<f64> {
        self.records.last().map(|r| r.cumulative_value)
    }

    /// Record ids whose digest or chain link does not check out.
    pub fn broken_links(&self) -> Vec<i64> {
        let mut broken = Vec::new();
        let mut prev_digest: Option<&str> = None;

        for (i, record) in self.records.iter().enumerate() {
            let linked = i == 0 || record.previous_digest.as_deref() == prev_digest;
            if !linked || !record.digest_matches() {
                broken.push(record.record_id);
            }
            prev_digest = Some(record.digest.as_str());
        }

        broken
    }

    /// Record ids whose previous value does not continue the prior record.
    pub fn continuity_gaps(&self, tolerance: f64) -> Vec<i64> {
        self.records
            .windows(2)
            .filter(|w| (w[1].previous_value - w[0].cumulative_value).abs() > tolerance)
            .map(|w| w[1].record_id)
            .collect()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a AuditRecord;
    type IntoIter = std::slice::Iter<'a, AuditRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for History {
    type Item = AuditRecord;
    type IntoIter = std::vec::IntoIter<AuditRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

// ============================================================================
// INTEGRITY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub entity_id: String,
    pub record_count: usize,
    pub cached_value: f64,
    pub replayed_value: Option<f64>,
    pub broken_links: Vec<i64>,
    pub continuity_gaps: Vec<i64>,
}

impl IntegrityReport {
    pub fn from_history(entity: &TrackedEntity, history: &History, tolerance: f64) -> Self {
        IntegrityReport {
            entity_id: entity.entity_id.clone(),
            record_count: history.len(),
            cached_value: entity.current_value,
            replayed_value: history.replay(),
            broken_links: history.broken_links(),
            continuity_gaps: history.continuity_gaps(tolerance),
        }
    }

    /// Cache matches history (an untouched entity has nothing to replay).
    pub fn cache_consistent(&self) -> bool {
        self.replayed_value
            .map_or(true, |v| (v - self.cached_value).abs() < 1e-9)
    }

    pub fn is_intact(&self) -> bool {
        self.cache_consistent() && self.broken_links.is_empty() && self.continuity_gaps.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} records, cached {}, replayed {}, {} broken links, {} gaps",
            self.entity_id,
            self.record_count,
            self.cached_value,
            self.replayed_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.broken_links.len(),
            self.continuity_gaps.len()
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::ReconciliationEngine;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
    }

    fn chain(logger: &AuditLogger, readings: &[f64]) -> Vec<AuditRecord> {
        let engine = ReconciliationEngine::new();
        let mut entity = TrackedEntity::running_hours("E1", 0.0);
        let mut records: Vec<AuditRecord> = Vec::new();

        for (i, hours) in readings.iter().enumerate() {
            let req = UpdateRequest::reading("E1", *hours, date(), "chief");
            let r = engine.compute_new_value(&entity, &req).unwrap();
            let prev = records.last().map(|r| r.digest.clone());
            records.push(logger.record(&entity, &req, &r, at(i as i64), prev));
            entity.current_value = r.cumulative;
        }
        records
    }

    #[test]
    fn test_sequencer_strictly_increasing() {
        let seq = Sequencer::new();
        let now = at(0);

        let a = seq.next(now);
        let b = seq.next(now); // same instant
        let c = seq.next(now - Duration::seconds(5)); // clock stepped back

        assert!(a < b && b < c);
        assert_eq!(a, now.timestamp_micros());
    }

    #[test]
    fn test_sequencer_resume() {
        let seq = Sequencer::resume(i64::MAX / 2);
        assert_eq!(seq.next(at(0)), i64::MAX / 2 + 1);
    }

    #[test]
    fn test_record_fields_and_digest() {
        let logger = AuditLogger::new();
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::running_hours("E1", 1000.0);
        let req = UpdateRequest::reading("E1", 50.0, date(), "chief")
            .with_meter_replacement(1012.0, None)
            .with_notes("new meter fitted");

        let r = engine.compute_new_value(&entity, &req).unwrap();
        let record = logger.record(&entity, &req, &r, at(0), None);

        assert_eq!(record.previous_value, 1000.0);
        assert_eq!(record.new_value, 50.0);
        assert_eq!(record.cumulative_value, 1050.0);
        assert!(record.meter_replaced);
        assert_eq!(record.old_meter_final, Some(1012.0));
        assert_eq!(record.new_meter_start, Some(0.0));
        assert_eq!(record.notes.as_deref(), Some("new meter fitted"));
        assert_eq!(record.digest.len(), 64);
        assert!(record.digest_matches());
    }

    #[test]
    fn test_history_replay_and_chain() {
        let logger = AuditLogger::new();
        let records = chain(&logger, &[10.0, 25.0, 40.0]);
        let history = History::new("E1", DateRange::all(), records);

        assert_eq!(history.len(), 3);
        assert_eq!(history.replay(), Some(40.0));
        assert!(history.broken_links().is_empty());
        assert!(history.continuity_gaps(1e-9).is_empty());

        // Restartable: iterating twice sees the same sequence
        let first: Vec<i64> = history.iter().map(|r| r.record_id).collect();
        let second: Vec<i64> = (&history).into_iter().map(|r| r.record_id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tampered_record_detected() {
        let logger = AuditLogger::new();
        let mut records = chain(&logger, &[10.0, 25.0, 40.0]);
        records[1].cumulative_value = 99.0;
        let tampered_id = records[1].record_id;
        let history = History::new("E1", DateRange::all(), records);

        assert_eq!(history.broken_links(), vec![tampered_id]);
        assert_eq!(history.continuity_gaps(1e-9).len(), 1);
    }

    #[test]
    fn test_integrity_report() {
        let logger = AuditLogger::new();
        let history = History::new("E1", DateRange::all(), chain(&logger, &[10.0, 25.0]));

        let mut entity = TrackedEntity::running_hours("E1", 25.0);
        let report = IntegrityReport::from_history(&entity, &history, 1e-9);
        assert!(report.is_intact());

        entity.current_value = 30.0;
        let report = IntegrityReport::from_history(&entity, &history, 1e-9);
        assert!(!report.cache_consistent());
        assert!(!report.is_intact());
        println!("✅ {}", report.summary());
    }
}
