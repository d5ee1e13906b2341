// 📦 Bulk Processor - Many rows, one batch id, independent outcomes
//
// Each row goes through the same ledger path as a single update. One bad row
// never blocks the others; blank rows are reported as SKIPPED.

use crate::entity::{UpdateRequest, UpdateSource};
use crate::error::{ErrorCode, UpdateError};
use crate::input::{CommonFields, UnreadableRow, UpdateInput};
use crate::service::Ledger;
use crate::store::LedgerStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    /// Position in the submitted batch (0-based)
    pub index: usize,
    pub entity_id: String,
    pub status: RowStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
}

impl RowResult {
    fn success(index: usize, entity_id: String, cumulative_value: f64, record_id: i64) -> Self {
        RowResult {
            index,
            entity_id,
            status: RowStatus::Success,
            error_code: None,
            reason: None,
            cumulative_value: Some(cumulative_value),
            record_id: Some(record_id),
        }
    }

    fn skipped(index: usize, entity_id: String) -> Self {
        RowResult {
            index,
            entity_id,
            status: RowStatus::Skipped,
            error_code: None,
            reason: Some("no value entered".to_string()),
            cumulative_value: None,
            record_id: None,
        }
    }

    fn failed(index: usize, entity_id: String, err: &UpdateError) -> Self {
        RowResult {
            index,
            entity_id,
            status: RowStatus::Failed,
            error_code: Some(err.code()),
            reason: Some(err.to_string()),
            cumulative_value: None,
            record_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub rows: Vec<RowResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    fn new(batch_id: Uuid, rows: Vec<RowResult>) -> Self {
        let mut summary = BatchSummary {
            total: rows.len(),
            ..Default::default()
        };
        for row in &rows {
            match row.status {
                RowStatus::Success => summary.succeeded += 1,
                RowStatus::Skipped => summary.skipped += 1,
                RowStatus::Failed => summary.failed += 1,
            }
        }
        BatchReport {
            batch_id,
            rows,
            summary,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowResult> {
        self.rows.iter().filter(|r| r.status == RowStatus::Failed)
    }
}

// ============================================================================
// PROCESSOR
// ============================================================================

pub struct BulkProcessor<'a, S: LedgerStore> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: LedgerStore> BulkProcessor<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        BulkProcessor { ledger }
    }

    /// Resolve raw rows against the shared fields and apply each one.
    pub fn process_batch(&self, rows: Vec<UpdateInput>, common: &CommonFields) -> BatchReport {
        self.process_rows(rows.into_iter().map(Ok).collect(), common)
    }

    /// Same as `process_batch` for rows still in JSON form; a row that does
    /// not decode fails on its own.
    pub fn process_json(&self, rows: Vec<Value>, common: &CommonFields) -> BatchReport {
        self.process_rows(rows.into_iter().map(UpdateInput::from_json).collect(), common)
    }

    fn process_rows(
        &self,
        rows: Vec<Result<UpdateInput, UnreadableRow>>,
        common: &CommonFields,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let today = self.ledger.clock().today_local();

        let results = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let row = match row {
                    Ok(row) => row,
                    Err(bad) => return RowResult::failed(index, bad.entity_id, &bad.error),
                };
                let entity_id = row.entity_id.clone();
                match row.resolve(common, today, UpdateSource::Bulk, Some(batch_id)) {
                    Ok(Some(request)) => self.apply_row(index, &request),
                    Ok(None) => RowResult::skipped(index, entity_id),
                    Err(err) => RowResult::failed(index, entity_id, &err),
                }
            })
            .collect();

        self.finish(batch_id, results)
    }

    /// Apply already-typed requests as one batch.
    pub fn process_requests(&self, requests: Vec<UpdateRequest>) -> BatchReport {
        let batch_id = Uuid::new_v4();

        let results = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                if request.input_value.is_none() {
                    return RowResult::skipped(index, request.entity_id);
                }
                let request = UpdateRequest {
                    source: UpdateSource::Bulk,
                    batch_id: Some(batch_id),
                    ..request
                };
                self.apply_row(index, &request)
            })
            .collect();

        self.finish(batch_id, results)
    }

    fn apply_row(&self, index: usize, request: &UpdateRequest) -> RowResult {
        match self.ledger.apply(request) {
            Ok(record) => RowResult::success(
                index,
                record.entity_id,
                record.cumulative_value,
                record.record_id,
            ),
            Err(err) => RowResult::failed(index, request.entity_id.clone(), &err),
        }
    }

    fn finish(&self, batch_id: Uuid, rows: Vec<RowResult>) -> BatchReport {
        let report = BatchReport::new(batch_id, rows);
        info!(
            batch_id = %batch_id,
            total = report.summary.total,
            succeeded = report.summary.succeeded,
            skipped = report.summary.skipped,
            failed = report.summary.failed,
            "bulk batch processed"
        );
        report
    }
}

// ============================================================================
// TESTS
// ============================================================================
