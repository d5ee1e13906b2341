// 🔌 API Payloads - Request/response shapes shared by the CLI and the server
//
// Handlers here are synchronous and transport-free; the HTTP layer only
// decodes, calls them, and picks a status code.

use crate::bulk::{BatchReport, BulkProcessor};
use crate::entity::{EntityKind, TrackedEntity, UpdateSource};
use crate::error::{ErrorCode, UpdateError};
use crate::input::{CommonFields, UpdateInput};
use crate::service::Ledger;
use crate::store::LedgerStore;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// SINGLE UPDATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_local: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UpdateResponse {
    pub fn rejected(err: &UpdateError) -> Self {
        UpdateResponse {
            success: false,
            cumulative_value: None,
            effective_date_local: None,
            record_id: None,
            error_code: Some(err.code()),
            message: Some(err.to_string()),
        }
    }
}

/// A single update has nothing to skip: a missing value is an error here.
pub fn handle_update<S: LedgerStore>(ledger: &Ledger<S>, input: UpdateInput) -> UpdateResponse {
    let today = ledger.clock().today_local();

    let request = match input.resolve(&CommonFields::default(), today, UpdateSource::Single, None) {
        Ok(Some(request)) => request,
        Ok(None) => return UpdateResponse::rejected(&UpdateError::MissingField("input_value")),
        Err(err) => return UpdateResponse::rejected(&err),
    };

    match ledger.update(request) {
        Ok(record) => UpdateResponse {
            success: true,
            cumulative_value: Some(record.cumulative_value),
            effective_date_local: Some(record.effective_date_local),
            record_id: Some(record.record_id),
            error_code: None,
            message: None,
        },
        Err(err) => UpdateResponse::rejected(&err),
    }
}

// ============================================================================
// BULK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    /// Decoded row by row so one malformed row cannot reject the request
    pub rows: Vec<Value>,
    #[serde(default)]
    pub common: CommonFields,
}

pub fn handle_bulk<S: LedgerStore>(ledger: &Ledger<S>, request: BulkRequest) -> BatchReport {
    BulkProcessor::new(ledger).process_json(request.rows, &request.common)
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEntity {
    pub entity_id: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub minimum_threshold: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl RegisterEntity {
    pub fn into_entity(self) -> TrackedEntity {
        let unit = self.unit.unwrap_or_else(|| match self.kind {
            EntityKind::RunningHours => "hours".to_string(),
            EntityKind::Stock => "pcs".to_string(),
        });
        TrackedEntity {
            entity_id: self.entity_id,
            kind: self.kind,
            current_value: self.current_value,
            minimum_threshold: self.minimum_threshold,
            last_updated_at: Utc::now(),
            unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::temporal::FixedClock;
    use std::sync::Arc;

    fn ledger() -> Ledger<MemoryStore> {
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        Ledger::new(
            MemoryStore::with_entities([TrackedEntity::running_hours("E1", 12580.0)]),
            Arc::new(FixedClock::on(today)),
        )
        .unwrap()
    }

    #[test]
    fn test_update_response_json() {
        let ledger = ledger();
        let input: UpdateInput = serde_json::from_value(serde_json::json!({
            "entityId": "E1",
            "mode": "ADD_DELTA",
            "inputValue": "20",
            "actorId": "chief"
        }))
        .unwrap();

        let response = handle_update(&ledger, input);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["cumulativeValue"], 12600.0);
        assert_eq!(json["effectiveDateLocal"], "2025-06-30");
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn test_update_rejections_carry_codes() {
        let ledger = ledger();

        let future = serde_json::from_value::<UpdateInput>(serde_json::json!({
            "entityId": "E1",
            "mode": "SET_TOTAL",
            "inputValue": 12600,
            "effectiveDateLocal": "2025-07-01",
            "actorId": "chief"
        }))
        .unwrap();
        let response = handle_update(&ledger, future);
        assert!(!response.success);
        assert_eq!(response.error_code, Some(ErrorCode::FutureDate));

        let blank = UpdateInput::new("E1", crate::entity::UpdateMode::SetTotal, None).with_actor("chief");
        let response = handle_update(&ledger, blank);
        assert_eq!(response.error_code, Some(ErrorCode::MissingField));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["errorCode"], "MISSING_FIELD");
    }

    #[test]
    fn test_bulk_request_defaults_common() {
        let request: BulkRequest = serde_json::from_value(serde_json::json!({
            "rows": [{"entityId": "E1", "mode": "SET_TOTAL", "inputValue": 12590, "actorId": "chief"}]
        }))
        .unwrap();
        assert_eq!(request.common, CommonFields::default());

        let report = handle_bulk(&ledger(), request);
        assert_eq!(report.summary.succeeded, 1);
    }

    #[test]
    fn test_bulk_request_with_bad_middle_row() {
        let ledger = Ledger::new(
            MemoryStore::with_entities([
                TrackedEntity::running_hours("E1", 100.0),
                TrackedEntity::running_hours("E2", 200.0),
                TrackedEntity::running_hours("E3", 300.0),
            ]),
            Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap())),
        )
        .unwrap();

        let request: BulkRequest = serde_json::from_value(serde_json::json!({
            "rows": [
                {"entityId": "E1", "mode": "ADD_DELTA", "inputValue": 5},
                {"entityId": "E2", "mode": "SIDEWAYS", "inputValue": true,
                 "effectiveDateLocal": "2025-13-01"},
                {"entityId": "E3", "mode": "SET_TOTAL", "inputValue": "310"}
            ],
            "common": {"actorId": "chief"}
        }))
        .unwrap();

        let report = handle_bulk(&ledger, request);

        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.rows[1].entity_id, "E2");
        assert_eq!(report.rows[1].status, crate::bulk::RowStatus::Failed);
        assert_eq!(ledger.entity("E1").unwrap().current_value, 105.0);
        assert_eq!(ledger.entity("E2").unwrap().current_value, 200.0);
        assert_eq!(ledger.entity("E3").unwrap().current_value, 310.0);
    }

    #[test]
    fn test_register_payload_defaults_unit() {
        let payload: RegisterEntity = serde_json::from_value(serde_json::json!({
            "entityId": "FO-PUMP",
            "kind": "RUNNING_HOURS",
            "currentValue": 320.5
        }))
        .unwrap();

        let entity = payload.into_entity();
        assert_eq!(entity.unit, "hours");
        assert_eq!(entity.minimum_threshold, None);
    }
}
