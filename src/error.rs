// 🚫 Error Types - Every rejection is a value, never a crash
//
// UpdateError is what the validator, the engine and the ledger hand back to
// callers. StoreError is what a backing store can fail with; it folds into
// UpdateError so a bulk row can always be reported as Failed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR CODES (stable, serialised to API consumers)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FutureDate,
    DecreaseWithoutReset,
    InsufficientStock,
    MissingMeterFields,
    EntityNotFound,
    InvalidNumber,
    InvalidField,
    MissingField,
    NegativeTotal,
    StorageFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FutureDate => "FUTURE_DATE",
            ErrorCode::DecreaseWithoutReset => "DECREASE_WITHOUT_RESET",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::MissingMeterFields => "MISSING_METER_FIELDS",
            ErrorCode::EntityNotFound => "ENTITY_NOT_FOUND",
            ErrorCode::InvalidNumber => "INVALID_NUMBER",
            ErrorCode::InvalidField => "INVALID_FIELD",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::NegativeTotal => "NEGATIVE_TOTAL",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// UPDATE ERROR
// ============================================================================

/// Why an update request was not committed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    #[error("effective date {effective} is after today ({today})")]
    FutureDate { effective: NaiveDate, today: NaiveDate },

    #[error("new total {attempted} is below current {current} and no meter replacement was recorded")]
    DecreaseWithoutReset { current: f64, attempted: f64 },

    #[error("only {on_hand} on board, resulting quantity would be {attempted}")]
    InsufficientStock { on_hand: f64, attempted: f64 },

    #[error("meter replaced but old meter final reading is missing")]
    MissingMeterFields,

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("{field} is not a valid number: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },

    /// A mode, date or row shape that cannot be read.
    #[error("{field} is not valid: {raw}")]
    InvalidField { field: &'static str, raw: String },

    #[error("required field is missing: {0}")]
    MissingField(&'static str),

    #[error("resulting total {attempted} would be negative")]
    NegativeTotal { attempted: f64 },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl UpdateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UpdateError::FutureDate { .. } => ErrorCode::FutureDate,
            UpdateError::DecreaseWithoutReset { .. } => ErrorCode::DecreaseWithoutReset,
            UpdateError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            UpdateError::MissingMeterFields => ErrorCode::MissingMeterFields,
            UpdateError::EntityNotFound(_) => ErrorCode::EntityNotFound,
            UpdateError::InvalidNumber { .. } => ErrorCode::InvalidNumber,
            UpdateError::InvalidField { .. } => ErrorCode::InvalidField,
            UpdateError::MissingField(_) => ErrorCode::MissingField,
            UpdateError::NegativeTotal { .. } => ErrorCode::NegativeTotal,
            UpdateError::Storage(_) => ErrorCode::StorageFailure,
        }
    }
}

// ============================================================================
// STORE ERROR
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// Append-only violation: record ids must strictly increase per entity.
    #[error("record {record_id} for {entity_id} is not after the last stored record")]
    OutOfOrder { entity_id: String, record_id: i64 },

    #[error("store lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<StoreError> for UpdateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => UpdateError::EntityNotFound(id),
            other => UpdateError::Storage(other.to_string()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialise_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DecreaseWithoutReset).unwrap();
        assert_eq!(json, "\"DECREASE_WITHOUT_RESET\"");

        let parsed: ErrorCode = serde_json::from_str("\"INSUFFICIENT_STOCK\"").unwrap();
        assert_eq!(parsed, ErrorCode::InsufficientStock);
        assert_eq!(parsed.as_str(), "INSUFFICIENT_STOCK");
    }

    #[test]
    fn test_store_not_found_maps_to_entity_not_found() {
        let err: UpdateError = StoreError::NotFound("E9".to_string()).into();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert_eq!(err, UpdateError::EntityNotFound("E9".to_string()));

        let err: UpdateError = StoreError::Poisoned.into();
        assert_eq!(err.code(), ErrorCode::StorageFailure);
    }
}
