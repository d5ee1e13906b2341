// 🚢 Tracked Entities & Update Requests
//
// A tracked entity is anything with one cumulative number on board:
// an engine's running hours, or the remaining-on-board (ROB) count of a spare.
// An update request is a proposal to change that number. Nothing here touches
// storage; these are plain values passed between validator, engine and stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// Component hour meter (main engine, generators, pumps...)
    RunningHours,

    /// Stock item or spare part, value is quantity on hand
    Stock,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::RunningHours => "RUNNING_HOURS",
            EntityKind::Stock => "STOCK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING_HOURS" => Some(EntityKind::RunningHours),
            "STOCK" => Some(EntityKind::Stock),
            _ => None,
        }
    }

    /// Only hour meters can be swapped or reset.
    pub fn has_meter(&self) -> bool {
        matches!(self, EntityKind::RunningHours)
    }
}

// ============================================================================
// TRACKED ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    /// Stable identity, unique across the store
    pub entity_id: String,

    pub kind: EntityKind,

    /// Cumulative value; never negative once committed
    pub current_value: f64,

    /// Reorder level for stock items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_threshold: Option<f64>,

    pub last_updated_at: DateTime<Utc>,

    /// Free-form unit label ("hours", "ltr", "pcs")
    pub unit: String,
}

impl TrackedEntity {
    pub fn running_hours(entity_id: &str, current_value: f64) -> Self {
        TrackedEntity {
            entity_id: entity_id.to_string(),
            kind: EntityKind::RunningHours,
            current_value,
            minimum_threshold: None,
            last_updated_at: Utc::now(),
            unit: "hours".to_string(),
        }
    }

    pub fn stock(entity_id: &str, rob: f64, minimum: Option<f64>, unit: &str) -> Self {
        TrackedEntity {
            entity_id: entity_id.to_string(),
            kind: EntityKind::Stock,
            current_value: rob,
            minimum_threshold: minimum,
            last_updated_at: Utc::now(),
            unit: unit.to_string(),
        }
    }

    /// Stock at or above zero but under its reorder level.
    pub fn is_below_minimum(&self) -> bool {
        match (self.kind, self.minimum_threshold) {
            (EntityKind::Stock, Some(min)) => self.current_value < min,
            _ => false,
        }
    }
}

// ============================================================================
// UPDATE MODE / SOURCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    /// The input is the new absolute total (a meter reading, a stock count)
    SetTotal,

    /// The input is added to the current value (receive > 0, consume < 0)
    AddDelta,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::SetTotal => "SET_TOTAL",
            UpdateMode::AddDelta => "ADD_DELTA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Single,
    Bulk,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Single => "single",
            UpdateSource::Bulk => "bulk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(UpdateSource::Single),
            "bulk" => Some(UpdateSource::Bulk),
            _ => None,
        }
    }
}

// ============================================================================
// UPDATE REQUEST
// ============================================================================

/// A proposed change to one entity.
///
/// `input_value` is optional because bulk sheets routinely contain rows the
/// user left blank; the single-update path rejects a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub entity_id: String,
    pub mode: UpdateMode,

    #[serde(default)]
    pub input_value: Option<f64>,

    pub effective_date_local: NaiveDate,

    #[serde(default)]
    pub meter_replaced: bool,

    #[serde(default)]
    pub old_meter_final: Option<f64>,

    /// Defaults to 0 when a meter is replaced
    #[serde(default)]
    pub new_meter_start: Option<f64>,

    #[serde(default)]
    pub notes: Option<String>,

    /// Receive place for stock deliveries
    #[serde(default)]
    pub location: Option<String>,

    pub actor_id: String,

    pub source: UpdateSource,

    /// Shared by all rows of one bulk submission
    #[serde(default)]
    pub batch_id: Option<Uuid>,
}

impl UpdateRequest {
    pub fn new(
        entity_id: &str,
        mode: UpdateMode,
        input_value: f64,
        effective_date_local: NaiveDate,
        actor_id: &str,
    ) -> Self {
        UpdateRequest {
            entity_id: entity_id.to_string(),
            mode,
            input_value: Some(input_value),
            effective_date_local,
            meter_replaced: false,
            old_meter_final: None,
            new_meter_start: None,
            notes: None,
            location: None,
            actor_id: actor_id.to_string(),
            source: UpdateSource::Single,
            batch_id: None,
        }
    }

    /// Absolute hour-meter reading.
    pub fn reading(entity_id: &str, hours: f64, date: NaiveDate, actor_id: &str) -> Self {
        Self::new(entity_id, UpdateMode::SetTotal, hours, date, actor_id)
    }

    /// Stock received on board.
    pub fn receive(entity_id: &str, qty: f64, date: NaiveDate, actor_id: &str) -> Self {
        Self::new(entity_id, UpdateMode::AddDelta, qty.abs(), date, actor_id)
    }

    /// Stock consumed or issued.
    pub fn consume(entity_id: &str, qty: f64, date: NaiveDate, actor_id: &str) -> Self {
        Self::new(entity_id, UpdateMode::AddDelta, -qty.abs(), date, actor_id)
    }

    pub fn with_meter_replacement(mut self, old_meter_final: f64, new_meter_start: Option<f64>) -> Self {
        self.meter_replaced = true;
        self.old_meter_final = Some(old_meter_final);
        self.new_meter_start = new_meter_start;
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_source(mut self, source: UpdateSource) -> Self {
        self.source = source;
        self
    }

    /// Start reading of the new meter, 0 unless stated.
    pub fn meter_start(&self) -> f64 {
        self.new_meter_start.unwrap_or(0.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
