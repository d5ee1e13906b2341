// 📝 Incoming Forms - Loosely typed update input from API bodies and sheets
//
// Crew-entered numbers arrive as JSON numbers, numeric strings, or blanks.
// UpdateInput holds them as typed by the user; resolve() turns one into a
// strict UpdateRequest, or None when the row carries no value at all.

use crate::entity::{UpdateMode, UpdateRequest, UpdateSource};
use crate::error::UpdateError;
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// NUMBER INPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberInput {
    Number(f64),
    Text(String),
    /// Anything else a client sent (true, an object...); fails at resolve time.
    Other(Value),
}

impl NumberInput {
    /// Blank text means "not entered"; anything else must be a finite number.
    pub fn parse(&self, field: &'static str) -> Result<Option<f64>, UpdateError> {
        let value = match self {
            NumberInput::Number(n) => *n,
            NumberInput::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed.parse::<f64>().map_err(|_| UpdateError::InvalidNumber {
                    field,
                    raw: s.clone(),
                })?
            }
            NumberInput::Other(v) => {
                return Err(UpdateError::InvalidNumber {
                    field,
                    raw: v.to_string(),
                })
            }
        };

        if !value.is_finite() {
            return Err(UpdateError::InvalidNumber {
                field,
                raw: value.to_string(),
            });
        }
        Ok(Some(value))
    }
}

impl From<f64> for NumberInput {
    fn from(n: f64) -> Self {
        NumberInput::Number(n)
    }
}

impl From<&str> for NumberInput {
    fn from(s: &str) -> Self {
        NumberInput::Text(s.to_string())
    }
}

fn parse_opt(value: &Option<NumberInput>, field: &'static str) -> Result<Option<f64>, UpdateError> {
    match value {
        Some(n) => n.parse(field),
        None => Ok(None),
    }
}

// ============================================================================
// MODE AND DATE INPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeInput {
    Mode(UpdateMode),
    /// Case-insensitive SET_TOTAL / ADD_DELTA
    Text(String),
    Other(Value),
}

impl ModeInput {
    pub fn parse(&self) -> Result<UpdateMode, UpdateError> {
        match self {
            ModeInput::Mode(mode) => Ok(*mode),
            ModeInput::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "SET_TOTAL" => Ok(UpdateMode::SetTotal),
                "ADD_DELTA" => Ok(UpdateMode::AddDelta),
                _ => Err(UpdateError::InvalidField {
                    field: "mode",
                    raw: format!("{:?}", s),
                }),
            },
            ModeInput::Other(v) => Err(UpdateError::InvalidField {
                field: "mode",
                raw: v.to_string(),
            }),
        }
    }
}

impl From<UpdateMode> for ModeInput {
    fn from(mode: UpdateMode) -> Self {
        ModeInput::Mode(mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateInput {
    Date(NaiveDate),
    /// YYYY-MM-DD; blank means "not entered"
    Text(String),
    Other(Value),
}

impl DateInput {
    pub fn parse(&self) -> Result<Option<NaiveDate>, UpdateError> {
        match self {
            DateInput::Date(d) => Ok(Some(*d)),
            DateInput::Text(s) if s.trim().is_empty() => Ok(None),
            DateInput::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(|_| UpdateError::InvalidField {
                    field: "effective_date_local",
                    raw: format!("{:?}", s),
                }),
            DateInput::Other(v) => Err(UpdateError::InvalidField {
                field: "effective_date_local",
                raw: v.to_string(),
            }),
        }
    }
}

impl From<NaiveDate> for DateInput {
    fn from(date: NaiveDate) -> Self {
        DateInput::Date(date)
    }
}

// ============================================================================
// COMMON FIELDS (shared by every row of a bulk submission)
// ============================================================================

/// When set, these override the matching field on every row
/// (one receive date and place for a whole delivery).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonFields {
    pub effective_date_local: Option<NaiveDate>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub actor_id: Option<String>,
}

// ============================================================================
// UPDATE INPUT
// ============================================================================

/// One update as entered. Cells are kept raw so a bad one fails its own row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInput {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub mode: Option<ModeInput>,

    #[serde(default)]
    pub input_value: Option<NumberInput>,

    /// Defaults to the vessel's local today
    #[serde(default)]
    pub effective_date_local: Option<DateInput>,

    #[serde(default)]
    pub meter_replaced: bool,
    #[serde(default)]
    pub old_meter_final: Option<NumberInput>,
    #[serde(default)]
    pub new_meter_start: Option<NumberInput>,

    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// A JSON row that could not be read as an update at all.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableRow {
    pub entity_id: String,
    pub error: UpdateError,
}

impl UpdateInput {
    pub fn new(entity_id: &str, mode: UpdateMode, input_value: Option<NumberInput>) -> Self {
        UpdateInput {
            entity_id: entity_id.to_string(),
            mode: Some(mode.into()),
            input_value,
            effective_date_local: None,
            meter_replaced: false,
            old_meter_final: None,
            new_meter_start: None,
            notes: None,
            location: None,
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.effective_date_local = Some(date.into());
        self
    }

    /// Decode one JSON row, keeping its entity id for the report if it fails.
    pub fn from_json(value: Value) -> Result<Self, UnreadableRow> {
        let entity_id = value
            .get("entityId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        serde_json::from_value(value).map_err(|e| UnreadableRow {
            entity_id,
            error: UpdateError::InvalidField {
                field: "row",
                raw: e.to_string(),
            },
        })
    }

    /// Build the strict request. `Ok(None)` when no value was entered.
    pub fn resolve(
        self,
        common: &CommonFields,
        today: NaiveDate,
        source: UpdateSource,
        batch_id: Option<Uuid>,
    ) -> Result<Option<UpdateRequest>, UpdateError> {
        let input_value = match parse_opt(&self.input_value, "input_value")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mode = self
            .mode
            .as_ref()
            .ok_or(UpdateError::MissingField("mode"))?
            .parse()?;

        let effective_date_local = match (common.effective_date_local, &self.effective_date_local) {
            (Some(date), _) => date,
            (None, Some(raw)) => raw.parse()?.unwrap_or(today),
            (None, None) => today,
        };

        let old_meter_final = parse_opt(&self.old_meter_final, "old_meter_final")?;
        let new_meter_start = parse_opt(&self.new_meter_start, "new_meter_start")?;

        let actor_id = common
            .actor_id
            .clone()
            .or(self.actor_id)
            .filter(|a| !a.trim().is_empty())
            .ok_or(UpdateError::MissingField("actor_id"))?;

        Ok(Some(UpdateRequest {
            entity_id: self.entity_id,
            mode,
            input_value: Some(input_value),
            effective_date_local,
            meter_replaced: self.meter_replaced,
            old_meter_final,
            new_meter_start,
            notes: common.notes.clone().or(self.notes),
            location: common.location.clone().or(self.location),
            actor_id,
            source,
            batch_id,
        }))
    }
}

// ============================================================================
// CSV SHEETS
// ============================================================================

/// One row of a crew spreadsheet export. Every cell is read as text.
#[derive(Debug, Clone, Default, Deserialize)]
struct CsvRow {
    entity_id: String,
    #[serde(default)]
    mode: String,
    #[serde(default)]
    input_value: String,
    #[serde(default)]
    effective_date_local: String,
    #[serde(default)]
    meter_replaced: String,
    #[serde(default)]
    old_meter_final: String,
    #[serde(default)]
    new_meter_start: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    actor_id: String,
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl CsvRow {
    fn into_input(self) -> UpdateInput {
        // A blank mode cell means SET_TOTAL; anything else is checked at resolve time
        let mode = match non_blank(self.mode) {
            Some(text) => ModeInput::Text(text),
            None => ModeInput::Mode(UpdateMode::SetTotal),
        };

        let meter_replaced = matches!(
            self.meter_replaced.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        );

        UpdateInput {
            entity_id: self.entity_id.trim().to_string(),
            mode: Some(mode),
            input_value: Some(NumberInput::Text(self.input_value)),
            effective_date_local: non_blank(self.effective_date_local).map(DateInput::Text),
            meter_replaced,
            old_meter_final: Some(NumberInput::Text(self.old_meter_final)),
            new_meter_start: Some(NumberInput::Text(self.new_meter_start)),
            notes: non_blank(self.notes),
            location: non_blank(self.location),
            actor_id: non_blank(self.actor_id),
        }
    }
}

/// Read update rows from CSV with a header line.
///
/// Cells stay as text so a bad number, mode or date fails its own row, not
/// the file. Only an undecodable record (bad UTF-8) fails the whole read.
pub fn read_csv<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<UpdateInput>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let line = i + 2;
        let row = result.with_context(|| format!("Failed to read CSV row {}", line))?;
        rows.push(row.into_input());
    }
    Ok(rows)
}

pub fn load_csv(path: &std::path::Path) -> anyhow::Result<Vec<UpdateInput>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    read_csv(file)
}

// ============================================================================
// TESTS
// ============================================================================
