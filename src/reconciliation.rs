// ⚖️ Reconciliation Engine - What gets stored vs what was typed
//
// Two numbers come out of every accepted update:
//   raw_new    = what the user's input means on its own
//                (SET_TOTAL: the input, ADD_DELTA: previous + input)
//   cumulative = what is actually persisted as the entity's value
//
// They only differ when an hour meter was replaced. Then the reading on the
// new meter is bridged onto the old total:
//   cumulative = previous + (input - new_meter_start)
// regardless of mode.

use crate::entity::{TrackedEntity, UpdateMode, UpdateRequest};
use crate::error::UpdateError;
use serde::{Deserialize, Serialize};

// ============================================================================
// RECONCILED VALUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationBranch {
    /// Input taken at face value
    Direct,

    /// Old meter retired, new meter segment added onto the previous total
    MeterReplacement { old_meter_final: f64, new_meter_start: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
    pub previous: f64,
    pub raw_new: f64,
    pub cumulative: f64,
    pub branch: ReconciliationBranch,
}

impl Reconciled {
    pub fn is_meter_replacement(&self) -> bool {
        matches!(self.branch, ReconciliationBranch::MeterReplacement { .. })
    }

    /// Signed change applied to the stored value.
    pub fn change(&self) -> f64 {
        self.cumulative - self.previous
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Compute the value to persist for `request` against `entity`.
    ///
    /// Fails only on malformed input (missing/non-finite numbers, meter
    /// replacement without an old final reading). Policy checks live in the
    /// validator.
    pub fn compute_new_value(
        &self,
        entity: &TrackedEntity,
        request: &UpdateRequest,
    ) -> Result<Reconciled, UpdateError> {
        let input = finite(request.input_value, "input_value")?;
        let previous = entity.current_value;

        let raw_new = match request.mode {
            UpdateMode::SetTotal => input,
            UpdateMode::AddDelta => previous + input,
        };

        if request.meter_replaced && entity.kind.has_meter() {
            let old_meter_final = request
                .old_meter_final
                .ok_or(UpdateError::MissingMeterFields)?;
            let old_meter_final = finite(Some(old_meter_final), "old_meter_final")?;
            let new_meter_start = finite(Some(request.meter_start()), "new_meter_start")?;

            return Ok(Reconciled {
                previous,
                raw_new,
                cumulative: previous + (input - new_meter_start),
                branch: ReconciliationBranch::MeterReplacement {
                    old_meter_final,
                    new_meter_start,
                },
            });
        }

        Ok(Reconciled {
            previous,
            raw_new,
            cumulative: raw_new,
            branch: ReconciliationBranch::Direct,
        })
    }
}

fn finite(value: Option<f64>, field: &'static str) -> Result<f64, UpdateError> {
    match value {
        None => Err(UpdateError::MissingField(field)),
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(UpdateError::InvalidNumber {
            field,
            raw: v.to_string(),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    #[test]
    fn test_set_total() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::running_hours("E1", 12580.0);
        let req = UpdateRequest::reading("E1", 12600.0, today(), "chief");

        let r = engine.compute_new_value(&entity, &req).unwrap();

        assert_eq!(r.previous, 12580.0);
        assert_eq!(r.raw_new, 12600.0);
        assert_eq!(r.cumulative, 12600.0);
        assert_eq!(r.branch, ReconciliationBranch::Direct);
        assert_eq!(r.change(), 20.0);
    }

    #[test]
    fn test_add_delta() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::stock("S1", 5.0, Some(1.0), "pcs");

        let r = engine
            .compute_new_value(&entity, &UpdateRequest::receive("S1", 3.0, today(), "bosun"))
            .unwrap();
        assert_eq!(r.cumulative, 8.0);

        let r = engine
            .compute_new_value(&entity, &UpdateRequest::consume("S1", 7.0, today(), "bosun"))
            .unwrap();
        assert_eq!(r.cumulative, -2.0); // rejected later by the validator
    }

    #[test]
    fn test_meter_replacement_independent_of_mode() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::running_hours("E1", 1000.0);

        for mode in [UpdateMode::SetTotal, UpdateMode::AddDelta] {
            let req = UpdateRequest::new("E1", mode, 50.0, today(), "chief")
                .with_meter_replacement(1020.0, Some(0.0));

            let r = engine.compute_new_value(&entity, &req).unwrap();

            assert_eq!(r.cumulative, 1050.0, "mode {:?}", mode);
            assert!(r.is_meter_replacement());
        }
    }

    #[test]
    fn test_meter_replacement_keeps_raw_value() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::running_hours("E1", 1000.0);
        let req = UpdateRequest::reading("E1", 120.0, today(), "chief")
            .with_meter_replacement(1015.0, Some(100.0));

        let r = engine.compute_new_value(&entity, &req).unwrap();

        assert_eq!(r.raw_new, 120.0);
        assert_eq!(r.cumulative, 1020.0);
        assert_eq!(
            r.branch,
            ReconciliationBranch::MeterReplacement {
                old_meter_final: 1015.0,
                new_meter_start: 100.0,
            }
        );
    }

    #[test]
    fn test_stock_ignores_meter_flag() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::stock("S1", 5.0, None, "ltr");
        let mut req = UpdateRequest::consume("S1", 2.0, today(), "bosun");
        req.meter_replaced = true;

        let r = engine.compute_new_value(&entity, &req).unwrap();

        assert_eq!(entity.kind, EntityKind::Stock);
        assert_eq!(r.cumulative, 3.0);
        assert_eq!(r.branch, ReconciliationBranch::Direct);
    }

    #[test]
    fn test_malformed_input() {
        let engine = ReconciliationEngine::new();
        let entity = TrackedEntity::running_hours("E1", 10.0);

        let mut req = UpdateRequest::reading("E1", 20.0, today(), "chief");
        req.input_value = None;
        assert_eq!(
            engine.compute_new_value(&entity, &req),
            Err(UpdateError::MissingField("input_value"))
        );

        req.input_value = Some(f64::NAN);
        assert!(matches!(
            engine.compute_new_value(&entity, &req),
            Err(UpdateError::InvalidNumber { field: "input_value", .. })
        ));

        let mut req = UpdateRequest::reading("E1", 20.0, today(), "chief");
        req.meter_replaced = true;
        assert_eq!(
            engine.compute_new_value(&entity, &req),
            Err(UpdateError::MissingMeterFields)
        );
    }
}
