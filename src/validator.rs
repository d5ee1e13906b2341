// ✅ Update Validator - Pure policy checks on one proposed update
//
// Rules, in order:
//   required fields → future date → meter fields → numbers →
//   decrease without reset (hour meters) → insufficient stock (stock) →
//   negative total (hour meters after a reset)
//
// Core business rule: hours cannot go backwards except through an explicit,
// recorded meter replacement; stock can go down but never below zero.

use crate::entity::{EntityKind, TrackedEntity, UpdateRequest};
use crate::error::UpdateError;
use crate::reconciliation::{Reconciled, ReconciliationEngine};
use chrono::NaiveDate;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Accepted; carries the reconciled values so callers need not recompute
    Valid(Reconciled),
    Invalid(UpdateError),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn into_result(self) -> Result<Reconciled, UpdateError> {
        match self {
            ValidationResult::Valid(r) => Ok(r),
            ValidationResult::Invalid(e) => Err(e),
        }
    }
}

// ============================================================================
// UPDATE VALIDATOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateValidator {
    engine: ReconciliationEngine,
}

impl UpdateValidator {
    pub fn new() -> Self {
        UpdateValidator {
            engine: ReconciliationEngine::new(),
        }
    }

    /// Validate `request` against a snapshot of `entity`, with `today` being
    /// the vessel-local date.
    pub fn validate(
        &self,
        entity: &TrackedEntity,
        request: &UpdateRequest,
        today: NaiveDate,
    ) -> ValidationResult {
        match self.check(entity, request, today) {
            Ok(reconciled) => ValidationResult::Valid(reconciled),
            Err(err) => ValidationResult::Invalid(err),
        }
    }

    fn check(
        &self,
        entity: &TrackedEntity,
        request: &UpdateRequest,
        today: NaiveDate,
    ) -> Result<Reconciled, UpdateError> {
        if request.entity_id.trim().is_empty() {
            return Err(UpdateError::MissingField("entity_id"));
        }
        if request.actor_id.trim().is_empty() {
            return Err(UpdateError::MissingField("actor_id"));
        }

        // No future-dated entries
        if request.effective_date_local > today {
            return Err(UpdateError::FutureDate {
                effective: request.effective_date_local,
                today,
            });
        }

        // A replaced meter needs its final reading
        let resets_meter = request.meter_replaced && entity.kind.has_meter();
        if resets_meter && request.old_meter_final.is_none() {
            return Err(UpdateError::MissingMeterFields);
        }

        // Deltas may be negative; only the resulting total is checked
        let reconciled = self.engine.compute_new_value(entity, request)?;

        match entity.kind {
            EntityKind::RunningHours => {
                // Hours only go up unless the meter was swapped
                if !resets_meter && reconciled.cumulative < entity.current_value {
                    return Err(UpdateError::DecreaseWithoutReset {
                        current: entity.current_value,
                        attempted: reconciled.cumulative,
                    });
                }
                if reconciled.cumulative < 0.0 {
                    return Err(UpdateError::NegativeTotal {
                        attempted: reconciled.cumulative,
                    });
                }
            }
            EntityKind::Stock => {
                // Cannot consume more than is on board
                if reconciled.cumulative < 0.0 {
                    return Err(UpdateError::InsufficientStock {
                        on_hand: entity.current_value,
                        attempted: reconciled.cumulative,
                    });
                }
            }
        }

        Ok(reconciled)
    }
}

// ============================================================================
// TESTS
// ============================================================================
