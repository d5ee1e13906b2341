// 🧭 Ledger Service - validate → reconcile → commit → audit, one entity at a time
//
// The ledger is the single write path. Each update runs under a per-entity
// lock so the "previous value" it reconciles against cannot change underneath
// it; different entities proceed independently.

use crate::audit::{AuditLogger, AuditRecord, History, IntegrityReport};
use crate::entity::{TrackedEntity, UpdateRequest, UpdateSource};
use crate::error::{StoreError, UpdateError};
use crate::store::LedgerStore;
use crate::temporal::{Clock, DateRange};
use crate::validator::UpdateValidator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// PER-ENTITY LOCKS
// ============================================================================

#[derive(Debug, Default)]
struct EntityLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    fn handle(&self, entity_id: &str) -> Result<Arc<Mutex<()>>, UpdateError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| UpdateError::Storage("entity lock table poisoned".to_string()))?;
        Ok(Arc::clone(map.entry(entity_id.to_string()).or_default()))
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger<S: LedgerStore> {
    store: S,
    validator: UpdateValidator,
    logger: AuditLogger,
    clock: Arc<dyn Clock>,
    locks: EntityLocks,
}

impl<S: LedgerStore> Ledger<S> {
    /// Record ids continue after whatever the store already holds.
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let last = store.max_record_id()?;
        Ok(Ledger {
            store,
            validator: UpdateValidator::new(),
            logger: AuditLogger::resume(last),
            clock,
            locks: EntityLocks::default(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Register a new tracked entity with its opening value.
    pub fn register(&self, entity: TrackedEntity) -> Result<(), UpdateError> {
        if entity.entity_id.trim().is_empty() {
            return Err(UpdateError::MissingField("entity_id"));
        }
        if !entity.current_value.is_finite() {
            return Err(UpdateError::InvalidNumber {
                field: "current_value",
                raw: entity.current_value.to_string(),
            });
        }
        if entity.current_value < 0.0 {
            return Err(UpdateError::NegativeTotal {
                attempted: entity.current_value,
            });
        }

        info!(entity_id = %entity.entity_id, kind = entity.kind.as_str(), value = entity.current_value, "registered entity");
        self.store
            .insert(entity)
            .map_err(|e| UpdateError::Storage(e.to_string()))
    }

    pub fn entity(&self, entity_id: &str) -> Result<TrackedEntity, UpdateError> {
        Ok(self.store.get(entity_id)?)
    }

    pub fn entities(&self) -> Result<Vec<TrackedEntity>, UpdateError> {
        Ok(self.store.list()?)
    }

    /// Stock items under their reorder level.
    pub fn low_stock(&self) -> Result<Vec<TrackedEntity>, UpdateError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(TrackedEntity::is_below_minimum)
            .collect())
    }

    // ------------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------------

    /// Single-update path: tags the request as `single` and applies it.
    pub fn update(&self, mut request: UpdateRequest) -> Result<AuditRecord, UpdateError> {
        request.source = UpdateSource::Single;
        request.batch_id = None;
        self.apply(&request)
    }

    /// Validate, reconcile, commit and audit one request.
    ///
    /// Either the value and its audit record are both stored, or neither is.
    pub fn apply(&self, request: &UpdateRequest) -> Result<AuditRecord, UpdateError> {
        if request.entity_id.trim().is_empty() {
            return Err(UpdateError::MissingField("entity_id"));
        }

        let lock = self.locks.handle(&request.entity_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| UpdateError::Storage(format!("lock for {} poisoned", request.entity_id)))?;

        let entity = self.store.get(&request.entity_id)?;
        let today = self.clock.today_local();

        let reconciled = match self.validator.validate(&entity, request, today).into_result() {
            Ok(r) => r,
            Err(err) => {
                warn!(
                    entity_id = %request.entity_id,
                    code = %err.code(),
                    source = request.source.as_str(),
                    "update rejected: {}",
                    err
                );
                return Err(err);
            }
        };

        let previous_digest = self.store.last_record(&entity.entity_id)?.map(|r| r.digest);
        let record = self.logger.record(
            &entity,
            request,
            &reconciled,
            self.clock.now_utc(),
            previous_digest,
        );

        self.store.commit_with_record(&entity, &record)?;

        info!(
            entity_id = %record.entity_id,
            record_id = record.record_id,
            previous = record.previous_value,
            cumulative = record.cumulative_value,
            meter_replaced = record.meter_replaced,
            actor = %record.actor_id,
            source = record.source.as_str(),
            "update committed"
        );

        Ok(record)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    pub fn history(&self, entity_id: &str, range: &DateRange) -> Result<History, UpdateError> {
        // Unknown ids are an error, not an empty history
        self.store.get(entity_id)?;

        let records = self.store.history(entity_id, range)?;
        debug!(entity_id, count = records.len(), "history query");
        Ok(History::new(entity_id, *range, records))
    }

    /// Replay the full history and compare it with the cached value.
    pub fn verify(&self, entity_id: &str) -> Result<IntegrityReport, UpdateError> {
        // Hold the entity lock so cache and history are read at the same point
        let lock = self.locks.handle(entity_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| UpdateError::Storage(format!("lock for {} poisoned", entity_id)))?;

        let entity = self.store.get(entity_id)?;
        let history = History::new(entity_id, DateRange::all(), self.store.history(entity_id, &DateRange::all())?);
        let report = IntegrityReport::from_history(&entity, &history, 0.0);

        if !report.is_intact() {
            warn!(entity_id, "{}", report.summary());
        }
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::entity::UpdateMode;
    use crate::error::ErrorCode;
    use crate::store::{MemoryStore, ValueStore};
    use crate::temporal::FixedClock;
    use chrono::NaiveDate;
    use std::thread;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn ledger_with(entities: Vec<TrackedEntity>) -> Ledger<MemoryStore> {
        Ledger::new(MemoryStore::with_entities(entities), Arc::new(FixedClock::on(today()))).unwrap()
    }

    #[test]
    fn test_same_total_noop_is_recorded() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 12580.0)]);

        let record = ledger
            .update(UpdateRequest::reading("E1", 12580.0, today(), "chief"))
            .unwrap();

        assert_eq!(record.previous_value, 12580.0);
        assert_eq!(record.new_value, 12580.0);
        assert_eq!(record.cumulative_value, 12580.0);
        assert_eq!(ledger.entity("E1").unwrap().current_value, 12580.0);
        assert_eq!(ledger.history("E1", &DateRange::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_update_leaves_store_untouched() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 12580.0)]);
        let before = ledger.entity("E1").unwrap();

        let err = ledger
            .update(UpdateRequest::new("E1", UpdateMode::AddDelta, -50.0, today(), "chief"))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::DecreaseWithoutReset);
        assert_eq!(ledger.entity("E1").unwrap(), before);
        assert!(ledger.history("E1", &DateRange::all()).unwrap().is_empty());
    }

    #[test]
    fn test_hours_never_drop_even_slightly() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 100.0)]);

        for hours in [100.0 - 5e-10, 99.2] {
            let err = ledger
                .update(UpdateRequest::reading("E1", hours, today(), "chief"))
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::DecreaseWithoutReset);
        }

        assert_eq!(ledger.entity("E1").unwrap().current_value, 100.0);
        assert!(ledger.history("E1", &DateRange::all()).unwrap().is_empty());
    }

    #[test]
    fn test_consume_more_than_on_board() {
        let ledger = ledger_with(vec![TrackedEntity::stock("S1", 5.0, Some(1.0), "pcs")]);

        let err = ledger
            .update(UpdateRequest::consume("S1", 7.0, today(), "bosun"))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InsufficientStock);
        assert_eq!(ledger.entity("S1").unwrap().current_value, 5.0);
    }

    #[test]
    fn test_meter_replacement_scenario() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 1000.0)]);

        let record = ledger
            .update(
                UpdateRequest::new("E1", UpdateMode::AddDelta, 50.0, today(), "chief")
                    .with_meter_replacement(1010.0, Some(0.0)),
            )
            .unwrap();

        assert_eq!(record.cumulative_value, 1050.0);
        assert!(record.meter_replaced);
        assert_eq!(ledger.entity("E1").unwrap().current_value, 1050.0);
    }

    #[test]
    fn test_unknown_entity() {
        let ledger = ledger_with(vec![]);

        let err = ledger
            .update(UpdateRequest::reading("E404", 1.0, today(), "chief"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);

        assert_eq!(
            ledger.history("E404", &DateRange::all()).unwrap_err().code(),
            ErrorCode::EntityNotFound
        );
    }

    #[test]
    fn test_history_in_commit_order_and_monotonic() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 0.0)]);
        let readings = [10.0, 10.0, 24.5, 30.0, 31.0];

        let mut last = 0.0;
        for hours in readings {
            ledger
                .update(UpdateRequest::reading("E1", hours, today(), "chief"))
                .unwrap();
            let now = ledger.entity("E1").unwrap().current_value;
            assert!(now >= last);
            last = now;
        }

        let history = ledger.history("E1", &DateRange::all()).unwrap();
        let values: Vec<f64> = history.iter().map(|r| r.cumulative_value).collect();
        assert_eq!(values, readings.to_vec());

        let ids: Vec<i64> = history.iter().map(|r| r.record_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let report = ledger.verify("E1").unwrap();
        assert!(report.is_intact(), "{}", report.summary());
    }

    #[test]
    fn test_verify_detects_stale_cache() {
        let ledger = ledger_with(vec![TrackedEntity::running_hours("E1", 0.0)]);
        ledger
            .update(UpdateRequest::reading("E1", 40.0, today(), "chief"))
            .unwrap();

        // Someone writes the cache without going through the ledger
        ledger
            .store()
            .commit("E1", 45.0, chrono::Utc::now())
            .unwrap();

        let report = ledger.verify("E1").unwrap();
        assert!(!report.cache_consistent());
        assert_eq!(report.replayed_value, Some(40.0));
    }

    #[test]
    fn test_register_rules() {
        let ledger = ledger_with(vec![]);

        ledger.register(TrackedEntity::stock("S1", 3.0, Some(5.0), "pcs")).unwrap();
        assert_eq!(
            ledger.register(TrackedEntity::stock("S1", 3.0, None, "pcs")).unwrap_err().code(),
            ErrorCode::StorageFailure
        );
        assert_eq!(
            ledger.register(TrackedEntity::stock("S2", -1.0, None, "pcs")).unwrap_err().code(),
            ErrorCode::NegativeTotal
        );

        let low = ledger.low_stock().unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].entity_id, "S1");
    }

    #[test]
    fn test_concurrent_updates_same_entity_serialize() {
        let ledger = Arc::new(ledger_with(vec![TrackedEntity::stock("S1", 0.0, None, "ltr")]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..25 {
                        ledger
                            .update(UpdateRequest::receive("S1", 1.0, today(), "bosun"))
                            .unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.entity("S1").unwrap().current_value, 100.0);

        let history = ledger.history("S1", &DateRange::all()).unwrap();
        assert_eq!(history.len(), 100);
        assert!(history.continuity_gaps(1e-9).is_empty());
        assert!(history.broken_links().is_empty());
    }

    #[test]
    fn test_sqlite_ledger_resumes_record_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(TrackedEntity::running_hours("E1", 0.0)).unwrap();

        let ledger = Ledger::new(store, Arc::new(FixedClock::on(today()))).unwrap();
        let first = ledger
            .update(UpdateRequest::reading("E1", 5.0, today(), "chief"))
            .unwrap();

        // A fresh ledger over the same store keeps counting upwards
        let Ledger { store, clock, .. } = ledger;
        let ledger = Ledger::new(store, clock).unwrap();
        let second = ledger
            .update(UpdateRequest::reading("E1", 6.0, today(), "chief"))
            .unwrap();

        assert!(second.record_id > first.record_id);
        assert_eq!(second.previous_digest.as_deref(), Some(first.digest.as_str()));
        assert!(ledger.verify("E1").unwrap().is_intact());
    }
}
