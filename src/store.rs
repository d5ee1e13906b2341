// 🗄️ Stores - Current values and the append-only audit log
//
// Two roles, usually played by one backend:
// - ValueStore: the latest cumulative value per entity (a cache of history)
// - AuditLog:   every accepted change, oldest first, never rewritten
//
// LedgerStore ties them together so a value commit and its audit record land
// together or not at all.

use crate::audit::AuditRecord;
use crate::entity::TrackedEntity;
use crate::error::StoreError;
use crate::temporal::DateRange;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

// ============================================================================
// TRAITS
// ============================================================================

pub trait ValueStore: Send + Sync {
    fn get(&self, entity_id: &str) -> Result<TrackedEntity, StoreError>;

    /// Replace current value and last-updated time of one entity.
    fn commit(&self, entity_id: &str, value: f64, updated_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Register a new entity; fails if the id is taken.
    fn insert(&self, entity: TrackedEntity) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<TrackedEntity>, StoreError>;
}

pub trait AuditLog: Send + Sync {
    /// Persist one record. Rejects ids not after the entity's last record.
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Records for one entity, oldest first, filtered on effective date.
    fn history(&self, entity_id: &str, range: &DateRange) -> Result<Vec<AuditRecord>, StoreError>;

    fn last_record(&self, entity_id: &str) -> Result<Option<AuditRecord>, StoreError>;

    /// Highest record id across all entities (0 when empty).
    fn max_record_id(&self) -> Result<i64, StoreError>;
}

pub trait LedgerStore: ValueStore + AuditLog {
    /// Commit the record's cumulative value and append the record as one unit.
    ///
    /// Readers never see the new value without its record. On error nothing
    /// has changed.
    fn commit_with_record(&self, previous: &TrackedEntity, record: &AuditRecord) -> Result<(), StoreError>;
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store backed by `RwLock`ed maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, TrackedEntity>>,
    records: RwLock<HashMap<String, Vec<AuditRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        let store = MemoryStore::new();
        if let Ok(mut map) = store.entities.write() {
            for entity in entities {
                map.insert(entity.entity_id.clone(), entity);
            }
        }
        store
    }

    pub fn record_count(&self) -> usize {
        self.records
            .read()
            .map(|m| m.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, entity_id: &str) -> Result<TrackedEntity, StoreError> {
        let map = self.entities.read().map_err(|_| StoreError::Poisoned)?;
        map.get(entity_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(entity_id.to_string()))
    }

    fn commit(&self, entity_id: &str, value: f64, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut map = self.entities.write().map_err(|_| StoreError::Poisoned)?;
        let entity = map
            .get_mut(entity_id)
            .ok_or_else(|| StoreError::NotFound(entity_id.to_string()))?;
        entity.current_value = value;
        entity.last_updated_at = updated_at;
        Ok(())
    }

    fn insert(&self, entity: TrackedEntity) -> Result<(), StoreError> {
        let mut map = self.entities.write().map_err(|_| StoreError::Poisoned)?;
        if map.contains_key(&entity.entity_id) {
            return Err(StoreError::AlreadyExists(entity.entity_id));
        }
        map.insert(entity.entity_id.clone(), entity);
        Ok(())
    }

    fn list(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        let map = self.entities.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<TrackedEntity> = map.values().cloned().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(all)
    }
}

impl AuditLog for MemoryStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut map = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let log = map.entry(record.entity_id.clone()).or_default();

        if let Some(last) = log.last() {
            if record.record_id <= last.record_id {
                return Err(StoreError::OutOfOrder {
                    entity_id: record.entity_id.clone(),
                    record_id: record.record_id,
                });
            }
        }

        log.push(record.clone());
        Ok(())
    }

    fn history(&self, entity_id: &str, range: &DateRange) -> Result<Vec<AuditRecord>, StoreError> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map
            .get(entity_id)
            .map(|log| {
                log.iter()
                    .filter(|r| range.contains(r.effective_date_local))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn last_record(&self, entity_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(entity_id).and_then(|log| log.last().cloned()))
    }

    fn max_record_id(&self) -> Result<i64, StoreError> {
        let map = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map
            .values()
            .filter_map(|log| log.last().map(|r| r.record_id))
            .max()
            .unwrap_or(0))
    }
}

impl LedgerStore for MemoryStore {
    fn commit_with_record(&self, _previous: &TrackedEntity, record: &AuditRecord) -> Result<(), StoreError> {
        // Lock order: entities, then records
        let mut entities = self.entities.write().map_err(|_| StoreError::Poisoned)?;
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;

        let entity = entities
            .get_mut(&record.entity_id)
            .ok_or_else(|| StoreError::NotFound(record.entity_id.clone()))?;

        let log = records.entry(record.entity_id.clone()).or_default();
        if let Some(last) = log.last() {
            if record.record_id <= last.record_id {
                return Err(StoreError::OutOfOrder {
                    entity_id: record.entity_id.clone(),
                    record_id: record.record_id,
                });
            }
        }

        entity.current_value = record.cumulative_value;
        entity.last_updated_at = record.entered_at_utc;
        log.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::entity::UpdateRequest;
    use crate::reconciliation::ReconciliationEngine;
    use chrono::NaiveDate;

    fn record_for(logger: &AuditLogger, entity: &TrackedEntity, hours: f64, day: u32) -> AuditRecord {
        let date = NaiveDate::from_ymd_opt(2025, 4, day).unwrap();
        let req = UpdateRequest::reading(&entity.entity_id, hours, date, "chief");
        let r = ReconciliationEngine::new().compute_new_value(entity, &req).unwrap();
        logger.record(entity, &req, &r, Utc::now(), None)
    }

    #[test]
    fn test_get_commit_insert() {
        let store = MemoryStore::new();
        store.insert(TrackedEntity::running_hours("E1", 100.0)).unwrap();

        assert!(matches!(
            store.insert(TrackedEntity::running_hours("E1", 0.0)),
            Err(StoreError::AlreadyExists(_))
        ));

        let now = Utc::now();
        store.commit("E1", 150.0, now).unwrap();

        let e1 = store.get("E1").unwrap();
        assert_eq!(e1.current_value, 150.0);
        assert_eq!(e1.last_updated_at, now);

        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.commit("nope", 1.0, now), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_append_only_ordering() {
        let store = MemoryStore::new();
        let logger = AuditLogger::new();
        let entity = TrackedEntity::running_hours("E1", 0.0);

        let first = record_for(&logger, &entity, 10.0, 1);
        let second = record_for(&logger, &entity, 20.0, 2);

        store.append(&first).unwrap();
        store.append(&second).unwrap();

        // Re-appending an older id is refused
        assert!(matches!(store.append(&first), Err(StoreError::OutOfOrder { .. })));
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.max_record_id().unwrap(), second.record_id);
        assert_eq!(store.last_record("E1").unwrap(), Some(second));
    }

    #[test]
    fn test_history_range_filter() {
        let store = MemoryStore::new();
        let logger = AuditLogger::new();
        let entity = TrackedEntity::running_hours("E1", 0.0);

        for (hours, day) in [(10.0, 1), (20.0, 5), (30.0, 9)] {
            store.append(&record_for(&logger, &entity, hours, day)).unwrap();
        }

        let d = |day| NaiveDate::from_ymd_opt(2025, 4, day).unwrap();
        let mid = store.history("E1", &DateRange::between(d(2), d(9))).unwrap();
        assert_eq!(mid.len(), 2);
        assert_eq!(mid[0].new_value, 20.0);

        assert!(store.history("E2", &DateRange::all()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_with_record_is_all_or_nothing() {
        let store = MemoryStore::with_entities([TrackedEntity::running_hours("E1", 100.0)]);
        let logger = AuditLogger::new();
        let before = store.get("E1").unwrap();

        let ok = record_for(&logger, &before, 120.0, 3);
        store.commit_with_record(&before, &ok).unwrap();
        assert_eq!(store.get("E1").unwrap().current_value, 120.0);
        assert_eq!(store.get("E1").unwrap().last_updated_at, ok.entered_at_utc);

        // Same record id again: refused, value and log untouched
        let before = store.get("E1").unwrap();
        let mut stale = ok.clone();
        stale.cumulative_value = 500.0;
        assert!(matches!(
            store.commit_with_record(&before, &stale),
            Err(StoreError::OutOfOrder { .. })
        ));
        assert_eq!(store.get("E1").unwrap(), before);
        assert_eq!(store.record_count(), 1);

        // Unknown entity: no orphan record is left behind
        let ghost = TrackedEntity::running_hours("E2", 0.0);
        let orphan = record_for(&logger, &ghost, 5.0, 4);
        assert!(matches!(
            store.commit_with_record(&ghost, &orphan),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.record_count(), 1);
        assert!(store.last_record("E2").unwrap().is_none());
    }

    #[test]
    fn test_readers_never_see_value_without_record() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::with_entities([TrackedEntity::stock("S1", 0.0, None, "pcs")]));
        let logger = Arc::new(AuditLogger::new());

        let writer = {
            let store = Arc::clone(&store);
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for _ in 0..200 {
                    let entity = store.get("S1").unwrap();
                    let req = UpdateRequest::receive("S1", 1.0, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "bosun");
                    let r = ReconciliationEngine::new().compute_new_value(&entity, &req).unwrap();
                    let record = logger.record(&entity, &req, &r, Utc::now(), None);
                    store.commit_with_record(&entity, &record).unwrap();
                }
            })
        };

        for _ in 0..200 {
            // Read the value first: its record must already be in the log
            let value = store.get("S1").unwrap().current_value;
            let logged = store.last_record("S1").unwrap().map_or(0.0, |r| r.cumulative_value);
            assert!(logged >= value, "value {} ahead of log {}", value, logged);
        }

        writer.join().unwrap();
        assert_eq!(store.record_count(), 200);
    }
}
