use crate::audit::AuditRecord;
use crate::entity::{EntityKind, TrackedEntity, UpdateSource};
use crate::error::StoreError;
use crate::store::{AuditLog, LedgerStore, ValueStore};
use crate::temporal::DateRange;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed ledger store.
///
/// One connection behind a mutex; commit + audit append run in a single SQL
/// transaction, and triggers refuse UPDATE/DELETE on audit rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Tracked entities (current snapshot, one row per entity)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracked_entities (
            entity_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            current_value REAL NOT NULL CHECK (current_value >= 0),
            minimum_threshold REAL,
            last_updated_at TEXT NOT NULL,
            unit TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Audit records (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_records (
            entity_id TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            previous_value REAL NOT NULL,
            new_value REAL NOT NULL,
            cumulative_value REAL NOT NULL,
            effective_date_local TEXT NOT NULL,
            entered_at_utc TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            source TEXT NOT NULL,
            notes TEXT,
            meter_replaced INTEGER NOT NULL,
            old_meter_final REAL,
            new_meter_start REAL,
            location TEXT,
            batch_id TEXT,
            previous_digest TEXT,
            digest TEXT NOT NULL,
            PRIMARY KEY (entity_id, record_id)
        )",
        [],
    )?;

    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS audit_records_no_update
            BEFORE UPDATE ON audit_records
            BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;
         CREATE TRIGGER IF NOT EXISTS audit_records_no_delete
            BEFORE DELETE ON audit_records
            BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;",
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_effective ON audit_records(entity_id, effective_date_local)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_record_id ON audit_records(record_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

const ENTITY_COLUMNS: &str =
    "entity_id, kind, current_value, minimum_threshold, last_updated_at, unit";

const RECORD_COLUMNS: &str = "entity_id, record_id, previous_value, new_value, cumulative_value,
     effective_date_local, entered_at_utc, actor_id, source, notes,
     meter_replaced, old_meter_final, new_meter_start, location, batch_id,
     previous_digest, digest";

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {:?}: {}", s, e)))
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedEntity> {
    let kind_str: String = row.get(1)?;
    let updated_str: String = row.get(4)?;

    Ok(TrackedEntity {
        entity_id: row.get(0)?,
        kind: EntityKind::parse(&kind_str)
            .ok_or_else(|| conversion_error(1, format!("unknown kind {:?}", kind_str)))?,
        current_value: row.get(2)?,
        minimum_threshold: row.get(3)?,
        last_updated_at: parse_timestamp(4, &updated_str)?,
        unit: row.get(5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let effective_str: String = row.get(5)?;
    let entered_str: String = row.get(6)?;
    let source_str: String = row.get(8)?;
    let batch_str: Option<String> = row.get(14)?;

    let batch_id = match batch_str {
        Some(s) => Some(
            uuid::Uuid::parse_str(&s)
                .map_err(|e| conversion_error(14, format!("bad batch id {:?}: {}", s, e)))?,
        ),
        None => None,
    };

    Ok(AuditRecord {
        entity_id: row.get(0)?,
        record_id: row.get(1)?,
        previous_value: row.get(2)?,
        new_value: row.get(3)?,
        cumulative_value: row.get(4)?,
        effective_date_local: NaiveDate::parse_from_str(&effective_str, "%Y-%m-%d")
            .map_err(|e| conversion_error(5, format!("bad date {:?}: {}", effective_str, e)))?,
        entered_at_utc: parse_timestamp(6, &entered_str)?,
        actor_id: row.get(7)?,
        source: UpdateSource::parse(&source_str)
            .ok_or_else(|| conversion_error(8, format!("unknown source {:?}", source_str)))?,
        notes: row.get(9)?,
        meter_replaced: row.get(10)?,
        old_meter_final: row.get(11)?,
        new_meter_start: row.get(12)?,
        location: row.get(13)?,
        batch_id,
        previous_digest: row.get(15)?,
        digest: row.get(16)?,
    })
}

/// Insert one audit row after checking it extends the entity's log.
fn insert_record(conn: &Connection, record: &AuditRecord) -> Result<(), StoreError> {
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(record_id) FROM audit_records WHERE entity_id = ?1",
        params![record.entity_id],
        |row| row.get(0),
    )?;

    if last.map_or(false, |last| record.record_id <= last) {
        return Err(StoreError::OutOfOrder {
            entity_id: record.entity_id.clone(),
            record_id: record.record_id,
        });
    }

    conn.execute(
        &format!(
            "INSERT INTO audit_records ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            RECORD_COLUMNS
        ),
        params![
            record.entity_id,
            record.record_id,
            record.previous_value,
            record.new_value,
            record.cumulative_value,
            record.effective_date_local.format("%Y-%m-%d").to_string(),
            record.entered_at_utc.to_rfc3339(),
            record.actor_id,
            record.source.as_str(),
            record.notes,
            record.meter_replaced,
            record.old_meter_final,
            record.new_meter_start,
            record.location,
            record.batch_id.map(|b| b.to_string()),
            record.previous_digest,
            record.digest,
        ],
    )?;

    Ok(())
}

fn update_value(
    conn: &Connection,
    entity_id: &str,
    value: f64,
    updated_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE tracked_entities SET current_value = ?1, last_updated_at = ?2 WHERE entity_id = ?3",
        params![value, updated_at.to_rfc3339(), entity_id],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound(entity_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// Store implementations
// ============================================================================

impl ValueStore for SqliteStore {
    fn get(&self, entity_id: &str) -> Result<TrackedEntity, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM tracked_entities WHERE entity_id = ?1", ENTITY_COLUMNS),
            params![entity_id],
            entity_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(entity_id.to_string()))
    }

    fn commit(&self, entity_id: &str, value: f64, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        update_value(&conn, entity_id, value, updated_at)
    }

    fn insert(&self, entity: TrackedEntity) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO tracked_entities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                ENTITY_COLUMNS
            ),
            params![
                entity.entity_id,
                entity.kind.as_str(),
                entity.current_value,
                entity.minimum_threshold,
                entity.last_updated_at.to_rfc3339(),
                entity.unit,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::AlreadyExists(entity.entity_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tracked_entities ORDER BY entity_id",
            ENTITY_COLUMNS
        ))?;

        let entities = stmt
            .query_map([], entity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entities)
    }
}

impl AuditLog for SqliteStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_record(&conn, record)
    }

    fn history(&self, entity_id: &str, range: &DateRange) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_records
             WHERE entity_id = ?1
               AND (?2 IS NULL OR effective_date_local >= ?2)
               AND (?3 IS NULL OR effective_date_local <= ?3)
             ORDER BY record_id ASC",
            RECORD_COLUMNS
        ))?;

        let from = range.from.map(|d| d.format("%Y-%m-%d").to_string());
        let to = range.to.map(|d| d.format("%Y-%m-%d").to_string());

        let records = stmt
            .query_map(params![entity_id, from, to], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn last_record(&self, entity_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM audit_records WHERE entity_id = ?1
                     ORDER BY record_id DESC LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![entity_id],
                record_from_row,
            )
            .optional()?;

        Ok(record)
    }

    fn max_record_id(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let max: Option<i64> =
            conn.query_row("SELECT MAX(record_id) FROM audit_records", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }
}

impl LedgerStore for SqliteStore {
    fn commit_with_record(&self, _previous: &TrackedEntity, record: &AuditRecord) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        update_value(&tx, &record.entity_id, record.cumulative_value, record.entered_at_utc)?;
        insert_record(&tx, record)?;

        tx.commit()?;
        tracing::debug!(
            entity_id = %record.entity_id,
            record_id = record.record_id,
            "committed value and audit record"
        );
        Ok(())
    }
}
