// Fleet Ledger - Core Library
// Running hours and stock reconciliation with an append-only audit trail.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod error;
pub mod entity;
pub mod temporal;       // Clocks and vessel-local dates
pub mod reconciliation; // SET_TOTAL / ADD_DELTA / meter replacement
pub mod validator;
pub mod audit;          // Records, hash chain, history replay
pub mod store;
pub mod db;             // SQLite-backed LedgerStore
pub mod input;
pub mod service;
pub mod bulk;
pub mod api;
pub mod config;

// Re-export commonly used types
pub use error::{ErrorCode, StoreError, UpdateError};
pub use entity::{EntityKind, TrackedEntity, UpdateMode, UpdateRequest, UpdateSource};
pub use temporal::{Clock, DateRange, FixedClock, SystemClock};
pub use reconciliation::{Reconciled, ReconciliationBranch, ReconciliationEngine};
pub use validator::{UpdateValidator, ValidationResult};
pub use audit::{AuditLogger, AuditRecord, History, IntegrityReport, Sequencer};
pub use store::{AuditLog, LedgerStore, MemoryStore, ValueStore};
pub use db::SqliteStore;
pub use input::{
    load_csv, read_csv, CommonFields, DateInput, ModeInput, NumberInput, UnreadableRow, UpdateInput,
};
pub use service::Ledger;
pub use bulk::{BatchReport, BatchSummary, BulkProcessor, RowResult, RowStatus};
pub use api::{handle_bulk, handle_update, BulkRequest, RegisterEntity, UpdateResponse};
pub use config::{init_tracing, LedgerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
