// Fleet Ledger - Command line
//
// Every subcommand opens the SQLite ledger named by the config, does one
// thing, and prints a short human summary (or JSON with --json).

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use fleet_ledger::{
    handle_bulk, handle_update, init_tracing, load_csv, BulkProcessor, BulkRequest, CommonFields,
    DateRange, EntityKind, Ledger, LedgerConfig, RegisterEntity, RowStatus, SqliteStore,
    SystemClock, UpdateInput, UpdateMode,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fleet-ledger")]
#[command(about = "Running hours and stock ledger", long_about = None)]
struct Cli {
    /// JSON config file (env vars still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides config and FLEET_LEDGER_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    RunningHours,
    Stock,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    SetTotal,
    AddDelta,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Register a component hour meter or a stock item
    Register {
        entity_id: String,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value_t = 0.0)]
        value: f64,
        /// Reorder level (stock only)
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        unit: Option<String>,
    },

    /// Submit one reading or stock movement
    Update {
        entity_id: String,
        #[arg(long, value_enum, default_value = "set-total")]
        mode: ModeArg,
        /// Number as entered; negative deltas consume stock
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        /// Effective date (YYYY-MM-DD), vessel local; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value_t = false)]
        meter_replaced: bool,
        #[arg(long)]
        old_meter_final: Option<String>,
        #[arg(long)]
        new_meter_start: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },

    /// Apply a batch of rows from a JSON body or a CSV sheet
    Bulk {
        /// JSON file shaped like {"rows": [...], "common": {...}}
        #[arg(long, conflicts_with = "csv")]
        input: Option<PathBuf>,
        /// CSV sheet with a header row
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Common fields applied to every row (override row values)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Audit history of one entity, oldest first
    History {
        entity_id: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Current value of one entity, or all of them
    Show { entity_id: Option<String> },

    /// Replay history and check the hash chain
    Verify { entity_id: Option<String> },

    /// Stock items under their reorder level
    LowStock,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }
    init_tracing(&config.log_filter);

    if let Commands::Init = cli.cmd {
        println!("🔧 Setting up database...");
        SqliteStore::open(&config.database_path)?;
        println!("✓ Database initialized with WAL mode at {:?}", config.database_path);
        return Ok(());
    }

    let ledger = open_ledger(&config)?;
    run(&ledger, cli.cmd, cli.json)
}

fn open_ledger(config: &LedgerConfig) -> Result<Ledger<SqliteStore>> {
    let store = SqliteStore::open(&config.database_path)?;
    let clock = Arc::new(SystemClock::from_offset_minutes(config.utc_offset_minutes));
    Ledger::new(store, clock).context("Failed to resume audit sequence")
}

fn run(ledger: &Ledger<SqliteStore>, cmd: Commands, json: bool) -> Result<()> {
    match cmd {
        Commands::Init => Ok(()),

        Commands::Register { entity_id, kind, value, min, unit } => {
            let entity = RegisterEntity {
                entity_id,
                kind: match kind {
                    KindArg::RunningHours => EntityKind::RunningHours,
                    KindArg::Stock => EntityKind::Stock,
                },
                current_value: value,
                minimum_threshold: min,
                unit,
            }
            .into_entity();

            let id = entity.entity_id.clone();
            ledger.register(entity)?;
            println!("✅ Registered {}", id);
            Ok(())
        }

        Commands::Update {
            entity_id,
            mode,
            value,
            date,
            actor,
            meter_replaced,
            old_meter_final,
            new_meter_start,
            notes,
            location,
        } => {
            let mode = match mode {
                ModeArg::SetTotal => UpdateMode::SetTotal,
                ModeArg::AddDelta => UpdateMode::AddDelta,
            };
            let mut input =
                UpdateInput::new(&entity_id, mode, Some(value.as_str().into())).with_actor(&actor);
            input.effective_date_local = date.map(Into::into);
            input.meter_replaced = meter_replaced;
            input.old_meter_final = old_meter_final.map(|v| v.as_str().into());
            input.new_meter_start = new_meter_start.map(|v| v.as_str().into());
            input.notes = notes;
            input.location = location;

            let response = handle_update(ledger, input);
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.success {
                println!(
                    "✅ {} = {} (record {})",
                    entity_id,
                    response.cumulative_value.unwrap_or_default(),
                    response.record_id.unwrap_or_default()
                );
            } else {
                eprintln!(
                    "❌ {}: {}",
                    response.error_code.map(|c| c.to_string()).unwrap_or_default(),
                    response.message.unwrap_or_default()
                );
            }

            if !response.success {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Bulk { input, csv, date, actor, location, notes } => {
            let common = CommonFields {
                effective_date_local: date,
                location,
                notes,
                actor_id: actor,
            };

            let report = match (input, csv) {
                (Some(path), None) => {
                    let body = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {:?}", path))?;
                    let mut request = serde_json::from_str::<BulkRequest>(&body)
                        .with_context(|| format!("Failed to parse bulk JSON: {:?}", path))?;
                    merge_common(&mut request.common, common);

                    println!("📦 Processing {} rows...", request.rows.len());
                    handle_bulk(ledger, request)
                }
                (None, Some(path)) => {
                    let rows = load_csv(&path)?;
                    println!("📦 Processing {} rows...", rows.len());
                    BulkProcessor::new(ledger).process_batch(rows, &common)
                }
                _ => bail!("Pass exactly one of --input or --csv"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            for row in &report.rows {
                match row.status {
                    RowStatus::Success => println!(
                        "  ✓ [{}] {} = {}",
                        row.index,
                        row.entity_id,
                        row.cumulative_value.unwrap_or_default()
                    ),
                    RowStatus::Skipped => println!("  · [{}] {} skipped", row.index, row.entity_id),
                    RowStatus::Failed => println!(
                        "  ✗ [{}] {} {}: {}",
                        row.index,
                        row.entity_id,
                        row.error_code.map(|c| c.to_string()).unwrap_or_default(),
                        row.reason.as_deref().unwrap_or("")
                    ),
                }
            }

            let s = report.summary;
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!(
                "Batch {}: {} ok, {} skipped, {} failed ({} total)",
                report.batch_id, s.succeeded, s.skipped, s.failed, s.total
            );
            Ok(())
        }

        Commands::History { entity_id, from, to } => {
            let range = DateRange { from, to };
            let history = ledger.history(&entity_id, &range)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
                return Ok(());
            }

            println!("📜 {} ({} records)", entity_id, history.len());
            for r in &history {
                let marker = if r.meter_replaced { " 🔁 meter replaced" } else { "" };
                println!(
                    "  {} #{} {} → {} by {} [{}]{}",
                    r.effective_date_local,
                    r.record_id,
                    r.previous_value,
                    r.cumulative_value,
                    r.actor_id,
                    r.source.as_str(),
                    marker
                );
            }
            Ok(())
        }

        Commands::Show { entity_id } => {
            let entities = match entity_id {
                Some(id) => vec![ledger.entity(&id)?],
                None => ledger.entities()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entities)?);
                return Ok(());
            }

            for e in &entities {
                let flag = if e.is_below_minimum() { " ⚠️ below minimum" } else { "" };
                println!("  {:<20} {:>12} {}{}", e.entity_id, e.current_value, e.unit, flag);
            }
            Ok(())
        }

        Commands::Verify { entity_id } => {
            let ids = match entity_id {
                Some(id) => vec![id],
                None => ledger.entities()?.into_iter().map(|e| e.entity_id).collect(),
            };

            let mut all_intact = true;
            for id in ids {
                let report = ledger.verify(&id)?;
                all_intact &= report.is_intact();
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    let icon = if report.is_intact() { "✅" } else { "❌" };
                    println!("{} {}", icon, report.summary());
                }
            }

            if !all_intact {
                bail!("Integrity check failed");
            }
            Ok(())
        }

        Commands::LowStock => {
            let low = ledger.low_stock()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&low)?);
                return Ok(());
            }

            if low.is_empty() {
                println!("✓ All stock at or above minimum");
            }
            for e in &low {
                println!(
                    "  ⚠️ {:<20} {} {} (min {})",
                    e.entity_id,
                    e.current_value,
                    e.unit,
                    e.minimum_threshold.unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

/// Command-line common fields win over the ones in a JSON body.
fn merge_common(target: &mut CommonFields, cli: CommonFields) {
    if cli.effective_date_local.is_some() {
        target.effective_date_local = cli.effective_date_local;
    }
    if cli.location.is_some() {
        target.location = cli.location;
    }
    if cli.notes.is_some() {
        target.notes = cli.notes;
    }
    if cli.actor_id.is_some() {
        target.actor_id = cli.actor_id;
    }
}
