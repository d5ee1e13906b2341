// ⚙️ Configuration - Config as data
//
// Loaded from an optional JSON file, then overridden by environment:
//   FLEET_LEDGER_DB          database path
//   FLEET_LEDGER_UTC_OFFSET  vessel local offset in minutes (e.g. 330, -240)
//   FLEET_LEDGER_ADDR        server bind address
//   FLEET_LEDGER_LOG         tracing filter (RUST_LOG still wins)

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_path: PathBuf,

    /// Vessel local time offset from UTC, in minutes
    pub utc_offset_minutes: i32,

    pub server_addr: String,

    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("fleet-ledger.db"),
            utc_offset_minutes: 0,
            server_addr: "127.0.0.1:3000".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load config from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path))
    }

    /// File (if any) + environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (the process environment in practice).
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("FLEET_LEDGER_DB") {
            self.database_path = PathBuf::from(db);
        }

        if let Some(offset) = lookup("FLEET_LEDGER_UTC_OFFSET") {
            self.utc_offset_minutes = offset
                .trim()
                .parse()
                .with_context(|| format!("FLEET_LEDGER_UTC_OFFSET is not an integer: {:?}", offset))?;
        }

        if let Some(addr) = lookup("FLEET_LEDGER_ADDR") {
            self.server_addr = addr;
        }

        if let Some(filter) = lookup("FLEET_LEDGER_LOG") {
            self.log_filter = filter;
        }

        Ok(self)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // A second init (tests, embedding) is not an error worth surfacing
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"utc_offset_minutes": 330}"#).unwrap();

        assert_eq!(config.utc_offset_minutes, 330);
        assert_eq!(config.database_path, PathBuf::from("fleet-ledger.db"));
        assert_eq!(config.server_addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLEET_LEDGER_DB", "/data/vessel.db"),
            ("FLEET_LEDGER_UTC_OFFSET", " -240 "),
            ("FLEET_LEDGER_ADDR", "0.0.0.0:8080"),
        ]
        .into_iter()
        .collect();

        let config = LedgerConfig::default()
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/data/vessel.db"));
        assert_eq!(config.utc_offset_minutes, -240);
        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_bad_offset_is_an_error() {
        let result = LedgerConfig::default().apply_env(|k| {
            (k == "FLEET_LEDGER_UTC_OFFSET").then(|| "five".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(LedgerConfig::from_file(Path::new("/nonexistent/ledger.json")).is_err());
    }
}
