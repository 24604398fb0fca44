use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "WardLedger";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// 50.00 in minor units.
const DEFAULT_CONSULTATION_FEE_CENTS: i64 = 5_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Cannot read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Cannot parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Default log filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "ward_ledger=info"
}

/// Get the application data directory
/// Platform local data dir + `WardLedger/`, or the working directory when
/// the platform has none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the default database path
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("ward_ledger.db")
}

/// Engine settings owned by the process bootstrap.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Fixed fee billed on every saved consultation.
    pub consultation_fee_cents: i64,
    pub invoice_prefix: String,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            consultation_fee_cents: DEFAULT_CONSULTATION_FEE_CENTS,
            invoice_prefix: "INV".into(),
            log_filter: default_log_filter().into(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `WARD_LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(path) = lookup("WARD_LEDGER_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("WARD_LEDGER_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "WARD_LEDGER_BUSY_TIMEOUT_MS",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("WARD_LEDGER_CONSULTATION_FEE_CENTS") {
            self.consultation_fee_cents =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "WARD_LEDGER_CONSULTATION_FEE_CENTS",
                    value: raw.clone(),
                })?;
        }
        if let Some(filter) = lookup("WARD_LEDGER_LOG") {
            self.log_filter = filter;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.consultation_fee_cents < 0 {
            return Err(ConfigError::InvalidValue {
                key: "consultation_fee_cents",
                value: self.consultation_fee_cents.to_string(),
            });
        }
        if self.invoice_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "invoice_prefix",
                value: self.invoice_prefix.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_bill_fifty_per_consultation() {
        let config = EngineConfig::default();
        assert_eq!(config.consultation_fee_cents, 5_000);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert!(config.database_path.ends_with("ward_ledger.db"));
    }

    #[test]
    fn env_overlay_overrides_values() {
        let config = EngineConfig::default()
            .overlay(lookup_from(&[
                ("WARD_LEDGER_DB", "/tmp/ledger.db"),
                ("WARD_LEDGER_CONSULTATION_FEE_CENTS", "7500"),
                ("WARD_LEDGER_LOG", "ward_ledger=debug"),
            ]))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.consultation_fee_cents, 7_500);
        assert_eq!(config.log_filter, "ward_ledger=debug");
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let result = EngineConfig::default()
            .overlay(lookup_from(&[("WARD_LEDGER_BUSY_TIMEOUT_MS", "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn negative_fee_is_rejected() {
        let result = EngineConfig::default()
            .overlay(lookup_from(&[("WARD_LEDGER_CONSULTATION_FEE_CENTS", "-1")]));
        assert!(result.is_err());
    }

    #[test]
    fn json_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"consultation_fee_cents": 6000}}"#).unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.consultation_fee_cents, 6_000);
        assert_eq!(config.invoice_prefix, "INV");
    }

    #[test]
    fn app_name_is_ward_ledger() {
        assert_eq!(APP_NAME, "WardLedger");
        assert!(app_data_dir().ends_with(APP_NAME));
    }
}
