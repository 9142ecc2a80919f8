//! Application configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`PAPERTRADE__SECTION__KEY`)
//! 2. Configuration file (TOML)
//! 3. Default values

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::decision::DecisionConfig;
use crate::execution::{LedgerConfig, MonitorConfig};
use crate::simulation::SessionConfig;
use crate::strategy::SignalConfig;
use crate::Result;

const ENV_PREFIX: &str = "PAPERTRADE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: String,
    pub candle_interval_secs: u64,
    pub candle_buffer_size: usize,
    pub ledger: LedgerConfig,
    pub monitor: MonitorConfig,
    pub signals: SignalConfig,
    pub decision: DecisionConfig,
    pub session: SessionConfig,
    pub database_url: Option<String>,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instrument: "SOL".to_string(),
            candle_interval_secs: 300,
            candle_buffer_size: 500,
            ledger: LedgerConfig::default(),
            monitor: MonitorConfig::default(),
            signals: SignalConfig::default(),
            decision: DecisionConfig::default(),
            session: SessionConfig::default(),
            database_url: None,
            log_filter: "papertrade=info".to_string(),
        }
    }
}

/// Load configuration from an optional TOML file and the environment
///
/// `.env` is read first so its values show up as environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(format!("Config file not found: {}", path).into());
        }
        builder = builder.add_source(File::with_name(path));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let app: AppConfig = config.try_deserialize()?;

    if app.ledger.capital_utilization <= 0.0 || app.ledger.capital_utilization > 1.0 {
        return Err(format!(
            "ledger.capital_utilization must be in (0, 1], got {}",
            app.ledger.capital_utilization
        )
        .into());
    }

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = load_config(None).unwrap();
        assert_eq!(config.ledger.fee_rate, 0.0004);
        assert_eq!(config.signals.max_signals, 3);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_temp(
            "papertrade-config",
            r#"
instrument = "JUP"

[ledger]
initial_balance = 2500.0

[signals]
cooldown_minutes = 45

[session]
leverage = 5.0
"#,
        );

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.instrument, "JUP");
        assert_eq!(config.ledger.initial_balance, 2500.0);
        assert_eq!(config.ledger.slippage_rate, 0.001); // untouched default
        assert_eq!(config.signals.cooldown_minutes, 45);
        assert_eq!(config.session.leverage, 5.0);
        assert_eq!(config.session.stop_pct, 2.0);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config(Some("/nonexistent/papertrade.toml")).is_err());
    }

    #[test]
    fn test_rejects_bad_utilization() {
        let path = write_temp("papertrade-bad", "[ledger]\ncapital_utilization = 1.5\n");
        assert!(load_config(path.to_str()).is_err());
        std::fs::remove_file(path).ok();
    }
}
