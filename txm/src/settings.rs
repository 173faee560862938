use std::path::PathBuf;
use std::time::Duration;

use eyre::{eyre, Result};
use serde::Deserialize;

use txm_base::settings::{load_settings, TracingConfig};

use crate::dispatcher::DispatcherSettings;

/// Prefix of the environment variables overriding file settings
pub const ENV_PREFIX: &str = "TXM";

/// Channel producers publish to after an insert
pub const DEFAULT_NOTIFICATION_CHANNEL: &str = "insert_on_msg";

/// Settings of a transaction manager instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TxmSettings {
    /// Directory of the rocksdb message store
    pub db: PathBuf,
    /// Chain the manager submits to, used to scope storage and label metrics
    pub chain_id: String,
    pub poll_period_ms: u64,
    pub confirm_delay_ms: u64,
    pub confirm_attempts: u32,
    pub notification_channel: String,
    pub tracing: TracingConfig,
}

impl Default for TxmSettings {
    fn default() -> Self {
        Self {
            db: PathBuf::from("txm_db"),
            chain_id: "cosmos".to_owned(),
            poll_period_ms: 5_000,
            confirm_delay_ms: 1_000,
            confirm_attempts: 1,
            notification_channel: DEFAULT_NOTIFICATION_CHANNEL.to_owned(),
            tracing: TracingConfig::default(),
        }
    }
}

impl TxmSettings {
    /// Load from `TXM_CONFIG_FILE` and `TXM_*` environment variables
    pub fn load() -> Result<Self> {
        let settings: Self = load_settings(ENV_PREFIX)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_period_ms == 0 {
            return Err(eyre!("poll_period_ms must be greater than zero"));
        }
        if self.confirm_attempts == 0 {
            return Err(eyre!("confirm_attempts must be at least one"));
        }
        if self.chain_id.is_empty() {
            return Err(eyre!("chain_id must not be empty"));
        }
        if self.notification_channel.is_empty() {
            return Err(eyre!("notification_channel must not be empty"));
        }
        Ok(())
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            chain_id: self.chain_id.clone(),
            poll_period: Duration::from_millis(self.poll_period_ms),
            confirm_delay: Duration::from_millis(self.confirm_delay_ms),
            confirm_attempts: self.confirm_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use txm_base::settings::{load_settings_from, CONFIG_FILE_ENV_VAR};

    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"chain_id": "osmosis-1", "confirm_attempts": 3, "tracing": {{"level": "debug"}}}}"#
        )
        .unwrap();

        let settings: TxmSettings =
            load_settings_from(Some(file.path().to_path_buf()), "TXM_SETTINGS_TEST_UNUSED")
                .unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.chain_id, "osmosis-1");
        assert_eq!(settings.confirm_attempts, 3);
        assert_eq!(settings.poll_period_ms, 5_000);
        assert_eq!(settings.notification_channel, DEFAULT_NOTIFICATION_CHANNEL);

        let dispatcher = settings.dispatcher_settings();
        assert_eq!(dispatcher.confirm_delay, Duration::from_secs(1));
        assert_eq!(dispatcher.confirm_attempts, 3);
    }

    #[test]
    fn load_reads_the_config_file_and_environment_overrides() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"chain_id": "juno-1", "poll_period_ms": 250}}"#).unwrap();

        std::env::set_var(CONFIG_FILE_ENV_VAR, file.path());
        std::env::set_var("TXM_CONFIRM_ATTEMPTS", "4");
        let loaded = TxmSettings::load();
        std::env::remove_var(CONFIG_FILE_ENV_VAR);
        std::env::remove_var("TXM_CONFIRM_ATTEMPTS");

        let settings = loaded.unwrap();
        assert_eq!(settings.chain_id, "juno-1");
        assert_eq!(settings.poll_period_ms, 250);
        assert_eq!(settings.confirm_attempts, 4);
        assert_eq!(settings.confirm_delay_ms, 1_000);
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let settings = TxmSettings {
            confirm_attempts: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_poll_period_is_rejected() {
        let settings = TxmSettings {
            poll_period_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
