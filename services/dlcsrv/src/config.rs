//! Service configuration, YAML file merged with `DLC_*` environment
//! variables.

use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DlcSrvError, Result};

/// Serial bus defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per Modbus call, milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Retries after a failed or unconfirmed write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Cross-process bus lock file
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_call_timeout_ms() -> u64 {
    500
}

fn default_write_retries() -> u32 {
    2
}

fn default_lock_path() -> String {
    "/tmp/dlc-bus.lock".to_string()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            call_timeout_ms: default_call_timeout_ms(),
            write_retries: default_write_retries(),
            lock_path: default_lock_path(),
        }
    }
}

/// Backend REST endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    10
}

/// Logging settings forwarded to the shared logging layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Delay between DLC passes, seconds
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Command queue persistence file
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
    #[serde(default)]
    pub serial: SerialConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_service_name() -> String {
    "dlcsrv".to_string()
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_queue_path() -> String {
    "/var/lib/dlcsrv/command-queues.json".to_string()
}

impl ServiceConfig {
    /// Load from a YAML file, `DLC_*` environment variables win
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: ServiceConfig = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DLC_").split("__"))
            .extract()
            .map_err(|e| DlcSrvError::config(format!("failed to load configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.is_empty() {
            return Err(DlcSrvError::config("backend base_url cannot be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(DlcSrvError::config("baud_rate must be non-zero"));
        }
        if self.cycle_interval_secs == 0 {
            return Err(DlcSrvError::config("cycle_interval_secs must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let file = write_config(
            r#"
backend:
  base_url: "http://127.0.0.1:8000"
"#,
        );
        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.service_name, "dlcsrv");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.call_timeout_ms, 500);
        assert_eq!(config.serial.write_retries, 2);
        assert_eq!(config.cycle_interval_secs, 60);
    }

    #[test]
    fn test_load_rejects_empty_backend_url() {
        let file = write_config(
            r#"
backend:
  base_url: ""
"#,
        );
        assert!(ServiceConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let file = write_config(
            r#"
cycle_interval_secs: 30
serial:
  baud_rate: 9600
  call_timeout_ms: 750
backend:
  base_url: "http://127.0.0.1:8000"
  timeout_secs: 5
"#,
        );
        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.cycle_interval_secs, 30);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.call_timeout_ms, 750);
        assert_eq!(config.backend.timeout_secs, 5);
    }
}
