//! Collector configuration
//!
//! Settings come from an optional JSON file; the CLI overrides individual
//! fields on top of it.

use crate::encoder::{OverflowPolicy, DEFAULT_MAX_CHANNELS};
use crate::error::SurveyError;
use crate::parser::DuplicatePolicy;
use crate::pipeline::CycleTimeouts;
use crate::transport::DEFAULT_ENDPOINT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the modem password
pub const PASSWORD_ENV: &str = "SURVEYOR_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurveyorConfig {
    /// HNAP endpoint of the modem
    pub endpoint: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Seconds between collection cycles; also the RRD step
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// RRD file rows are written to
    pub data_path: PathBuf,
    /// Channel slots in the RRD schema
    pub max_channels: usize,
    pub duplicate_channels: DuplicatePolicy,
    pub channel_overflow: OverflowPolicy,
}

impl Default for SurveyorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            username: "admin".to_string(),
            password: String::new(),
            interval_secs: 5,
            fetch_timeout_secs: 5,
            write_timeout_secs: 1,
            data_path: PathBuf::from("surveyor.rrd"),
            max_channels: DEFAULT_MAX_CHANNELS,
            duplicate_channels: DuplicatePolicy::default(),
            channel_overflow: OverflowPolicy::default(),
        }
    }
}

impl SurveyorConfig {
    /// Load from a JSON file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self, SurveyError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    SurveyError::Config(format!("error reading {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    SurveyError::Config(format!("error parsing {}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Check the settings are usable before anything talks to the modem
    pub fn validate(&self) -> Result<(), SurveyError> {
        if self.endpoint.is_empty() {
            return Err(SurveyError::Config("endpoint must not be empty".to_string()));
        }
        if self.username.is_empty() {
            return Err(SurveyError::Config("username must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(SurveyError::Config(format!(
                "password must be set (config file, --password or {PASSWORD_ENV})"
            )));
        }
        if self.interval_secs == 0 {
            return Err(SurveyError::Config("interval must be at least 1s".to_string()));
        }
        if self.fetch_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(SurveyError::Config("timeouts must be at least 1s".to_string()));
        }
        if self.max_channels == 0 {
            return Err(SurveyError::Config("max_channels must be positive".to_string()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeouts(&self) -> CycleTimeouts {
        CycleTimeouts {
            fetch: Duration::from_secs(self.fetch_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SurveyorConfig {
        SurveyorConfig {
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SurveyorConfig::default();
        assert_eq!(config.endpoint, "https://192.168.100.1/HNAP1/");
        assert_eq!(config.max_channels, 16);
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.timeouts(), CycleTimeouts::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SurveyorConfig = serde_json::from_str(
            r#"{"username": "cusadmin", "max_channels": 32, "duplicate_channels": "reject"}"#,
        )
        .unwrap();

        assert_eq!(config.username, "cusadmin");
        assert_eq!(config.max_channels, 32);
        assert_eq!(config.duplicate_channels, DuplicatePolicy::Reject);
        assert_eq!(config.channel_overflow, OverflowPolicy::Truncate);
        assert_eq!(config.interval_secs, 5);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_str::<SurveyorConfig>(r#"{"graphs_addr": ":8080"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let json = serde_json::to_string(&valid()).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(SurveyorConfig::default().validate().is_err());

        let zero_interval = SurveyorConfig {
            interval_secs: 0,
            ..valid()
        };
        assert!(zero_interval.validate().is_err());

        let no_channels = SurveyorConfig {
            max_channels: 0,
            ..valid()
        };
        assert!(matches!(no_channels.validate(), Err(SurveyError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SurveyorConfig::load(Some(Path::new("/nonexistent/surveyor.json"))).unwrap_err();
        assert!(err.to_string().contains("error reading"));
    }
}
