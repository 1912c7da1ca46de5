//! Agent configuration, loaded from TOML.
//!
//! ```toml
//! [agent]
//! interval = "10s"
//!
//! [inputs.win_services]
//! service_names = ["LanmanServer", "TermService", "Win*"]
//! excluded_service_names = ["WinRM"]
//!
//! [inputs.win_w3wp]
//! interval = "10s"
//! ```

use crate::utils::errors::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INTERVAL: &str = "10s";
pub const DEFAULT_EXECUTABLE: &str = "w3wp.exe";
pub const DEFAULT_GROUP_FLAG: &str = "-ap";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// How often every input is gathered.
    pub interval: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.interval)
    }
}

/// A missing `[inputs]` table enables every input with defaults. Once the table
/// is present, only the inputs listed in it run.
#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub win_services: Option<WinServicesConfig>,
    #[serde(default)]
    pub win_w3wp: Option<W3wpConfig>,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            win_services: Some(WinServicesConfig::default()),
            win_w3wp: Some(W3wpConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WinServicesConfig {
    /// Services to collect. Empty collects all of them.
    pub service_names: Vec<String>,
    pub excluded_service_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct W3wpConfig {
    /// Poll period of the identity and counter loops.
    pub interval: String,
    pub executable: String,
    pub group_flag: String,
}

impl Default for W3wpConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL.to_string(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            group_flag: DEFAULT_GROUP_FLAG.to_string(),
        }
    }
}

/// Parse a humantime duration such as `"10s"` or `"1m 30s"`. An empty string
/// means the default interval.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let text = if trimmed.is_empty() { DEFAULT_INTERVAL } else { trimmed };
    let interval = humantime::parse_duration(text).map_err(|err| ConfigError::InvalidInterval {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("1m 30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_interval_rejects_garbage_and_zero() {
        assert!(matches!(
            parse_interval("ten seconds"),
            Err(ConfigError::InvalidInterval { .. })
        ));
        assert!(matches!(
            parse_interval("0s"),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_missing_inputs_table_enables_everything() {
        let config = Config::from_toml("[agent]\ninterval = \"5s\"\n").unwrap();
        assert_eq!(config.agent.interval().unwrap(), Duration::from_secs(5));
        assert!(config.inputs.win_services.is_some());
        let w3wp = config.inputs.win_w3wp.unwrap();
        assert_eq!(w3wp.interval, DEFAULT_INTERVAL);
        assert_eq!(w3wp.executable, DEFAULT_EXECUTABLE);
        assert_eq!(w3wp.group_flag, DEFAULT_GROUP_FLAG);
    }

    #[test]
    fn test_only_listed_inputs_are_enabled() {
        let config = Config::from_toml(
            r#"
            [inputs.win_services]
            service_names = ["LanmanServer", "Win*"]
            excluded_service_names = ["WinRM"]
            "#,
        )
        .unwrap();
        let services = config.inputs.win_services.unwrap();
        assert_eq!(services.service_names, vec!["LanmanServer", "Win*"]);
        assert_eq!(services.excluded_service_names, vec!["WinRM"]);
        assert!(config.inputs.win_w3wp.is_none());
        assert_eq!(config.agent.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[inputs.win_w3wp\ninterval = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::load(Path::new("/nonexistent/winperf.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
