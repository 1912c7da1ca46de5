use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a management-interface backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("access is denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Failed(String),
}

impl InterfaceError {
    pub fn is_permission(&self) -> bool {
        matches!(self, InterfaceError::PermissionDenied(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid name pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("invalid name pattern {pattern:?}: unbalanced braces")]
    UnbalancedBraces { pattern: String },
    #[error("invalid interval {value:?}: {reason}")]
    InvalidInterval { value: String, reason: String },
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Enumerating entities failed, so the whole collection cycle is lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: {source}")]
pub struct ManagementInterfaceError {
    pub context: &'static str,
    #[source]
    pub source: InterfaceError,
}

/// A single entity could not be opened or queried. Never fatal to a cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {entity:?}: {source}")]
pub struct EntityAccessError {
    pub operation: &'static str,
    pub entity: String,
    #[source]
    pub source: InterfaceError,
}

impl EntityAccessError {
    pub fn is_permission(&self) -> bool {
        self.source.is_permission()
    }
}

#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ManagementInterface(#[from] ManagementInterfaceError),
    #[error("Runtime error: {0}")]
    Runtime(String),
}
