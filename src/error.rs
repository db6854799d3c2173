//! Unified error types for Gaoler

use crate::network::Route;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Gaoler operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{}': {source}", .path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Jail '{0}' not found")]
    JailNotFound(String),

    // Validation errors
    #[error("Invalid UUID '{uuid}': {source}")]
    InvalidIdentifier { uuid: String, source: uuid::Error },

    #[error("Invalid path for dataset '{dataset}': {source}")]
    InvalidPath {
        dataset: String,
        #[source]
        source: Box<Error>,
    },

    // Path resolution errors
    #[error("Boot environments enabled for '{dataset}' but none is usable: {reason}")]
    NoActiveBootEnvironment { dataset: String, reason: String },

    #[error("Dataset '{dataset}' has more than one active boot environment: {}", .active.join(", "))]
    AmbiguousBootEnvironment { dataset: String, active: Vec<String> },

    #[error("Dataset '{dataset}' not found: {output}")]
    DatasetNotFound { dataset: String, output: String },

    // Lifecycle errors
    #[error("Failed to mount {}: {output}", .target.display())]
    Mount { target: PathBuf, output: String },

    #[error("Failed to unmount {}: {output}", .target.display())]
    Unmount { target: PathBuf, output: String },

    #[error("Failed to create jail '{jail}': {output}")]
    JailCreation { jail: String, output: String },

    #[error("Failed to remove jail '{jail}': {output}")]
    JailRemoval { jail: String, output: String },

    #[error("Failed to run /etc/rc in jail '{jail}': {output}")]
    GuestInit { jail: String, output: String },

    #[error("Invalid lifecycle transition '{event}' from state {state}: {message}")]
    InvalidTransition {
        state: String,
        event: &'static str,
        message: String,
    },

    // Network errors
    #[error("Failed to configure loopback in jail '{jail}': {output}")]
    Loopback { jail: String, output: String },

    #[error("Adding route for [{}] to [{}] failed: {output}", .route.source, .route.destination)]
    RouteInstall { route: Route, output: String },

    #[error("Could not enable IPv6 for {interface}: {output}")]
    Ipv6Enable { interface: String, output: String },

    #[error("Network device '{device}' failed: {message}")]
    NetworkDevice { device: String, message: String },

    // Process errors
    #[error("Failed to execute '{command}': {source}")]
    CommandSpawn { command: String, source: io::Error },

    #[error("Command '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("{0} is not supported for jails")]
    Unsupported(&'static str),
}

impl Error {
    /// Captured output of the external command behind this error, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::DatasetNotFound { output, .. }
            | Error::Mount { output, .. }
            | Error::Unmount { output, .. }
            | Error::JailCreation { output, .. }
            | Error::JailRemoval { output, .. }
            | Error::GuestInit { output, .. }
            | Error::Loopback { output, .. }
            | Error::RouteInstall { output, .. }
            | Error::Ipv6Enable { output, .. } => Some(output),
            Error::InvalidPath { source, .. } => source.output(),
            _ => None,
        }
    }

    /// Whether this error came out of root path resolution
    pub fn is_path_resolution(&self) -> bool {
        matches!(
            self,
            Error::NoActiveBootEnvironment { .. }
                | Error::AmbiguousBootEnvironment { .. }
                | Error::DatasetNotFound { .. }
                | Error::InvalidPath { .. }
        )
    }
}

/// Result type alias for Gaoler operations
pub type Result<T> = std::result::Result<T, Error>;
