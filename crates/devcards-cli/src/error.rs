//! Error types for the devcards server.
//!
//! The hierarchy follows two levels: [`CliError`] is the top-level type
//! returned across subsystem boundaries; [`ConfigError`] and
//! [`ProjectError`] carry domain-specific context. Conversion upward is
//! automatic via `#[from]`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level server error.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Project supervision failed.
    #[error("{0}")]
    Project(#[from] ProjectError),

    /// I/O errors from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP server errors.
    #[error("Server error: {0}")]
    Server(String),

    /// Generic errors with custom messages.
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file doesn't exist at the expected location.
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Config file has invalid TOML syntax.
    #[error("Invalid TOML in config file: {0}")]
    InvalidToml(#[from] toml::de::Error),

    /// A project stanza points at a directory that doesn't exist.
    #[error("Project directory not found: {}\n\nHint: check the 'dir' key of [project.{name}]", .dir.display())]
    ProjectDirNotFound {
        /// Project name as written in the config file.
        name: String,
        /// The missing directory.
        dir: PathBuf,
    },

    /// The OS user-config directory could not be determined.
    #[error("Can't locate the user configuration directory")]
    NoConfigDir,

    /// I/O error while reading or creating the config file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Project supervision errors.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The project root has no `Cargo.toml`.
    #[error("No Cargo.toml found in {}\n\nHint: a devcards project must be a Cargo package", .0.display())]
    ManifestMissing(PathBuf),

    /// The manifest exists but its package name could not be read.
    #[error("Can't read the package name from {}: {reason}", .manifest.display())]
    ManifestUnreadable {
        manifest: PathBuf,
        reason: String,
    },

    /// Syncing a file into the fork failed.
    #[error("sync {}: {source}", .path.display())]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A full fork rebuild failed and will be retried with backoff.
    #[error("{source}")]
    Retry {
        /// 1-based attempt count of the retry about to be scheduled.
        attempt: u32,
        #[source]
        source: Box<CliError>,
    },

    /// The requested devcard doesn't exist in this project.
    #[error("no such devcard in {project}: {devcard}")]
    NoSuchDevcard { project: String, devcard: String },

    /// A code generator command failed.
    #[error("code generator failed:\n{0}")]
    Generator(String),
}

/// Result type alias using [`CliError`].
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Convert a [`CliError`] to a miette report at the binary boundary.
pub fn to_miette(err: CliError) -> miette::Report {
    miette::miette!("{err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages_carry_hints() {
        let err = ConfigError::ProjectDirNotFound {
            name: "demo".into(),
            dir: PathBuf::from("/nope"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope"));
        assert!(msg.contains("[project.demo]"));
    }

    #[test]
    fn test_retry_envelope_displays_its_source() {
        let err = ProjectError::Retry {
            attempt: 2,
            source: Box::new(CliError::Custom("sync failed".into())),
        };
        assert_eq!(err.to_string(), "sync failed");
    }

    #[test]
    fn test_cli_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CliError = io.into();
        assert!(matches!(err, CliError::Io(_)));
    }
}
