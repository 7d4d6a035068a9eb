//! Container configuration, loadable from TOML.
//!
//! ```toml
//! ignore_next_middlewares = false
//!
//! [body]
//! limit = 102400
//!
//! [uploads]
//! dest = "/var/tmp/uploads"
//!
//! [uploads.limits]
//! file_size = 1048576
//! files = 4
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::middleware::parsers::DEFAULT_BODY_LIMIT;
use crate::middleware::upload::FileLimits;

/// Errors raised while loading a [`ServiceConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Process-wide settings of a [`ServiceContainer`](crate::ServiceContainer).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default for routes that do not declare it themselves.
    pub ignore_next_middlewares: bool,
    pub body: BodySettings,
    pub uploads: UploadSettings,
}

/// Defaults for the body parser stages.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BodySettings {
    /// Body size limit, in bytes, for routes without their own.
    pub limit: usize,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self { limit: DEFAULT_BODY_LIMIT }
    }
}

/// The shared uploader's settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    /// Store uploads in this directory instead of memory.
    pub dest: Option<PathBuf>,
    pub limits: FileLimits,
}

impl ServiceConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.body.limit == 0 {
            return Err(ConfigError::InvalidValue { field: "body.limit", reason: "must be greater than zero".into() });
        }
        if self.uploads.dest.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
            return Err(ConfigError::InvalidValue { field: "uploads.dest", reason: "must not be empty".into() });
        }
        Ok(())
    }
}
