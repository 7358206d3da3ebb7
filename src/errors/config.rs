// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while loading or validating a configuration file
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io {
        /// Path that was being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The file extension names a format we do not read
    UnsupportedFormat {
        /// Path with the unrecognised extension
        path: PathBuf,
    },
    /// YAML parse failure
    Yaml(serde_yaml::Error),
    /// TOML parse failure
    Toml(toml::de::Error),
    /// A value parsed but makes no sense
    Invalid {
        /// Dotted path of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path.display(), source)
            }
            ConfigError::UnsupportedFormat { path } => {
                write!(
                    f,
                    "Unsupported config format for '{}' (expected .yaml, .yml or .toml)",
                    path.display()
                )
            }
            ConfigError::Yaml(e) => write!(f, "Invalid YAML config: {}", e),
            ConfigError::Toml(e) => write!(f, "Invalid TOML config: {}", e),
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Yaml(e) => Some(e),
            ConfigError::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}
