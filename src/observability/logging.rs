//! Structured logging configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Returns the format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(Error::InvalidInput(format!(
                "Invalid log format: {s}. Expected: pretty or json"
            ))),
        }
    }
}

/// Logging configuration.
///
/// Resolution order for the filter: `RUST_LOG`, then `--verbose` (debug),
/// then the configured level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive, e.g. `info` or `imgdedup=debug,reqwest=warn`.
    pub level: String,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Raise the default level to debug.
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
            verbose: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the configuration from the `[logging]` section.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let mut config = Self {
            verbose,
            ..Self::default()
        };
        let Some(settings) = settings else {
            return config;
        };
        if let Some(format) = settings.format {
            config.format = format;
        }
        if let Some(level) = settings.level.as_ref().filter(|l| !l.trim().is_empty()) {
            config.level.clone_from(level);
        }
        config.file.clone_from(&settings.file);
        config
    }

    /// Applies `IMGDEDUP_LOG_*` overrides resolved through `lookup`.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(format) = lookup("IMGDEDUP_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            self.format = format;
        }
        if let Some(level) = lookup("IMGDEDUP_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.level = level;
        }
        if let Some(file) = lookup("IMGDEDUP_LOG_FILE").filter(|v| !v.trim().is_empty()) {
            self.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Builds the subscriber filter.
    #[must_use]
    pub fn filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        let directive = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
    }
}
