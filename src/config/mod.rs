//! Configuration management.
//!
//! `config.toml` sections:
//!
//! ```toml
//! data_dir = "/var/lib/imgdedup"
//!
//! [dedup]
//! size_filter_enabled = true
//! min_size_kb = 20
//! persist_flush_interval = 25
//! bloom_expected_elements = 10000
//! bloom_false_positive_rate = 0.01
//!
//! [download]
//! output_dir = "downloads"
//! rename = true
//!
//! [http]
//! timeout_secs = 30
//!
//! [logging]
//! format = "json"
//! level = "info"
//! ```

use crate::observability::LogFormat;
use crate::services::deduplication::DeduplicationConfig;
use crate::services::{BatchOptions, FileNamer, HttpSettings};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "IMGDEDUP_CONFIG_PATH";

/// File name of the durable history store inside the data directory.
pub const HISTORY_DB_FILE: &str = "history.db";

/// Main configuration for imgdedup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directory holding the history store.
    pub data_dir: PathBuf,
    /// Deduplication engine settings.
    pub dedup: DeduplicationConfig,
    /// Download and naming settings.
    pub download: DownloadConfig,
    /// HTTP client settings.
    pub http: HttpSettings,
    /// Raw `[logging]` section, resolved by the observability module.
    pub logging: LoggingSettings,
}

/// Download and naming settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Directory saved images are written to.
    pub output_dir: PathBuf,
    /// Always use generated file names.
    pub rename: bool,
    /// Resolve thumbnails to their originals before fetching.
    pub prefer_original: bool,
    /// Ignore candidates that are not supported image formats.
    pub filter_extensions: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            rename: true,
            prefer_original: true,
            filter_extensions: true,
        }
    }
}

impl DownloadConfig {
    /// Batch options derived from these settings.
    #[must_use]
    pub const fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            prefer_original: self.prefer_original,
            filter_extensions: self.filter_extensions,
            namer: FileNamer::new(self.rename),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Engine section.
    pub dedup: Option<ConfigFileDedup>,
    /// Download section.
    pub download: Option<ConfigFileDownload>,
    /// HTTP section.
    pub http: Option<ConfigFileHttp>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// `[dedup]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileDedup {
    /// Size filter toggle.
    pub size_filter_enabled: Option<bool>,
    /// Minimum size in KiB.
    pub min_size_kb: Option<u64>,
    /// Commits between flushes.
    pub persist_flush_interval: Option<u32>,
    /// Bloom design capacity.
    pub bloom_expected_elements: Option<u64>,
    /// Bloom false-positive target.
    pub bloom_false_positive_rate: Option<f64>,
    /// Exact keys persisted per store.
    pub persist_window: Option<usize>,
    /// Pause between candidates in milliseconds.
    pub inter_item_delay_ms: Option<u64>,
    /// Weak digest fallback toggle.
    pub weak_digest_fallback: Option<bool>,
    /// Volatile query parameter names.
    pub volatile_params: Option<Vec<String>>,
    /// Volatile query parameter prefixes.
    pub volatile_prefixes: Option<Vec<String>>,
}

/// `[download]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileDownload {
    /// Output directory.
    pub output_dir: Option<String>,
    /// Generated file names.
    pub rename: Option<bool>,
    /// Original-image resolution.
    pub prefer_original: Option<bool>,
    /// Image format filter.
    pub filter_extensions: Option<bool>,
}

/// `[http]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileHttp {
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Whole-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
}

/// `[logging]` section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<LogFormat>,
    /// Filter directive.
    pub level: Option<String>,
    /// Log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dedup: DeduplicationConfig::default(),
            download: DownloadConfig::default(),
            http: HttpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration the binary runs with.
    ///
    /// Checks `explicit`, then [`CONFIG_PATH_ENV`], then
    /// `<platform config dir>/imgdedup/config.toml`. Environment overrides
    /// are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be read or parsed.
    /// A broken file in the platform location is logged and skipped.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        };
        Ok(config.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            Error::OperationFailed { operation, cause } => Error::OperationFailed {
                operation,
                cause: format!("{}: {cause}", path.display()),
            },
            other => other,
        })
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the platform config directory, or defaults.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    /// Converts a `ConfigFile` to `AppConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(dedup) = file.dedup {
            apply_dedup(&mut config.dedup, dedup);
        }
        if let Some(download) = file.download {
            if let Some(dir) = download.output_dir {
                config.download.output_dir = PathBuf::from(dir);
            }
            if let Some(v) = download.rename {
                config.download.rename = v;
            }
            if let Some(v) = download.prefer_original {
                config.download.prefer_original = v;
            }
            if let Some(v) = download.filter_extensions {
                config.download.filter_extensions = v;
            }
        }
        if let Some(http) = file.http {
            if let Some(agent) = http.user_agent {
                config.http.user_agent = agent;
            }
            if let Some(secs) = http.timeout_secs {
                config.http.timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = http.connect_timeout_secs {
                config.http.connect_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }

    /// Applies `IMGDEDUP_*` overrides resolved through `lookup`.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("IMGDEDUP_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self.dedup = self.dedup.with_overrides(&lookup);
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Path of the durable history store.
    #[must_use]
    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_DB_FILE)
    }
}

fn apply_dedup(config: &mut DeduplicationConfig, file: ConfigFileDedup) {
    if let Some(v) = file.size_filter_enabled {
        config.size_filter_enabled = v;
    }
    if let Some(v) = file.min_size_kb {
        config.min_size_kb = v;
    }
    if let Some(v) = file.persist_flush_interval {
        config.persist_flush_interval = v;
    }
    if let Some(v) = file.bloom_expected_elements {
        config.bloom_expected_elements = v;
    }
    if let Some(v) = file.bloom_false_positive_rate {
        config.bloom_false_positive_rate = v;
    }
    if let Some(v) = file.persist_window {
        config.persist_window = v;
    }
    if let Some(ms) = file.inter_item_delay_ms {
        config.inter_item_delay = Duration::from_millis(ms);
    }
    if let Some(v) = file.weak_digest_fallback {
        config.weak_digest_fallback = v;
    }
    if let Some(params) = file.volatile_params {
        config.volatile_params = params;
    }
    if let Some(prefixes) = file.volatile_prefixes {
        config.volatile_prefixes = prefixes;
    }
}

/// `<platform config dir>/imgdedup/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "imgdedup")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "imgdedup").map_or_else(
        || PathBuf::from(".imgdedup"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
