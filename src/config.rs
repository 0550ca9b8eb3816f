//! Mirror configuration module.
//!
//! Handles loading, validating, and merging `pbase-mirror.toml`. Settings are
//! layered, later layers winning:
//!
//! ```text
//! stock defaults  →  pbase-mirror.toml (or --config <file>)  →  CLI flags
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! base_url = "https://pbase.com"  # Site to mirror from
//! output = "downloads"            # Output directory
//! delay = 0.5                     # Seconds between requests
//! user_agent = "Mozilla/5.0 ..."  # Sent with every request
//! timeout_secs = 60               # Per-request timeout
//! on_gallery_error = "continue"   # or "abort"
//!
//! [naming]
//! max_base_len = 200              # Filename length before the extension
//!
//! [processing]
//! max_workers = 1                 # Parallel item workers
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want.
//!
//! ```toml
//! delay = 2.0
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::naming::{MAX_BASE_LEN, MIN_BASE_LEN};
use crate::walk::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Config file picked up from the working directory when `--config` is not
/// given.
pub const CONFIG_FILENAME: &str = "pbase-mirror.toml";

pub const DEFAULT_BASE_URL: &str = "https://pbase.com";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Upper bound for parallel item workers. More would only queue on the
/// request throttle.
pub const MAX_WORKERS: usize = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Mirror configuration loaded from `pbase-mirror.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Site root; start paths resolve against it.
    pub base_url: String,
    /// Directory images are saved into.
    pub output: PathBuf,
    /// Minimum seconds between consecutive requests.
    pub delay: f64,
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether a failed gallery page stops the run.
    pub on_gallery_error: FailurePolicy,
    pub naming: NamingConfig,
    pub processing: ProcessingConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output: PathBuf::from("downloads"),
            delay: 0.5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
            on_gallery_error: FailurePolicy::Continue,
            naming: NamingConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(ConfigError::Validation(
                "delay must be a non-negative number of seconds".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be greater than zero".into(),
            ));
        }
        if !(MIN_BASE_LEN..=MAX_BASE_LEN).contains(&self.naming.max_base_len) {
            return Err(ConfigError::Validation(format!(
                "naming.max_base_len must be {MIN_BASE_LEN}-{MAX_BASE_LEN}"
            )));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Validation("output must not be empty".into()));
        }
        Ok(())
    }

    /// `base_url` parsed; only http(s) with a host is accepted.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Validation(format!("base_url {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::Validation(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        Ok(url)
    }

    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply command-line overrides on top of file values.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(base_url) = &overrides.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(output) = &overrides.output {
            self.output = output.clone();
        }
        if let Some(delay) = overrides.delay {
            self.delay = delay;
        }
        if let Some(workers) = overrides.workers {
            self.processing.max_workers = Some(workers);
        }
        if overrides.fail_fast {
            self.on_gallery_error = FailurePolicy::Abort;
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub output: Option<PathBuf>,
    pub delay: Option<f64>,
    pub workers: Option<usize>,
    pub fail_fast: bool,
}

/// Output filename settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    /// Maximum characters in a filename before the extension.
    pub max_base_len: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            max_base_len: MAX_BASE_LEN,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of items processed at once.
    /// When absent, items are processed one at a time.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → 1
/// - `Some(n)` → `n` clamped to `1..=MAX_WORKERS`
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    config.max_workers.unwrap_or(1).clamp(1, MAX_WORKERS)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(MirrorConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<MirrorConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: MirrorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit path must exist. Without one, `pbase-mirror.toml` in the
/// working directory is used when present, else the stock defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<MirrorConfig, ConfigError> {
    let overlay = match explicit {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Some(toml::from_str(&content)?)
        }
        None => load_raw_config(Path::new(CONFIG_FILENAME))?,
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `pbase-mirror.toml` with all keys and
/// explanations.
///
/// Used by the `--gen-config` flag.
pub fn stock_config_toml() -> &'static str {
    r##"# PBase Mirror Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# The file is read from ./pbase-mirror.toml, or from the path given with
# --config. Command-line flags override values set here.
# Unknown keys will cause an error.

# Site to mirror from. Start paths such as "alice/root" resolve against it.
base_url = "https://pbase.com"

# Directory images are saved into. Created if missing.
output = "downloads"

# Minimum seconds between consecutive requests to the site.
delay = 0.5

# User-Agent header sent with every request.
user_agent = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"

# Per-request timeout in seconds.
timeout_secs = 60

# What to do when a gallery page cannot be fetched:
#   "continue" - log it, skip that gallery's subtree, keep going
#   "abort"    - stop the run with an error (same as --fail-fast)
on_gallery_error = "continue"

# ---------------------------------------------------------------------------
# Output filenames
# ---------------------------------------------------------------------------
[naming]
# Maximum characters in a filename before the extension (16-200).
max_base_len = 200

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Items processed in parallel (1-8). The request delay still applies
# across all workers. Omit for one at a time.
# max_workers = 1
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = MirrorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_url().unwrap().as_str(), "https://pbase.com/");
        assert_eq!(config.delay(), Duration::from_millis(500));
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn parse_partial_config() {
        let config: MirrorConfig =
            toml::from_str("delay = 2.0\n[naming]\nmax_base_len = 64\n").unwrap();
        assert_eq!(config.delay, 2.0);
        assert_eq!(config.naming.max_base_len, 64);
        // Unspecified defaults preserved
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.on_gallery_error, FailurePolicy::Continue);
    }

    #[test]
    fn parse_failure_policy() {
        let config: MirrorConfig = toml::from_str(r#"on_gallery_error = "abort""#).unwrap();
        assert_eq!(config.on_gallery_error, FailurePolicy::Abort);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<MirrorConfig>("dealy = 1.0").is_err());
        assert!(toml::from_str::<MirrorConfig>("[naming]\nmax_len = 10").is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn negative_delay_rejected() {
        let config = MirrorConfig {
            delay: -1.0,
            ..MirrorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn non_http_base_url_rejected() {
        for bad in ["ftp://pbase.com", "not a url", "file:///tmp"] {
            let config = MirrorConfig {
                base_url: bad.to_string(),
                ..MirrorConfig::default()
            };
            assert!(config.validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn max_base_len_bounds() {
        let mut config = MirrorConfig::default();
        config.naming.max_base_len = 15;
        assert!(config.validate().is_err());
        config.naming.max_base_len = 201;
        assert!(config.validate().is_err());
        config.naming.max_base_len = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = MirrorConfig::default();
        config.processing.max_workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = MirrorConfig {
            timeout_secs: 0,
            ..MirrorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // Workers
    // =========================================================================

    #[test]
    fn effective_workers_defaults_to_one() {
        assert_eq!(effective_workers(&ProcessingConfig::default()), 1);
    }

    #[test]
    fn effective_workers_clamps() {
        let config = ProcessingConfig {
            max_workers: Some(64),
        };
        assert_eq!(effective_workers(&config), MAX_WORKERS);
        let config = ProcessingConfig {
            max_workers: Some(3),
        };
        assert_eq!(effective_workers(&config), 3);
    }

    // =========================================================================
    // Overrides
    // =========================================================================

    #[test]
    fn cli_overrides_win() {
        let mut config = MirrorConfig::default();
        config.apply(&Overrides {
            base_url: Some("http://127.0.0.1:8080".to_string()),
            output: Some(PathBuf::from("/tmp/out")),
            delay: Some(0.0),
            workers: Some(2),
            fail_fast: true,
        });
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.output, PathBuf::from("/tmp/out"));
        assert_eq!(config.delay(), Duration::ZERO);
        assert_eq!(config.processing.max_workers, Some(2));
        assert_eq!(config.on_gallery_error, FailurePolicy::Abort);
    }

    #[test]
    fn empty_overrides_change_nothing() {
        let mut config = MirrorConfig::default();
        config.apply(&Overrides::default());
        assert_eq!(config, MirrorConfig::default());
    }

    // =========================================================================
    // merge_toml / load
    // =========================================================================

    #[test]
    fn merge_toml_overlay_wins_and_base_survives() {
        let base = stock_defaults_value();
        let overlay: toml::Value =
            toml::from_str("delay = 3.0\n[naming]\nmax_base_len = 50").unwrap();
        let merged: MirrorConfig = merge_toml(base, overlay).try_into().unwrap();
        assert_eq!(merged.delay, 3.0);
        assert_eq!(merged.naming.max_base_len, 50);
        assert_eq!(merged.timeout_secs, 60);
    }

    #[test]
    fn load_raw_config_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(load_raw_config(&tmp.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn load_config_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.toml");
        fs::write(&path, "output = \"photos\"\n[processing]\nmax_workers = 4\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.output, PathBuf::from("photos"));
        assert_eq!(effective_workers(&config.processing), 4);
    }

    #[test]
    fn load_config_explicit_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(Some(&tmp.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_config_invalid_values_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.toml");
        fs::write(&path, "delay = -0.5\n").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let config: MirrorConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, MirrorConfig::default());
    }
}
