//! Configuration module for Ophanim.
//!
//! What to watch comes from the command line and is captured in a
//! [`WatchConfig`]. How the session runs is tuned through environment
//! variables and captured in a [`Config`].
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `OPHANIM_BUFFER_SIZE` | No | 2048 | Fill buffer capacity in bytes (16 to 65536) |
//! | `OPHANIM_REPORT_FORMAT` | No | `text` | Console report format: `text` or `json` |
//! | `OPHANIM_STRICT_DECODE` | No | `false` | Stop watching on a malformed fill |
//!
//! # Example
//!
//! ```no_run
//! use ophanim::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Buffer size: {}", config.buffer_size);
//! ```

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::ActionSpec;
use crate::types::ReportFormat;

/// Default fill buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Smallest buffer that can hold a record header and one UTF-16 code unit.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Largest buffer accepted; the native notification API caps a fill at 64 KiB.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Runtime tunables for a watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the fill buffer in bytes.
    pub buffer_size: usize,

    /// Format of console reports when no action is configured.
    pub report_format: ReportFormat,

    /// Treat a malformed fill as fatal instead of skipping it.
    pub strict_decode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            report_format: ReportFormat::Text,
            strict_decode: false,
        }
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `OPHANIM_BUFFER_SIZE` is not an integer or is outside 16..=65536
    /// - `OPHANIM_REPORT_FORMAT` is neither `text` nor `json`
    /// - `OPHANIM_STRICT_DECODE` is not a boolean
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: OPHANIM_BUFFER_SIZE (default: 2048, must be 16..=65536)
        let buffer_size = match env::var("OPHANIM_BUFFER_SIZE") {
            Ok(val) => {
                let size = val
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "OPHANIM_BUFFER_SIZE".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if size < MIN_BUFFER_SIZE {
                    return Err(ConfigError::InvalidValue {
                        key: "OPHANIM_BUFFER_SIZE".to_string(),
                        message: format!("buffer size must be at least {MIN_BUFFER_SIZE} bytes"),
                    });
                }
                if size > MAX_BUFFER_SIZE {
                    return Err(ConfigError::InvalidValue {
                        key: "OPHANIM_BUFFER_SIZE".to_string(),
                        message: format!("buffer size must be at most {MAX_BUFFER_SIZE} bytes"),
                    });
                }
                size
            }
            Err(_) => DEFAULT_BUFFER_SIZE,
        };

        // Optional: OPHANIM_REPORT_FORMAT (default: text)
        let report_format = match env::var("OPHANIM_REPORT_FORMAT") {
            Ok(val) => ReportFormat::parse(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "OPHANIM_REPORT_FORMAT".to_string(),
                message: format!("expected 'text' or 'json', got '{val}'"),
            })?,
            Err(_) => ReportFormat::Text,
        };

        // Optional: OPHANIM_STRICT_DECODE (default: false)
        let strict_decode = match env::var("OPHANIM_STRICT_DECODE") {
            Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "OPHANIM_STRICT_DECODE".to_string(),
                message: format!("expected true or false, got '{val}'"),
            })?,
            Err(_) => false,
        };

        Ok(Self {
            buffer_size,
            report_format,
            strict_decode,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// What a session watches and what it does with each change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Directory to watch.
    pub root: PathBuf,

    /// Watch sub-directories as well.
    pub recursive: bool,

    /// Regular expression a name must match to be dispatched.
    /// If `None`, every event is dispatched.
    pub name_pattern: Option<String>,

    /// Command run for each dispatched event.
    /// If `None`, events are reported on stdout.
    pub action: Option<ActionSpec>,
}

impl WatchConfig {
    /// A shallow watch of `root` that reports every event.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            name_pattern: None,
            action: None,
        }
    }

    /// Builds a config from the positional command-line arguments.
    ///
    /// Only the literal string `"true"` enables a recursive watch.
    pub fn from_args(
        root: PathBuf,
        deep: Option<&str>,
        action: Option<String>,
        pattern: Option<String>,
    ) -> Self {
        Self {
            root,
            recursive: deep == Some("true"),
            name_pattern: pattern,
            action: action.map(ActionSpec::new),
        }
    }

    #[must_use]
    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all OPHANIM_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("OPHANIM_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("OPHANIM_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_defaults() {
        with_clean_env(|| {
            let config = Config::from_env().expect("should parse empty environment");
            assert_eq!(config, Config::default());
            assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
            assert_eq!(config.report_format, ReportFormat::Text);
            assert!(!config.strict_decode);
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            env::set_var("OPHANIM_BUFFER_SIZE", "65536");
            env::set_var("OPHANIM_REPORT_FORMAT", "json");
            env::set_var("OPHANIM_STRICT_DECODE", "true");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.buffer_size, 65536);
            assert_eq!(config.report_format, ReportFormat::Json);
            assert!(config.strict_decode);
        });
    }

    #[test]
    #[serial]
    fn test_invalid_buffer_size() {
        with_clean_env(|| {
            env::set_var("OPHANIM_BUFFER_SIZE", "lots");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "OPHANIM_BUFFER_SIZE"
            ));
        });
    }

    #[test]
    #[serial]
    fn test_small_buffer_size_rejected() {
        with_clean_env(|| {
            env::set_var("OPHANIM_BUFFER_SIZE", "8");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "OPHANIM_BUFFER_SIZE" && message.contains("at least 16")
            ));
        });
    }

    #[test]
    #[serial]
    fn test_large_buffer_size_rejected() {
        with_clean_env(|| {
            env::set_var("OPHANIM_BUFFER_SIZE", usize::MAX.to_string());

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "OPHANIM_BUFFER_SIZE" && message.contains("at most 65536")
            ));

            env::set_var("OPHANIM_BUFFER_SIZE", "65537");
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    #[serial]
    fn test_invalid_report_format() {
        with_clean_env(|| {
            env::set_var("OPHANIM_REPORT_FORMAT", "xml");

            let err = Config::from_env().unwrap_err();
            assert_eq!(
                err.to_string(),
                "invalid value for OPHANIM_REPORT_FORMAT: expected 'text' or 'json', got 'xml'"
            );
        });
    }

    #[test]
    #[serial]
    fn test_invalid_strict_decode() {
        with_clean_env(|| {
            env::set_var("OPHANIM_STRICT_DECODE", "maybe");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "OPHANIM_STRICT_DECODE"
            ));
        });
    }

    #[test]
    fn deep_requires_literal_true() {
        let root = PathBuf::from("/tmp");
        assert!(WatchConfig::from_args(root.clone(), Some("true"), None, None).recursive);
        assert!(!WatchConfig::from_args(root.clone(), Some("TRUE"), None, None).recursive);
        assert!(!WatchConfig::from_args(root.clone(), Some("yes"), None, None).recursive);
        assert!(!WatchConfig::from_args(root, None, None, None).recursive);
    }

    #[test]
    fn from_args_keeps_action_and_pattern() {
        let config = WatchConfig::from_args(
            PathBuf::from("/data"),
            Some("false"),
            Some("echo".to_string()),
            Some(r"\.txt$".to_string()),
        );

        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.action, Some(ActionSpec::new("echo")));
        assert_eq!(config.name_pattern.as_deref(), Some(r"\.txt$"));
    }
}
