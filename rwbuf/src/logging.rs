//! Log level and format options.
//!
//! The library itself only emits `tracing` events. These options describe how
//! an embedding binary should install a subscriber; the empty string parses to
//! the default so unset config values behave like omitted ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::{ConfigError, RwbufError};

/// How verbose logging should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LogLevel {
    /// Per-commit and per-sweep detail.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Recoverable failures.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Returns the `tracing` filter for this level.
    pub fn as_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = RwbufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::default()),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::UnknownLogLevel {
                text: other.to_string(),
            }
            .into()),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = RwbufError;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        s.parse()
    }
}

/// Text format used when writing logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LogFormat {
    /// `key=value` pairs.
    #[default]
    Logfmt,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logfmt => "logfmt",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = RwbufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::default()),
            "logfmt" => Ok(Self::Logfmt),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnknownLogFormat {
                text: other.to_string(),
            }
            .into()),
        }
    }
}

impl TryFrom<String> for LogFormat {
    type Error = RwbufError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Options used to construct a logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Verbosity.
    #[serde(default)]
    pub level: LogLevel,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Logfmt);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(LogLevel::Warn.as_filter(), LevelFilter::WARN);
        assert_eq!(LogLevel::default().as_filter(), LevelFilter::INFO);
    }

    #[test]
    fn test_options_deserialize_defaults() {
        let opts: LogOptions = serde_json::from_str(r#"{ "format": "json" }"#).unwrap();
        assert_eq!(opts.level, LogLevel::Info);
        assert_eq!(opts.format, LogFormat::Json);
    }

    #[test]
    fn test_options_deserialize_empty_strings() {
        let opts: LogOptions = serde_json::from_str(r#"{ "level": "", "format": "" }"#).unwrap();
        assert_eq!(opts, LogOptions::default());
    }

    #[test]
    fn test_options_deserialize_rejects_unknown_text() {
        let err = serde_json::from_str::<LogOptions>(r#"{ "level": "verbose" }"#).unwrap_err();
        assert!(err.to_string().contains("verbose"), "unexpected error: {err}");
        assert!(serde_json::from_str::<LogOptions>(r#"{ "format": "xml" }"#).is_err());
    }

    #[test]
    fn test_options_serialize_lowercase() {
        let opts = LogOptions {
            level: LogLevel::Warn,
            format: LogFormat::Json,
        };
        assert_eq!(serde_json::to_string(&opts).unwrap(), r#"{"level":"warn","format":"json"}"#);
    }
}
