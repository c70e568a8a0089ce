//! Log level value type shared by every target kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The log level that can be defined for a dogu or component.
///
/// Ordered from least to most verbose; `Unknown` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    #[default]
    Unknown,
    Error,
    Warn,
    Info,
    Debug,
}

/// Returned when a string does not name a log level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level {input:?}")]
pub struct ParseLogLevelError {
    input: String,
}

impl ParseLogLevelError {
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl LogLevel {
    /// Every level, in ascending verbosity.
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Unknown,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
    ];

    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Unknown => "UNKNOWN",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Case-insensitive inverse of [`LogLevel::as_str`] for the four known
    /// levels. `"UNKNOWN"` is rejected like any other unrecognized input.
    pub fn parse(text: &str) -> Result<Self, ParseLogLevelError> {
        Self::ALL
            .into_iter()
            .filter(LogLevel::is_known)
            .find(|level| level.as_str().eq_ignore_ascii_case(text))
            .ok_or_else(|| ParseLogLevelError {
                input: text.to_string(),
            })
    }

    /// Like [`LogLevel::parse`], yielding the `Unknown` sentinel on failure.
    pub fn parse_or_unknown(text: &str) -> Self {
        Self::parse(text).unwrap_or(LogLevel::Unknown)
    }

    /// Whether this level can be applied to a target.
    pub fn is_known(&self) -> bool {
        !matches!(self, LogLevel::Unknown)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inverts_display_for_every_known_level() {
        for level in LogLevel::ALL.into_iter().filter(LogLevel::is_known) {
            assert_eq!(LogLevel::parse(&level.to_string()), Ok(level));
        }
    }

    #[test]
    fn unknown_sentinel_does_not_parse() {
        assert!(LogLevel::parse("UNKNOWN").is_err());
        assert!(LogLevel::parse("unknown").is_err());
        assert_eq!(LogLevel::parse_or_unknown("unknown"), LogLevel::Unknown);
        assert!(serde_json::from_str::<LogLevel>("\"UNKNOWN\"").is_err());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(LogLevel::parse("debug"), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::parse("Warn"), Ok(LogLevel::Warn));
        assert_eq!("eRrOr".parse::<LogLevel>(), Ok(LogLevel::Error));
    }

    #[test]
    fn unrecognized_input_errors_with_unknown_sentinel() {
        let err = LogLevel::parse("bogus").unwrap_err();
        assert_eq!(err.input(), "bogus");
        assert_eq!(err.to_string(), "unknown log level \"bogus\"");
        assert_eq!(LogLevel::parse_or_unknown("bogus"), LogLevel::Unknown);
        assert!(LogLevel::parse("").is_err());
        assert!(LogLevel::parse("WARNING").is_err());
    }

    #[test]
    fn ordering_follows_verbosity() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(!LogLevel::Unknown.is_known());
        assert!(LogLevel::Info.is_known());
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&LogLevel::Debug).unwrap();
        assert_eq!(json, "\"DEBUG\"");
        let level: LogLevel = serde_json::from_str("\"info\"").unwrap();
        assert_eq!(level, LogLevel::Info);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }
}
