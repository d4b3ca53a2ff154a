//! Core domain types shared by the store and the analyzer service

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{LoglensError, Result};

/// Settings key holding the text-generation credential
pub const API_KEY_SETTING: &str = "deepseek_api_key";

/// Upper bound on a log message, in characters
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Upper bound on a level label, in characters
pub const MAX_LEVEL_LEN: usize = 10;

/// Upper bound on a setting value, in characters
pub const MAX_SETTING_VALUE_LEN: usize = 4096;

/// Per-request identifier used to correlate pipeline logs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single persisted log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(with = "minute_timestamp")]
    pub timestamp: NaiveDateTime,
    pub log_level: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(timestamp: NaiveDateTime, log_level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp,
            log_level: log_level.into(),
            message: message.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_level(&self.log_level)?;
        if self.message.trim().is_empty() {
            return Err(LoglensError::Validation("message cannot be empty".into()));
        }
        if self.message.chars().count() > MAX_MESSAGE_LEN {
            return Err(LoglensError::Validation(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }
        Ok(())
    }
}

/// A known log message shape used to ground query generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPattern {
    #[serde(default)]
    pub id: Option<i64>,
    pub log_level: String,
    pub log_template: String,
}

impl LogPattern {
    pub fn new(log_level: impl Into<String>, log_template: impl Into<String>) -> Self {
        Self {
            id: None,
            log_level: log_level.into(),
            log_template: log_template.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_level(&self.log_level)?;
        if self.log_template.trim().is_empty() {
            return Err(LoglensError::Validation("template cannot be empty".into()));
        }
        Ok(())
    }
}

/// Key/value application setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(default)]
    pub id: Option<i64>,
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(LoglensError::Validation("setting key cannot be empty".into()));
        }
        if self.value.chars().count() > MAX_SETTING_VALUE_LEN {
            return Err(LoglensError::Validation(format!(
                "setting value exceeds {} characters",
                MAX_SETTING_VALUE_LEN
            )));
        }
        Ok(())
    }
}

/// Outcome of one question: the analysis plus the records it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub analysis: String,
    #[serde(rename = "logs")]
    pub records: Vec<LogRecord>,
}

/// Mask a secret for display, keeping the first and last four characters
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}****{}", head, tail)
    } else {
        "****".to_string()
    }
}

fn validate_level(level: &str) -> Result<()> {
    let level = level.trim();
    if level.is_empty() {
        return Err(LoglensError::Validation("log level cannot be empty".into()));
    }
    if level.chars().count() > MAX_LEVEL_LEN {
        return Err(LoglensError::Validation(format!(
            "log level exceeds {} characters",
            MAX_LEVEL_LEN
        )));
    }
    Ok(())
}

/// Serde adapter accepting minute or second resolution timestamps.
///
/// Input may be `2024-05-01T10:15`, `2024-05-01T10:15:30` or carry
/// fractional seconds. Output always carries seconds.
pub mod minute_timestamp {
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    const INPUT_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
    }

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(OUTPUT_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-1234567890abcd"), "sk-1****abcd");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("12345678"), "****");
    }

    #[test]
    fn test_record_accepts_minute_resolution() {
        let json = r#"{"timestamp":"2024-05-01T10:15","logLevel":"INFO","message":"started"}"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, None);
        assert_eq!(record.timestamp, ts(10, 15, 0));
    }

    #[test]
    fn test_record_serializes_with_seconds() {
        let mut record = LogRecord::new(ts(10, 15, 30), "ERROR", "boom");
        record.id = Some(7);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["timestamp"], "2024-05-01T10:15:30");
        assert_eq!(value["logLevel"], "ERROR");
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let json = r#"{"timestamp":"yesterday","logLevel":"INFO","message":"x"}"#;
        assert!(serde_json::from_str::<LogRecord>(json).is_err());
    }

    #[test]
    fn test_record_validation() {
        assert!(LogRecord::new(ts(1, 0, 0), "WARN", "disk low").validate().is_ok());
        assert!(LogRecord::new(ts(1, 0, 0), "", "disk low").validate().is_err());
        assert!(LogRecord::new(ts(1, 0, 0), "CRITICALLEVEL", "x").validate().is_err());
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(LogRecord::new(ts(1, 0, 0), "INFO", long).validate().is_err());
    }

    #[test]
    fn test_pattern_validation() {
        assert!(LogPattern::new("INFO", "user {} logged in").validate().is_ok());
        assert!(LogPattern::new("INFO", "   ").validate().is_err());
    }

    #[test]
    fn test_query_result_uses_logs_field() {
        let result = QueryResult {
            analysis: "nothing unusual".into(),
            records: vec![],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("logs").is_some());
        assert!(value.get("records").is_none());
    }
}
