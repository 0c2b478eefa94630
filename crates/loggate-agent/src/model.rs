// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core data types shared by the ingestion, query, and statistics paths.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Severity of a log record, ordered `Debug < Info < Warn < Error < Fatal`.
///
/// Conforming producers send one of the five canonical levels, either as its
/// name or as the numeric code 0-4. Non-conforming producers may send any
/// string; those are preserved verbatim in the `Other` variant rather than
/// rejected, and resolve to their own canonical name at aggregation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    /// Free-form level from a non-conforming producer.
    Other(String),
}

impl LogLevel {
    /// Numeric wire code for canonical levels. `Other` has no code.
    pub fn code(&self) -> Option<i64> {
        match self {
            LogLevel::Debug => Some(0),
            LogLevel::Info => Some(1),
            LogLevel::Warn => Some(2),
            LogLevel::Error => Some(3),
            LogLevel::Fatal => Some(4),
            LogLevel::Other(_) => None,
        }
    }

    pub fn from_code(code: i64) -> Option<LogLevel> {
        match code {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Error),
            4 => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Canonical upper-case name. `Other` levels are their own name.
    pub fn canonical_name(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Other(name) => name,
        }
    }

    /// Parses a level name, case-insensitively for the canonical five.
    /// Anything else is kept verbatim as `Other`.
    pub fn parse(name: &str) -> LogLevel {
        match name.to_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "FATAL" => LogLevel::Fatal,
            _ => LogLevel::Other(name.to_string()),
        }
    }
}

impl Default for LogLevel {
    // Matches the wire default: an absent level is the zero code.
    fn default() -> Self {
        LogLevel::Debug
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.canonical_name())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a level name or a numeric level code")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<LogLevel, E> {
                Ok(LogLevel::parse(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<LogLevel, E> {
                Ok(LogLevel::from_code(value)
                    .unwrap_or_else(|| LogLevel::Other(value.to_string())))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<LogLevel, E> {
                match i64::try_from(value) {
                    Ok(code) => self.visit_i64(code),
                    Err(_) => Ok(LogLevel::Other(value.to_string())),
                }
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

/// One structured log record.
///
/// `id` and `ingested_at` are assigned by the store at insert time and are
/// `None` on every record travelling through the ingestion pipeline. The
/// producer-supplied `timestamp` is taken as-is; backdated records are
/// allowed, so `ingested_at >= timestamp` is not an invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub service_name: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
}

/// Incoming wire representation of a single log entry.
///
/// The timestamp travels as an RFC 3339 string and is parsed by the
/// ingestion service; an unparseable value falls back to the current time
/// instead of failing the write.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogEntryPayload {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
}

/// Filter for log queries. All present fields are ANDed together; the time
/// range is inclusive on whichever bounds are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Requested page size. Clamped to the system maximum; 0 requests the
    /// maximum page.
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}
