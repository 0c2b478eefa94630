// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistence port consumed by the ingestion and query paths.
//!
//! The core only depends on the narrow [`LogStore`] trait; the production
//! adapter over a document database lives outside this crate. The
//! [`memory`] module provides an in-process implementation used by tests
//! and the default binary wiring.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{LogLevel, LogRecord};

/// Exact-match and range predicates over stored records, ANDed together.
/// Absent fields do not constrain the result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub service_name: Option<String>,
    pub level: Option<LogLevel>,
    pub trace_id: Option<String>,
    /// Exact key/value matches against record metadata, one per pair.
    pub metadata: Vec<(String, String)>,
    /// Inclusive lower bound on the record timestamp.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the record timestamp.
    pub end_time: Option<DateTime<Utc>>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.level.is_none()
            && self.trace_id.is_none()
            && self.metadata.is_empty()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Whether a record satisfies every present field of the predicate.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(service_name) = &self.service_name {
            if &record.service_name != service_name {
                return false;
            }
        }
        if let Some(level) = &self.level {
            if &record.level != level {
                return false;
            }
        }
        if let Some(trace_id) = &self.trace_id {
            if record.trace_id.as_ref() != Some(trace_id) {
                return false;
            }
        }
        for (key, value) in &self.metadata {
            if record.metadata.get(key) != Some(value) {
                return false;
            }
        }
        if let Some(start) = &self.start_time {
            if record.timestamp < *start {
                return false;
            }
        }
        if let Some(end) = &self.end_time {
            if record.timestamp > *end {
                return false;
            }
        }
        true
    }
}

/// Field a grouped aggregation buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Level,
    ServiceName,
}

/// A grouping key returned by the store.
///
/// Document stores keep the level field dynamically typed: conforming
/// writers persist the numeric code, non-conforming ones a free-form
/// string, and legacy records may miss the field entirely. The key is
/// resolved to a canonical bucket name at read time, never at the call
/// sites that consume it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Int(i64),
    Str(String),
    Null,
}

impl FieldValue {
    /// Total mapping from a raw level value to its canonical bucket name.
    ///
    /// Codes 0-4 map to DEBUG/INFO/WARN/ERROR/FATAL; other codes become
    /// `UNKNOWN_<code>`; strings are their own canonical name; an absent
    /// value buckets under `NULL`.
    pub fn canonical_level(&self) -> String {
        match self {
            FieldValue::Int(code) => match LogLevel::from_code(*code) {
                Some(level) => level.canonical_name().to_string(),
                None => format!("UNKNOWN_{code}"),
            },
            FieldValue::Str(name) => name.clone(),
            FieldValue::Null => "NULL".to_string(),
        }
    }

    /// Bucket name for a service-name grouping key.
    pub fn service_bucket(&self) -> String {
        match self {
            FieldValue::Int(code) => code.to_string(),
            FieldValue::Str(name) => name.clone(),
            FieldValue::Null => "UNKNOWN".to_string(),
        }
    }
}

/// Durable store for log records.
///
/// Implementations must be safe to share across request-handling tasks.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Inserts a batch of records, assigning each its durable identity and
    /// ingestion time. Returns the assigned ids in input order.
    async fn insert_many(&self, records: Vec<LogRecord>) -> Result<Vec<String>, StoreError>;

    /// Exact count of records matching the predicate.
    async fn count(&self, predicate: &Predicate) -> Result<u64, StoreError>;

    /// Cheap total count that may be stale (metadata-based in real
    /// document stores).
    async fn estimated_count(&self) -> Result<u64, StoreError>;

    /// Matching records ordered by timestamp descending, bounded by
    /// `limit` and `offset`.
    async fn find(
        &self,
        predicate: &Predicate,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogRecord>, StoreError>;

    /// Single-record lookup by store-assigned id.
    async fn find_by_id(&self, id: &str) -> Result<Option<LogRecord>, StoreError>;

    /// Bucket counts of matching records grouped by the requested field.
    /// With `sample_size`, the counts come from a random sample of at most
    /// that many matching records instead of the full corpus.
    async fn aggregate(
        &self,
        predicate: &Predicate,
        group_by: GroupBy,
        sample_size: Option<usize>,
    ) -> Result<Vec<(FieldValue, u64)>, StoreError>;
}
