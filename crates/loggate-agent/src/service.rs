// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request-facing ingestion: validation, normalization, and delegation to
//! the ingestion queue.
//!
//! "Accepted" on this path means *durably queued for persistence*, not
//! persisted: the pipeline is fire-and-forget beyond the queue boundary,
//! and the returned identifiers are provisional (the durable identity is
//! assigned later by the store).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::model::{LogEntryPayload, LogRecord};
use crate::queue::IngestionQueue;

/// Outcome of a batch write. Entries fail independently; there is no
/// transactional all-or-nothing semantics and no rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWriteOutcome {
    /// Provisional identifiers for the entries that were accepted.
    pub accepted_ids: Vec<String>,
    /// Number of entries that failed conversion or were rejected by the
    /// queue.
    pub failed_count: u64,
}

impl BatchWriteOutcome {
    pub fn success(&self) -> bool {
        self.failed_count == 0
    }
}

pub struct IngestionService {
    queue: Arc<IngestionQueue>,
    sequence: AtomicU64,
}

impl IngestionService {
    pub fn new(queue: Arc<IngestionQueue>) -> Self {
        Self {
            queue,
            sequence: AtomicU64::new(0),
        }
    }

    /// Validates and enqueues a single entry.
    ///
    /// Returns the provisional identifier on acceptance. A missing service
    /// name or message fails validation; an unparseable timestamp does not
    /// (the current time is substituted instead).
    pub fn write_one(&self, payload: &LogEntryPayload) -> Result<String, IngestError> {
        let record = self.convert(payload)?;
        if !self.queue.enqueue(record) {
            return Err(IngestError::QueueFull);
        }
        Ok(self.provisional_id())
    }

    /// Converts and enqueues each entry independently. Failures are
    /// counted but do not abort the batch.
    pub fn write_batch(
        &self,
        payloads: &[LogEntryPayload],
    ) -> Result<BatchWriteOutcome, IngestError> {
        if payloads.is_empty() {
            return Err(IngestError::Validation(
                "at least one log entry is required".to_string(),
            ));
        }

        let mut accepted_ids = Vec::with_capacity(payloads.len());
        let mut failed_count = 0u64;
        for payload in payloads {
            match self.write_one(payload) {
                Ok(id) => accepted_ids.push(id),
                Err(_) => failed_count += 1,
            }
        }

        Ok(BatchWriteOutcome {
            accepted_ids,
            failed_count,
        })
    }

    fn convert(&self, payload: &LogEntryPayload) -> Result<LogRecord, IngestError> {
        if payload.service_name.trim().is_empty() {
            return Err(IngestError::Validation(
                "service_name is required".to_string(),
            ));
        }
        if payload.message.is_empty() {
            return Err(IngestError::Validation("message is required".to_string()));
        }

        Ok(LogRecord {
            id: None,
            service_name: payload.service_name.clone(),
            level: payload.level.clone(),
            message: payload.message.clone(),
            timestamp: parse_timestamp(&payload.timestamp),
            metadata: payload.metadata.clone(),
            trace_id: non_empty(&payload.trace_id),
            span_id: non_empty(&payload.span_id),
            ingested_at: None,
        })
    }

    fn provisional_id(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("queued-{nanos}-{seq}")
    }
}

/// Parses an RFC 3339 timestamp, substituting the current time when the
/// value is absent or unparseable rather than rejecting the record.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
