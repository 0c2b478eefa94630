// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory implementation of the persistence port.
//!
//! Backs the test suites and the default binary wiring. Durable identity
//! is a v4 UUID assigned at insert, mirroring what the external document
//! store adapter does with its native object ids.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::LogRecord;
use crate::storage::{FieldValue, GroupBy, LogStore, Predicate};

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    records: RwLock<Vec<LogRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held. Test helper.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn group_key(record: &LogRecord, group_by: GroupBy) -> FieldValue {
        match group_by {
            // Conforming levels are persisted as their numeric code, the
            // rest as the raw string, matching the document-store reality.
            GroupBy::Level => match record.level.code() {
                Some(code) => FieldValue::Int(code),
                None => FieldValue::Str(record.level.canonical_name().to_string()),
            },
            GroupBy::ServiceName => FieldValue::Str(record.service_name.clone()),
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert_many(&self, records: Vec<LogRecord>) -> Result<Vec<String>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut guard = self.records.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            let id = Uuid::new_v4().simple().to_string();
            record.id = Some(id.clone());
            record.ingested_at = Some(now);
            guard.push(record);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn count(&self, predicate: &Predicate) -> Result<u64, StoreError> {
        let guard = self.records.read().await;
        Ok(guard.iter().filter(|r| predicate.matches(r)).count() as u64)
    }

    async fn estimated_count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn find(
        &self,
        predicate: &Predicate,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let guard = self.records.read().await;
        let mut matching: Vec<LogRecord> = guard
            .iter()
            .filter(|r| predicate.matches(r))
            .cloned()
            .collect();
        // Newest first; ties broken by id so pages are deterministic.
        matching.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<LogRecord>, StoreError> {
        let guard = self.records.read().await;
        Ok(guard.iter().find(|r| r.id.as_deref() == Some(id)).cloned())
    }

    async fn aggregate(
        &self,
        predicate: &Predicate,
        group_by: GroupBy,
        sample_size: Option<usize>,
    ) -> Result<Vec<(FieldValue, u64)>, StoreError> {
        let guard = self.records.read().await;
        let matching: Vec<&LogRecord> = guard.iter().filter(|r| predicate.matches(r)).collect();

        let mut buckets: HashMap<FieldValue, u64> = HashMap::new();
        match sample_size {
            Some(size) if size < matching.len() => {
                let mut rng = rand::thread_rng();
                for record in matching.choose_multiple(&mut rng, size) {
                    *buckets.entry(Self::group_key(record, group_by)).or_insert(0) += 1;
                }
            }
            _ => {
                for record in matching {
                    *buckets.entry(Self::group_key(record, group_by)).or_insert(0) += 1;
                }
            }
        }

        Ok(buckets.into_iter().collect())
    }
}
