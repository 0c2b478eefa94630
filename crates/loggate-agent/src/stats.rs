// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Corpus-wide statistics with a time-boxed cached snapshot.
//!
//! Readers get the cached [`StatsSnapshot`] for up to the configured TTL;
//! on expiry exactly one caller recomputes while the rest block briefly
//! behind the write lock and then receive the fresh snapshot
//! (double-checked, so there is no thundering herd against the store).
//!
//! Above the sampling threshold the level and service breakdowns are
//! computed over a fixed-size random sample and every bucket is scaled by
//! `total / sample_size`; the trailing-24h count is an indexed range
//! count and stays exact in both modes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::StatsError;
use crate::storage::{GroupBy, LogStore, Predicate};

/// Immutable aggregate view of the stored corpus. Replaced wholesale on
/// each recomputation, never partially mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_logs: u64,
    pub logs_by_level: HashMap<String, u64>,
    pub logs_by_service: HashMap<String, u64>,
    pub recent_24h: u64,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot cache guarding expiry behind a reader/writer lock. The lock
/// never escapes this type.
struct SnapshotCache {
    inner: RwLock<Option<Arc<StatsSnapshot>>>,
}

impl SnapshotCache {
    fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Returns the cached snapshot if it has not expired.
    async fn fresh(&self, now: DateTime<Utc>) -> Option<Arc<StatsSnapshot>> {
        let guard = self.inner.read().await;
        guard.as_ref().filter(|s| s.expires_at > now).cloned()
    }

    /// Recomputes under the write lock, re-checking expiry first so that
    /// only one of N concurrent callers performs the work. A failed
    /// recomputation leaves the previous snapshot in place for the next
    /// caller to retry against.
    async fn refresh<F, Fut>(
        &self,
        now: DateTime<Utc>,
        recompute: F,
    ) -> Result<Arc<StatsSnapshot>, StatsError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<StatsSnapshot, StatsError>>,
    {
        let mut guard = self.inner.write().await;
        if let Some(snapshot) = guard.as_ref().filter(|s| s.expires_at > now) {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(recompute().await?);
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    #[allow(dead_code)]
    async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}

pub struct StatsAggregator {
    store: Arc<dyn LogStore>,
    cache: SnapshotCache,
    ttl: chrono::Duration,
    sampling_threshold: u64,
    sample_size: usize,
    stats_timeout: Duration,
}

impl StatsAggregator {
    pub fn new(
        store: Arc<dyn LogStore>,
        ttl: Duration,
        sampling_threshold: u64,
        sample_size: usize,
        stats_timeout: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            store,
            cache: SnapshotCache::new(),
            ttl,
            sampling_threshold,
            sample_size,
            stats_timeout,
        }
    }

    /// Returns the current snapshot, recomputing it if the cached one has
    /// expired.
    pub async fn get_stats(&self) -> Result<Arc<StatsSnapshot>, StatsError> {
        let now = Utc::now();
        if let Some(snapshot) = self.cache.fresh(now).await {
            return Ok(snapshot);
        }
        self.cache.refresh(now, || self.recompute()).await
    }

    async fn recompute(&self) -> Result<StatsSnapshot, StatsError> {
        match timeout(self.stats_timeout, self.compute_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(StatsError::Timeout(self.stats_timeout)),
        }
    }

    async fn compute_snapshot(&self) -> Result<StatsSnapshot, StatsError> {
        let everything = Predicate::default();

        let total_logs = match self.store.estimated_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("estimated count unavailable, falling back to exact count: {e}");
                self.store.count(&everything).await?
            }
        };

        let sample_size = (total_logs > self.sampling_threshold).then_some(self.sample_size);
        let scale = match sample_size {
            Some(size) if size > 0 => total_logs as f64 / size as f64,
            _ => 1.0,
        };
        if sample_size.is_some() {
            debug!(
                "corpus of {total_logs} records exceeds sampling threshold, \
                 aggregating over a sample of {}",
                self.sample_size
            );
        }

        let level_buckets = self
            .store
            .aggregate(&everything, GroupBy::Level, sample_size)
            .await?;
        let service_buckets = self
            .store
            .aggregate(&everything, GroupBy::ServiceName, sample_size)
            .await?;

        let mut logs_by_level: HashMap<String, u64> = HashMap::new();
        for (key, count) in level_buckets {
            *logs_by_level.entry(key.canonical_level()).or_insert(0) +=
                scale_count(count, scale);
        }

        let mut logs_by_service: HashMap<String, u64> = HashMap::new();
        for (key, count) in service_buckets {
            *logs_by_service.entry(key.service_bucket()).or_insert(0) +=
                scale_count(count, scale);
        }

        // Cheap against the timestamp index, so always exact regardless of
        // sampling mode.
        let recent_predicate = Predicate {
            start_time: Some(Utc::now() - chrono::Duration::hours(24)),
            ..Default::default()
        };
        let recent_24h = self.store.count(&recent_predicate).await?;

        let computed_at = Utc::now();
        Ok(StatsSnapshot {
            total_logs,
            logs_by_level,
            logs_by_service,
            recent_24h,
            computed_at,
            expires_at: computed_at + self.ttl,
        })
    }
}

/// Scales a sampled bucket count up to a full-corpus estimate, rounding
/// to the nearest integer.
fn scale_count(count: u64, scale: f64) -> u64 {
    if scale == 1.0 {
        count
    } else {
        (count as f64 * scale).round() as u64
    }
}
