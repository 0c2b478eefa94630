// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded ingestion queue with background batch assembly.
//!
//! Decouples fast, many-writer ingestion from slower, batched persistence
//! under a fixed memory budget. Producers enqueue without ever blocking;
//! a single background worker owns consumption and groups records into
//! batches, flushing when a batch fills or a periodic timer fires:
//!
//! ```text
//!   producers ──try_send──> [bounded channel] ──recv──> worker ──batch──> LogStore
//!                 (full: drop + warn)                     │
//!                                                 size or timer trigger
//! ```
//!
//! Shutdown drains synchronously: [`IngestionQueue::stop`] returns only
//! after the in-progress batch and every buffered record have been
//! flushed and the worker has terminated.
//!
//! A batch that fails to persist (error or timeout) is logged and
//! discarded. There is no retry and no spill-to-disk; this is a known,
//! accepted data-loss path on the asynchronous side of the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::model::LogRecord;
use crate::storage::LogStore;

/// Producer-facing side of the ingestion pipeline.
pub struct IngestionQueue {
    tx: mpsc::Sender<LogRecord>,
    rx: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    store: Arc<dyn LogStore>,
    batch_size: usize,
    flush_period: Duration,
    flush_timeout: Duration,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    flushed: Arc<AtomicU64>,
}

impl IngestionQueue {
    pub fn new(
        store: Arc<dyn LogStore>,
        buffer_size: usize,
        batch_size: usize,
        flush_period: Duration,
        flush_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            store,
            batch_size,
            flush_period,
            flush_timeout,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            dropped: AtomicU64::new(0),
            flushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attempts to place one record into the buffer.
    ///
    /// Returns immediately regardless of buffer state: `true` when the
    /// record was accepted, `false` when the buffer was full (the record
    /// is dropped) or the queue has been stopped. Never blocks the
    /// caller and never retries internally.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("log queue is full, dropping log entry");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("log queue is stopped, dropping log entry");
                false
            }
        }
    }

    /// Launches the single background worker that owns consumption of the
    /// buffer. Calling `start` a second time is a logged no-op.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().expect("queue state lock poisoned").take() else {
            warn!("ingestion queue already started");
            return;
        };

        let worker = QueueWorker {
            rx,
            store: Arc::clone(&self.store),
            batch_size: self.batch_size,
            flush_period: self.flush_period,
            flush_timeout: self.flush_timeout,
            shutdown: self.shutdown.clone(),
            flushed: Arc::clone(&self.flushed),
        };
        let handle = tokio::spawn(worker.run());
        *self.worker.lock().expect("queue state lock poisoned") = Some(handle);
    }

    /// Signals the worker to drain and waits for it to terminate.
    ///
    /// When this returns, the in-progress batch and every record that was
    /// buffered at shutdown time have been flushed (or discarded on flush
    /// failure) and no further consumer activity occurs.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().expect("queue state lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("ingestion worker terminated abnormally: {e}");
            }
        }
    }

    /// Number of records dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of records successfully flushed to storage.
    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }
}

/// Single consumer of the ingestion buffer.
struct QueueWorker {
    rx: mpsc::Receiver<LogRecord>,
    store: Arc<dyn LogStore>,
    batch_size: usize,
    flush_period: Duration,
    flush_timeout: Duration,
    shutdown: CancellationToken,
    flushed: Arc<AtomicU64>,
}

impl QueueWorker {
    async fn run(mut self) {
        debug!("ingestion worker started");

        let mut ticker = interval(self.flush_period);
        ticker.tick().await; // discard first tick, which is instantaneous

        let mut batch: Vec<LogRecord> = Vec::with_capacity(self.batch_size);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    // All senders gone; nothing more will arrive.
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        self.drain(batch).await;
        debug!("ingestion worker stopped");
    }

    /// Flushes the in-progress batch plus everything still buffered in
    /// the channel, then lets the worker terminate.
    async fn drain(mut self, mut batch: Vec<LogRecord>) {
        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            batch.push(record);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<LogRecord>) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        let count = records.len();

        match timeout(self.flush_timeout, self.store.insert_many(records)).await {
            Ok(Ok(_)) => {
                self.flushed.fetch_add(count as u64, Ordering::Relaxed);
                debug!("flushed {count} log records to storage");
            }
            Ok(Err(e)) => {
                // The batch is discarded; flush failures are terminal.
                error!("error flushing log batch of {count} records: {e}");
            }
            Err(_) => {
                error!(
                    "flush of {count} log records timed out after {:?}, batch discarded",
                    self.flush_timeout
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{LogLevel, LogRecord};
    use crate::storage::{FieldValue, GroupBy, Predicate};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            id: None,
            service_name: "test".to_string(),
            level: LogLevel::Info,
            message: message.to_string(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            trace_id: None,
            span_id: None,
            ingested_at: None,
        }
    }

    /// Store that records the size of every insert batch it receives.
    #[derive(Default)]
    struct RecordingStore {
        batches: std::sync::Mutex<Vec<usize>>,
    }

    impl RecordingStore {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }

        fn total_inserted(&self) -> usize {
            self.batches.lock().unwrap().iter().sum()
        }
    }

    #[async_trait]
    impl LogStore for RecordingStore {
        async fn insert_many(&self, records: Vec<LogRecord>) -> Result<Vec<String>, StoreError> {
            self.batches.lock().unwrap().push(records.len());
            Ok(records.iter().map(|_| "id".to_string()).collect())
        }

        async fn count(&self, _predicate: &Predicate) -> Result<u64, StoreError> {
            Ok(self.total_inserted() as u64)
        }

        async fn estimated_count(&self) -> Result<u64, StoreError> {
            Ok(self.total_inserted() as u64)
        }

        async fn find(
            &self,
            _predicate: &Predicate,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<LogRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_by_id(&self, _id: &str) -> Result<Option<LogRecord>, StoreError> {
            Ok(None)
        }

        async fn aggregate(
            &self,
            _predicate: &Predicate,
            _group_by: GroupBy,
            _sample_size: Option<usize>,
        ) -> Result<Vec<(FieldValue, u64)>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Store whose inserts always fail.
    struct FailingStore;

    #[async_trait]
    impl LogStore for FailingStore {
        async fn insert_many(&self, _records: Vec<LogRecord>) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Backend("insert failed".to_string()))
        }

        async fn count(&self, _predicate: &Predicate) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn estimated_count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn find(
            &self,
            _predicate: &Predicate,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<LogRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_by_id(&self, _id: &str) -> Result<Option<LogRecord>, StoreError> {
            Ok(None)
        }

        async fn aggregate(
            &self,
            _predicate: &Predicate,
            _group_by: GroupBy,
            _sample_size: Option<usize>,
        ) -> Result<Vec<(FieldValue, u64)>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn queue_with(
        store: Arc<dyn LogStore>,
        buffer: usize,
        batch: usize,
        period: Duration,
    ) -> IngestionQueue {
        IngestionQueue::new(store, buffer, batch, period, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_enqueue_never_blocks_when_full() {
        let store = Arc::new(RecordingStore::default());
        // Worker intentionally not started; the buffer fills and stays full.
        let queue = queue_with(store, 1, 10, Duration::from_secs(60));

        assert!(queue.enqueue(record("first")));
        assert!(!queue.enqueue(record("second")));
        assert!(!queue.enqueue(record("third")));
        assert_eq!(queue.dropped(), 2);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_immediately() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store.clone(), 100, 2, Duration::from_secs(60));
        queue.start();

        assert!(queue.enqueue(record("a")));
        assert!(queue.enqueue(record("b")));
        assert!(queue.enqueue(record("c")));

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Two records flushed as a full batch; the third is still in the
        // in-progress batch waiting for the timer.
        assert_eq!(store.batch_sizes(), vec![2]);

        queue.stop().await;
        assert_eq!(store.total_inserted(), 3);
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store.clone(), 100, 50, Duration::from_millis(100));
        queue.start();

        assert!(queue.enqueue(record("lonely")));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.batch_sizes(), vec![1]);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_records_as_final_batch() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store.clone(), 100, 50, Duration::from_secs(60));

        for i in 0..7 {
            assert!(queue.enqueue(record(&format!("buffered-{i}"))));
        }

        queue.start();
        queue.stop().await;

        // All seven buffered records drain as one final batch.
        assert_eq!(store.total_inserted(), 7);
        assert_eq!(store.batch_sizes(), vec![7]);
        assert_eq!(queue.flushed(), 7);
    }

    #[tokio::test]
    async fn test_drain_respects_batch_size() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store.clone(), 100, 3, Duration::from_secs(60));

        for i in 0..7 {
            assert!(queue.enqueue(record(&format!("buffered-{i}"))));
        }

        queue.start();
        queue.stop().await;

        assert_eq!(store.total_inserted(), 7);
        for size in store.batch_sizes() {
            assert!(size <= 3);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_is_rejected() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store, 10, 10, Duration::from_secs(60));
        queue.start();
        queue.stop().await;

        assert!(!queue.enqueue(record("late")));
    }

    #[tokio::test]
    async fn test_accepted_equals_flushed_plus_dropped() {
        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(queue_with(store.clone(), 8, 4, Duration::from_millis(50)));
        queue.start();

        let mut accepted = 0u64;
        let total = 200u64;
        for i in 0..total {
            if queue.enqueue(record(&format!("r{i}"))) {
                accepted += 1;
            }
        }

        queue.stop().await;

        assert_eq!(queue.flushed(), accepted);
        assert_eq!(accepted + queue.dropped(), total);
        assert_eq!(store.total_inserted() as u64, accepted);
    }

    #[tokio::test]
    async fn test_flush_failure_discards_batch_and_worker_survives() {
        let store = Arc::new(FailingStore);
        let queue = queue_with(store, 100, 2, Duration::from_secs(60));
        queue.start();

        assert!(queue.enqueue(record("a")));
        assert!(queue.enqueue(record("b")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The failed batch was discarded and the worker keeps accepting.
        assert!(queue.enqueue(record("c")));
        queue.stop().await;
        assert_eq!(queue.flushed(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let store = Arc::new(RecordingStore::default());
        let queue = queue_with(store.clone(), 10, 10, Duration::from_secs(60));
        queue.start();
        queue.start();

        assert!(queue.enqueue(record("a")));
        queue.stop().await;
        assert_eq!(store.total_inserted(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_capacity_one() {
        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(queue_with(store, 1, 10, Duration::from_secs(60)));

        let q1 = Arc::clone(&queue);
        let q2 = Arc::clone(&queue);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { q1.enqueue(record("one")) }),
            tokio::spawn(async move { q2.enqueue(record("two")) }),
        );

        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|accepted| **accepted).count(), 1);
        assert_eq!(queue.dropped(), 1);
    }
}
