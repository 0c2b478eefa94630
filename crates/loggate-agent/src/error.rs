// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the synchronous call paths.
//!
//! Asynchronous flush failures never appear here: a batch that fails to
//! persist after dequeue is logged and discarded inside the ingestion
//! queue and is terminal for that batch.

use std::time::Duration;

/// Errors returned by the persistence port.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to writers on the synchronous ingestion path.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or malformed required input. The record was never queued.
    #[error("invalid log entry: {0}")]
    Validation(String),

    /// The ingestion buffer was full at enqueue time. The record was
    /// dropped, not queued; the caller may retry with backoff.
    #[error("log queue is full")]
    QueueFull,
}

/// Errors surfaced to readers by the query engine.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("log record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the statistics aggregator.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("statistics aggregation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
