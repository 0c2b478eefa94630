// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loggate Agent
//!
//! Log ingestion and query service: producers submit structured log
//! records over the HTTP surface; the agent buffers, batches, and durably
//! persists them through the [`storage::LogStore`] port, and answers
//! filtered, paginated queries plus cached approximate statistics over
//! the stored corpus.
//!
//! ## Architecture
//!
//! - [`queue`]: bounded non-blocking ingestion buffer with a single
//!   background batch/flush worker
//! - [`service`]: request-facing validation and enqueueing
//! - [`query`]: filter translation, pagination, and response shaping
//! - [`stats`]: time-boxed cached corpus statistics with sampling
//! - [`storage`]: persistence port and the in-memory implementation
//! - [`server`]: the HTTP remote-call surface
//!
//! Writes are fire-and-forget past the queue boundary: an accepted write
//! means "queued for persistence", and a batch that fails to flush is
//! dropped and logged. This is the documented durability contract, not an
//! accident.

/// Configuration - environment variables and defaults
pub mod config;

/// Error taxonomy for the synchronous call paths
pub mod error;

/// HTTP request/response helpers
pub mod http_utils;

/// Core data types: records, levels, filters
pub mod model;

/// Bounded ingestion queue and background flush worker
pub mod queue;

/// Query engine over the persistence port
pub mod query;

/// HTTP surface of the agent
pub mod server;

/// Request-facing ingestion service
pub mod service;

/// Cached corpus statistics
pub mod stats;

/// Persistence port and implementations
pub mod storage;
