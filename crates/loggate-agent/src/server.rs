// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the log agent.
//!
//! Carries the semantic contract of the remote-call interface over
//! HTTP/1.1 + JSON:
//!
//! - `POST /api/v1/logs`: write one entry (body: the entry object)
//! - `POST /api/v1/logs/batch`: write many (`{"log_entries": [...]}`)
//! - `POST /api/v1/logs/query`: filtered, paginated retrieval
//! - `GET  /api/v1/logs/{id}`: single-record lookup
//! - `GET  /api/v1/stats`: cached corpus statistics
//! - `GET  /info`: endpoint listing and configuration echo
//!
//! Write responses report acceptance into the ingestion queue, not
//! durable persistence; see [`crate::service`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{IngestError, QueryError, StatsError};
use crate::http_utils::{
    json_response, log_and_create_http_response, verify_request_content_length, Body,
};
use crate::model::{LogEntryPayload, LogRecord, QueryFilter};
use crate::query::QueryEngine;
use crate::service::IngestionService;
use crate::stats::StatsAggregator;

const WRITE_ENDPOINT_PATH: &str = "/api/v1/logs";
const BATCH_WRITE_ENDPOINT_PATH: &str = "/api/v1/logs/batch";
const QUERY_ENDPOINT_PATH: &str = "/api/v1/logs/query";
const RECORD_ENDPOINT_PREFIX: &str = "/api/v1/logs/";
const STATS_ENDPOINT_PATH: &str = "/api/v1/stats";
const INFO_ENDPOINT_PATH: &str = "/info";

#[derive(Debug, Deserialize)]
struct BatchWriteRequest {
    #[serde(default)]
    log_entries: Vec<LogEntryPayload>,
}

#[derive(Debug, Serialize)]
struct WriteLogResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchWriteLogResponse {
    success: bool,
    log_ids: Vec<String>,
    failed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryLogResponse {
    success: bool,
    logs: Vec<LogRecord>,
    total_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

pub struct LogAgent {
    pub config: Arc<Config>,
    pub ingestion: Arc<IngestionService>,
    pub query: Arc<QueryEngine>,
    pub stats: Arc<StatsAggregator>,
}

impl LogAgent {
    /// Binds the configured port and serves until the shutdown token is
    /// cancelled.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server_port));
        let listener = TcpListener::bind(&addr).await?;
        debug!("log agent started: listening on port {}", self.config.server_port);
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let config = Arc::clone(&self.config);
        let ingestion = Arc::clone(&self.ingestion);
        let query = Arc::clone(&self.query);
        let stats = Arc::clone(&self.stats);

        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&config);
            let ingestion = Arc::clone(&ingestion);
            let query = Arc::clone(&query);
            let stats = Arc::clone(&stats);
            async move { Self::endpoint_handler(config, ingestion, query, stats, req).await }
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("log agent shutting down, no longer accepting connections");
                    return Ok(());
                }
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler<B>(
        config: Arc<Config>,
        ingestion: Arc<IngestionService>,
        query: Arc<QueryEngine>,
        stats: Arc<StatsAggregator>,
        req: Request<B>,
    ) -> http::Result<Response<Body>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        match (req.method(), req.uri().path()) {
            (&Method::POST, WRITE_ENDPOINT_PATH) => {
                Self::write_handler(config, ingestion, req).await
            }
            (&Method::POST, BATCH_WRITE_ENDPOINT_PATH) => {
                Self::batch_write_handler(config, ingestion, req).await
            }
            (&Method::POST, QUERY_ENDPOINT_PATH) => Self::query_handler(config, query, req).await,
            (&Method::GET, STATS_ENDPOINT_PATH) => Self::stats_handler(stats).await,
            (&Method::GET, path) if path.starts_with(RECORD_ENDPOINT_PREFIX) => {
                let id = path[RECORD_ENDPOINT_PREFIX.len()..].to_string();
                Self::record_handler(query, &id).await
            }
            (_, INFO_ENDPOINT_PATH) => Self::info_handler(&config),
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn write_handler<B>(
        config: Arc<Config>,
        ingestion: Arc<IngestionService>,
        req: Request<B>,
    ) -> http::Result<Response<Body>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let payload: LogEntryPayload =
            match Self::read_json_body(config, req, "Error processing write request").await {
                Ok(payload) => payload,
                Err(response) => return response,
            };

        match ingestion.write_one(&payload) {
            Ok(id) => json_response(
                StatusCode::OK,
                &WriteLogResponse {
                    success: true,
                    log_id: Some(id),
                    error_message: None,
                },
            ),
            Err(e) => {
                let status = match &e {
                    IngestError::Validation(_) => StatusCode::BAD_REQUEST,
                    IngestError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
                };
                json_response(
                    status,
                    &WriteLogResponse {
                        success: false,
                        log_id: None,
                        error_message: Some(e.to_string()),
                    },
                )
            }
        }
    }

    async fn batch_write_handler<B>(
        config: Arc<Config>,
        ingestion: Arc<IngestionService>,
        req: Request<B>,
    ) -> http::Result<Response<Body>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let request: BatchWriteRequest =
            match Self::read_json_body(config, req, "Error processing batch write request").await {
                Ok(request) => request,
                Err(response) => return response,
            };

        match ingestion.write_batch(&request.log_entries) {
            Ok(outcome) => {
                let error_message = if outcome.success() {
                    None
                } else {
                    Some(format!("{} logs failed to enqueue", outcome.failed_count))
                };
                json_response(
                    StatusCode::OK,
                    &BatchWriteLogResponse {
                        success: outcome.success(),
                        log_ids: outcome.accepted_ids,
                        failed_count: outcome.failed_count,
                        error_message,
                    },
                )
            }
            Err(e) => json_response(
                StatusCode::BAD_REQUEST,
                &BatchWriteLogResponse {
                    success: false,
                    log_ids: Vec::new(),
                    failed_count: 0,
                    error_message: Some(e.to_string()),
                },
            ),
        }
    }

    async fn query_handler<B>(
        config: Arc<Config>,
        query: Arc<QueryEngine>,
        req: Request<B>,
    ) -> http::Result<Response<Body>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let filter: QueryFilter =
            match Self::read_json_body(config, req, "Error processing query request").await {
                Ok(filter) => filter,
                Err(response) => return response,
            };

        match query.query(&filter).await {
            Ok(page) => json_response(
                StatusCode::OK,
                &QueryLogResponse {
                    success: true,
                    total_count: page.total_count,
                    logs: page.records,
                    error_message: None,
                },
            ),
            Err(e) => {
                let status = match &e {
                    QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    QueryError::NotFound(_) => StatusCode::NOT_FOUND,
                    QueryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    QueryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                };
                json_response(
                    status,
                    &QueryLogResponse {
                        success: false,
                        logs: Vec::new(),
                        total_count: 0,
                        error_message: Some(e.to_string()),
                    },
                )
            }
        }
    }

    async fn record_handler(
        query: Arc<QueryEngine>,
        id: &str,
    ) -> http::Result<Response<Body>> {
        match query.record_by_id(id).await {
            Ok(record) => json_response(StatusCode::OK, &record),
            Err(e) => {
                let status = match &e {
                    QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    QueryError::NotFound(_) => StatusCode::NOT_FOUND,
                    QueryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    QueryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                };
                log_and_create_http_response(&e.to_string(), status)
            }
        }
    }

    async fn stats_handler(stats: Arc<StatsAggregator>) -> http::Result<Response<Body>> {
        match stats.get_stats().await {
            Ok(snapshot) => json_response(StatusCode::OK, &*snapshot),
            Err(e) => {
                let status = match &e {
                    StatsError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    StatsError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                };
                log_and_create_http_response(
                    &format!("Failed to get stats: {e}"),
                    status,
                )
            }
        }
    }

    fn info_handler(config: &Config) -> http::Result<Response<Body>> {
        let response_json = json!({
            "endpoints": [
                WRITE_ENDPOINT_PATH,
                BATCH_WRITE_ENDPOINT_PATH,
                QUERY_ENDPOINT_PATH,
                STATS_ENDPOINT_PATH,
                INFO_ENDPOINT_PATH
            ],
            "config": {
                "server_port": config.server_port,
                "queue_buffer_size": config.queue_buffer_size,
                "batch_size": config.batch_size,
                "flush_period_secs": config.flush_period_secs,
            }
        });
        Response::builder()
            .status(200)
            .body(Body::from(response_json.to_string()))
    }

    /// Verifies the content length, reads the full body, and parses it as
    /// JSON. Any failure is returned as a ready-made error response.
    async fn read_json_body<B, T>(
        config: Arc<Config>,
        req: Request<B>,
        error_message_prefix: &str,
    ) -> Result<T, http::Result<Response<Body>>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
        T: serde::de::DeserializeOwned,
    {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            error_message_prefix,
        ) {
            return Err(response);
        }

        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Err(log_and_create_http_response(
                    &format!("{error_message_prefix}: Error reading request body: {e}"),
                    StatusCode::BAD_REQUEST,
                ));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid request body: {e}"),
                StatusCode::BAD_REQUEST,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::IngestionQueue;
    use crate::storage::memory::MemoryLogStore;
    use crate::storage::LogStore;
    use bytes::Bytes;
    use std::time::Duration;

    struct TestAgent {
        config: Arc<Config>,
        ingestion: Arc<IngestionService>,
        query: Arc<QueryEngine>,
        stats: Arc<StatsAggregator>,
        queue: Arc<IngestionQueue>,
        store: Arc<MemoryLogStore>,
    }

    fn test_agent() -> TestAgent {
        let config = Arc::new(Config::default());
        let store = Arc::new(MemoryLogStore::new());
        let queue = Arc::new(IngestionQueue::new(
            store.clone(),
            config.queue_buffer_size,
            config.batch_size,
            config.flush_period(),
            config.flush_timeout(),
        ));
        let ingestion = Arc::new(IngestionService::new(Arc::clone(&queue)));
        let query = Arc::new(QueryEngine::new(store.clone(), config.query_timeout()));
        let stats = Arc::new(StatsAggregator::new(
            store.clone(),
            config.stats_ttl(),
            config.sampling_threshold,
            config.sample_size,
            config.stats_timeout(),
        ));
        TestAgent {
            config,
            ingestion,
            query,
            stats,
            queue,
            store,
        }
    }

    impl TestAgent {
        async fn handle(
            &self,
            method: Method,
            path: &str,
            body: &str,
        ) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method(method)
                .uri(path)
                .header("content-length", body.len().to_string())
                .body(Body::from(Bytes::from(body.to_string())))
                .unwrap();

            let response = LogAgent::endpoint_handler(
                Arc::clone(&self.config),
                Arc::clone(&self.ingestion),
                Arc::clone(&self.query),
                Arc::clone(&self.stats),
                request,
            )
            .await
            .unwrap();

            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    #[tokio::test]
    async fn test_write_endpoint_accepts_valid_entry() {
        let agent = test_agent();
        let body = r#"{"service_name":"api","level":"INFO","message":"hello","timestamp":"2024-06-01T12:00:00Z"}"#;

        let (status, response) = agent.handle(Method::POST, WRITE_ENDPOINT_PATH, body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert!(response["log_id"].as_str().unwrap().starts_with("queued-"));
    }

    #[tokio::test]
    async fn test_write_endpoint_rejects_invalid_entry() {
        let agent = test_agent();
        let body = r#"{"level":"INFO","message":"no service name"}"#;

        let (status, response) = agent.handle(Method::POST, WRITE_ENDPOINT_PATH, body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);
        assert!(response["error_message"]
            .as_str()
            .unwrap()
            .contains("service_name"));
    }

    #[tokio::test]
    async fn test_write_endpoint_rejects_malformed_json() {
        let agent = test_agent();
        let (status, _response) = agent
            .handle(Method::POST, WRITE_ENDPOINT_PATH, "{not json")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_endpoint_reports_partial_failures() {
        let agent = test_agent();
        let body = r#"{"log_entries":[
            {"service_name":"api","message":"one"},
            {"message":"missing service"},
            {"service_name":"api","message":"two"}
        ]}"#;

        let (status, response) = agent
            .handle(Method::POST, BATCH_WRITE_ENDPOINT_PATH, body)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], false);
        assert_eq!(response["failed_count"], 1);
        assert_eq!(response["log_ids"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_endpoint_rejects_empty_batch() {
        let agent = test_agent();
        let (status, response) = agent
            .handle(Method::POST, BATCH_WRITE_ENDPOINT_PATH, r#"{"log_entries":[]}"#)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);
    }

    #[tokio::test]
    async fn test_query_endpoint_returns_matches_and_total() {
        let agent = test_agent();
        agent
            .store
            .insert_many(
                (0..3)
                    .map(|i| LogRecord {
                        id: None,
                        service_name: "api".to_string(),
                        level: crate::model::LogLevel::Error,
                        message: format!("boom {i}"),
                        timestamp: chrono::Utc::now(),
                        metadata: Default::default(),
                        trace_id: None,
                        span_id: None,
                        ingested_at: None,
                    })
                    .collect(),
            )
            .await
            .unwrap();

        let (status, response) = agent
            .handle(
                Method::POST,
                QUERY_ENDPOINT_PATH,
                r#"{"service_name":"api","level":"ERROR","limit":2}"#,
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["total_count"], 3);
        assert_eq!(response["logs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_endpoint_round_trip() {
        let agent = test_agent();
        let ids = agent
            .store
            .insert_many(vec![LogRecord {
                id: None,
                service_name: "api".to_string(),
                level: crate::model::LogLevel::Info,
                message: "hello".to_string(),
                timestamp: chrono::Utc::now(),
                metadata: Default::default(),
                trace_id: None,
                span_id: None,
                ingested_at: None,
            }])
            .await
            .unwrap();

        let path = format!("{RECORD_ENDPOINT_PREFIX}{}", ids[0]);
        let (status, response) = agent.handle(Method::GET, &path, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["message"], "hello");

        let (status, _) = agent
            .handle(Method::GET, "/api/v1/logs/nope", "")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_endpoint_returns_snapshot() {
        let agent = test_agent();
        let (status, response) = agent.handle(Method::GET, STATS_ENDPOINT_PATH, "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["total_logs"], 0);
        assert_eq!(response["recent_24h"], 0);
    }

    #[tokio::test]
    async fn test_info_endpoint_lists_routes() {
        let agent = test_agent();
        let (status, response) = agent.handle(Method::GET, INFO_ENDPOINT_PATH, "").await;

        assert_eq!(status, StatusCode::OK);
        let endpoints = response["endpoints"].as_array().unwrap();
        assert!(endpoints
            .iter()
            .any(|e| e == WRITE_ENDPOINT_PATH));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let agent = test_agent();
        let (status, _response) = agent.handle(Method::GET, "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_write_flows_through_queue_to_storage() {
        let agent = test_agent();
        let body = r#"{"service_name":"api","message":"persist me"}"#;
        let (status, _) = agent.handle(Method::POST, WRITE_ENDPOINT_PATH, body).await;
        assert_eq!(status, StatusCode::OK);

        agent.queue.start();
        agent.queue.stop().await;
        assert_eq!(agent.store.len().await, 1);
    }
}
