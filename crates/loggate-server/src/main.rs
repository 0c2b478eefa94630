// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use loggate_agent::{
    config::Config,
    query::QueryEngine,
    queue::IngestionQueue,
    server::LogAgent,
    service::IngestionService,
    stats::StatsAggregator,
    storage::{memory::MemoryLogStore, LogStore},
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on log agent startup: {e}");
            return;
        }
    };

    // The production document-store adapter implements LogStore outside
    // this workspace; default wiring keeps everything in process.
    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());

    let queue = Arc::new(IngestionQueue::new(
        Arc::clone(&store),
        config.queue_buffer_size,
        config.batch_size,
        config.flush_period(),
        config.flush_timeout(),
    ));
    queue.start();

    let ingestion = Arc::new(IngestionService::new(Arc::clone(&queue)));
    let query = Arc::new(QueryEngine::new(Arc::clone(&store), config.query_timeout()));
    let stats = Arc::new(StatsAggregator::new(
        Arc::clone(&store),
        config.stats_ttl(),
        config.sampling_threshold,
        config.sample_size,
        config.stats_timeout(),
    ));

    let agent = LogAgent {
        config: Arc::clone(&config),
        ingestion,
        query,
        stats,
    };

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = agent.run(server_shutdown).await {
            error!("Error running log agent server: {e}");
        }
    });

    info!("Log agent starting on port {}", config.server_port);

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down gracefully..."),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }

    // Stop accepting connections, then drain the ingestion queue so
    // everything accepted so far reaches storage.
    shutdown.cancel();
    let _ = server_handle.await;
    queue.stop().await;

    info!("Log agent stopped");
}
