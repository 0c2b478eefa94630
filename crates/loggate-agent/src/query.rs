// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Query engine: translates a [`QueryFilter`] into a persistence query and
//! shapes the response for the remote-call surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{QueryError, StoreError};
use crate::model::{LogRecord, QueryFilter};
use crate::storage::{LogStore, Predicate};

/// Hard ceiling on the page size. Requested limits are clamped to this
/// regardless of value; a limit of 0 requests the maximum page.
pub const MAX_QUERY_LIMIT: u32 = 100;

/// One page of query results plus the total match count over the full
/// predicate, so callers can paginate.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub records: Vec<LogRecord>,
    pub total_count: u64,
}

pub struct QueryEngine {
    store: Arc<dyn LogStore>,
    query_timeout: Duration,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn LogStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Runs the filter against the store.
    ///
    /// The total count is computed over the full predicate (ignoring
    /// pagination); the page itself is timestamp-descending and bounded by
    /// the clamped limit and requested offset. An empty page is an empty
    /// vec, never an absent value.
    pub async fn query(&self, filter: &QueryFilter) -> Result<QueryPage, QueryError> {
        let predicate = predicate_from_filter(filter);
        let limit = effective_limit(filter.limit) as usize;
        let offset = filter.offset as usize;

        let result = timeout(self.query_timeout, async {
            let total_count = self.store.count(&predicate).await?;
            let records = self.store.find(&predicate, limit, offset).await?;
            Ok::<_, StoreError>(QueryPage {
                records,
                total_count,
            })
        })
        .await;

        match result {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(QueryError::Persistence(e)),
            Err(_) => Err(QueryError::Timeout(self.query_timeout)),
        }
    }

    /// Thin pass-through lookup of a single record.
    pub async fn record_by_id(&self, id: &str) -> Result<LogRecord, QueryError> {
        if id.trim().is_empty() {
            return Err(QueryError::InvalidArgument(
                "record id must not be empty".to_string(),
            ));
        }

        let result = timeout(self.query_timeout, self.store.find_by_id(id)).await;
        match result {
            Ok(Ok(Some(record))) => Ok(record),
            Ok(Ok(None)) => Err(QueryError::NotFound(id.to_string())),
            Ok(Err(e)) => Err(QueryError::Persistence(e)),
            Err(_) => Err(QueryError::Timeout(self.query_timeout)),
        }
    }
}

fn effective_limit(requested: u32) -> u32 {
    if requested == 0 {
        MAX_QUERY_LIMIT
    } else {
        requested.min(MAX_QUERY_LIMIT)
    }
}

/// Builds the AND-combined predicate from every non-empty filter field.
fn predicate_from_filter(filter: &QueryFilter) -> Predicate {
    Predicate {
        service_name: filter.service_name.clone().filter(|s| !s.is_empty()),
        level: filter.level.clone(),
        trace_id: filter.trace_id.clone().filter(|s| !s.is_empty()),
        metadata: filter
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        start_time: filter.start_time,
        end_time: filter.end_time,
    }
}
