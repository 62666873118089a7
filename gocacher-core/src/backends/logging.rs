//! Stats-logging decorator for a local-only cache.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::Result;

use super::disk::DiskCache;
use super::stats::{CacheStats, StatsSnapshot};
use super::{LocalCache, OutputEntry};

/// Wraps a [`DiskCache`], counting and logging every operation.
///
/// Reads and writes pass through untouched; the summary is logged on close.
#[derive(Debug)]
pub struct LoggingCache {
    inner: DiskCache,
    stats: CacheStats,
}

impl LoggingCache {
    pub fn new(inner: DiskCache) -> Self {
        Self {
            inner,
            stats: CacheStats::new(),
        }
    }

    pub fn inner(&self) -> &DiskCache {
        &self.inner
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[async_trait]
impl LocalCache for LoggingCache {
    async fn get(&self, action_id: &str) -> Result<Option<OutputEntry>> {
        let result = self.inner.get(action_id).await;
        match &result {
            Ok(Some(entry)) => {
                self.stats.record_hit();
                debug!(action_id, output_id = %entry.output_id, "get hit");
            }
            Ok(None) => {
                self.stats.record_miss();
                debug!(action_id, "get miss");
            }
            Err(e) => {
                self.stats.record_get_error();
                debug!(action_id, error = %e, "get failed");
            }
        }
        result
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<PathBuf> {
        let size = body.len();
        let result = self.inner.put(action_id, output_id, body).await;
        match &result {
            Ok(_) => {
                self.stats.record_put();
                debug!(action_id, output_id, size, "put");
            }
            Err(e) => {
                self.stats.record_put_error();
                debug!(action_id, output_id, error = %e, "put failed");
            }
        }
        result
    }

    async fn close(&self) -> Result<()> {
        let stats = self.stats.snapshot();
        info!(
            gets = stats.gets,
            hits = stats.hits,
            misses = stats.misses,
            get_errors = stats.get_errors,
            puts = stats.puts,
            put_errors = stats.put_errors,
            hit_rate = %format!("{:.1}%", stats.hit_rate() * 100.0),
            "local cache stats"
        );
        self.inner.close().await
    }
}
