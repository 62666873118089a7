//! Two-tier cache: local disk in front of one remote cache.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::disk::{validate_id, DiskCache};
use super::stats::{CacheStats, StatsSnapshot};
use super::{LocalCache, OutputEntry, RemoteCache};

#[derive(Debug, Default)]
struct RemoteCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    uploads: AtomicU64,
    upload_errors: AtomicU64,
}

/// Remote-side counters of a [`CombinedCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub uploads: u64,
    pub upload_errors: u64,
}

/// Local cache backed by a remote tier.
///
/// Gets hit the local disk first; a local miss consults the remote and
/// writes the fetched body through to disk. Puts land on disk before
/// returning and are uploaded in the background. `close` waits for pending
/// uploads.
pub struct CombinedCache<R> {
    local: DiskCache,
    remote: Arc<R>,
    verbose: bool,
    stats: CacheStats,
    remote_stats: Arc<RemoteCounters>,
    uploads: Mutex<JoinSet<()>>,
}

impl<R> CombinedCache<R>
where
    R: RemoteCache + 'static,
{
    pub fn new(local: DiskCache, remote: R, verbose: bool) -> Self {
        Self {
            local,
            remote: Arc::new(remote),
            verbose,
            stats: CacheStats::new(),
            remote_stats: Arc::new(RemoteCounters::default()),
            uploads: Mutex::new(JoinSet::new()),
        }
    }

    pub fn local(&self) -> &DiskCache {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn remote_stats(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            hits: self.remote_stats.hits.load(Ordering::Relaxed),
            misses: self.remote_stats.misses.load(Ordering::Relaxed),
            errors: self.remote_stats.errors.load(Ordering::Relaxed),
            uploads: self.remote_stats.uploads.load(Ordering::Relaxed),
            upload_errors: self.remote_stats.upload_errors.load(Ordering::Relaxed),
        }
    }

    async fn wait_for_uploads(&self) {
        let mut uploads = self.uploads.lock().await;
        while let Some(joined) = uploads.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "upload task failed");
            }
        }
    }
}

#[async_trait]
impl<R> LocalCache for CombinedCache<R>
where
    R: RemoteCache + 'static,
{
    async fn get(&self, action_id: &str) -> Result<Option<OutputEntry>> {
        match self.local.get(action_id).await {
            Ok(Some(entry)) => {
                self.stats.record_hit();
                return Ok(Some(entry));
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.record_get_error();
                return Err(e);
            }
        }

        let remote_entry = match self.remote.get(action_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.remote_stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.record_miss();
                return Ok(None);
            }
            Err(e) => {
                warn!(action_id, error = %e, "remote get failed, treating as miss");
                self.remote_stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.record_miss();
                return Ok(None);
            }
        };
        if let Err(e) = validate_id("output id", &remote_entry.output_id) {
            warn!(action_id, error = %e, "remote returned a bad output id, treating as miss");
            self.remote_stats.errors.fetch_add(1, Ordering::Relaxed);
            self.stats.record_miss();
            return Ok(None);
        }
        self.remote_stats.hits.fetch_add(1, Ordering::Relaxed);

        let disk_path = match self
            .local
            .put(action_id, &remote_entry.output_id, remote_entry.body)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                self.stats.record_get_error();
                return Err(e);
            }
        };
        self.stats.record_hit();
        if self.verbose {
            debug!(action_id, output_id = %remote_entry.output_id, "filled local cache from remote");
        }

        Ok(Some(OutputEntry {
            output_id: remote_entry.output_id,
            disk_path,
        }))
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<PathBuf> {
        let disk_path = match self.local.put(action_id, output_id, body.clone()).await {
            Ok(path) => path,
            Err(e) => {
                self.stats.record_put_error();
                return Err(e);
            }
        };
        self.stats.record_put();

        let remote = Arc::clone(&self.remote);
        let counters = Arc::clone(&self.remote_stats);
        let action_id = action_id.to_string();
        let output_id = output_id.to_string();
        let verbose = self.verbose;
        let mut uploads = self.uploads.lock().await;
        // Reap finished uploads.
        while uploads.try_join_next().is_some() {}
        uploads.spawn(async move {
            counters.uploads.fetch_add(1, Ordering::Relaxed);
            match remote.put(&action_id, &output_id, body).await {
                Ok(()) => {
                    if verbose {
                        debug!(action_id = %action_id, output_id = %output_id, "uploaded to remote");
                    }
                }
                Err(e) => {
                    counters.upload_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(action_id = %action_id, output_id = %output_id, error = %e, "remote upload failed");
                }
            }
        });

        Ok(disk_path)
    }

    async fn close(&self) -> Result<()> {
        self.wait_for_uploads().await;

        if self.verbose {
            let stats = self.stats.snapshot();
            let remote = self.remote_stats();
            info!(
                gets = stats.gets,
                hits = stats.hits,
                misses = stats.misses,
                puts = stats.puts,
                remote_hits = remote.hits,
                remote_misses = remote.misses,
                remote_errors = remote.errors,
                uploads = remote.uploads,
                upload_errors = remote.upload_errors,
                "combined cache stats"
            );
        }

        self.remote.close().await?;
        self.local.close().await
    }
}
