//! Cache backends and the traits they implement.

mod combined;
mod disk;
mod http;
mod logging;
mod s3;
mod stats;

pub use combined::{CombinedCache, RemoteSnapshot};
pub use disk::DiskCache;
pub use http::HttpCache;
pub use logging::LoggingCache;
pub use s3::S3Cache;
pub use stats::{CacheStats, StatsSnapshot};

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A local cache hit: the output id and where its body lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub output_id: String,
    pub disk_path: PathBuf,
}

/// A remote cache hit with the body fetched into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub output_id: String,
    pub body: Bytes,
}

/// Cache whose outputs live on the local filesystem.
///
/// This is the capability the protocol runner drives. Action and output ids
/// are lowercase hex strings.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Looks up an action. Misses return `Ok(None)`.
    async fn get(&self, action_id: &str) -> Result<Option<OutputEntry>>;

    /// Stores an output for an action and returns the path of the stored body.
    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<PathBuf>;

    /// Flushes pending work. Called once before the process exits.
    async fn close(&self) -> Result<()>;
}

/// Cache reached over the network.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetches an action. Misses return `Ok(None)`.
    async fn get(&self, action_id: &str) -> Result<Option<RemoteEntry>>;

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
