//! Remote backend selection.
//!
//! Object storage is tried first, then HTTP. The first configuration that
//! activates wins; nothing is merged.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::aws::resolve_cloud_access;
use crate::backends::{HttpCache, RemoteCache, RemoteEntry, S3Cache};
use crate::env::{self, Env};
use crate::error::Result;

/// Prefix for S3 object keys when `GOCACHE_CACHE_KEY` is unset.
pub const DEFAULT_CACHE_KEY: &str = "v1";

/// The single remote tier chosen for this process.
#[derive(Debug, Clone)]
pub enum RemoteBackend {
    ObjectStorage(S3Cache),
    Http(HttpCache),
}

impl RemoteBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectStorage(_) => "s3",
            Self::Http(_) => "http",
        }
    }
}

#[async_trait]
impl RemoteCache for RemoteBackend {
    async fn get(&self, action_id: &str) -> Result<Option<RemoteEntry>> {
        match self {
            Self::ObjectStorage(cache) => cache.get(action_id).await,
            Self::Http(cache) => cache.get(action_id).await,
        }
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<()> {
        match self {
            Self::ObjectStorage(cache) => cache.put(action_id, output_id, body).await,
            Self::Http(cache) => cache.put(action_id, output_id, body).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::ObjectStorage(cache) => cache.close().await,
            Self::Http(cache) => cache.close().await,
        }
    }
}

/// Picks the remote backend, if any.
///
/// # Errors
///
/// Returns an error if an activated backend cannot be constructed, e.g. a
/// malformed S3 endpoint override.
pub async fn select_remote(env: &dyn Env, verbose: bool) -> Result<Option<RemoteBackend>> {
    if let Some(s3) = maybe_s3_cache(env, verbose).await? {
        return Ok(Some(RemoteBackend::ObjectStorage(s3)));
    }
    if let Some(http) = maybe_http_cache(env, verbose)? {
        return Ok(Some(RemoteBackend::Http(http)));
    }
    debug!("no remote cache configured");
    Ok(None)
}

/// Builds the S3 cache when a bucket and cloud access are both configured.
pub async fn maybe_s3_cache(env: &dyn Env, verbose: bool) -> Result<Option<S3Cache>> {
    let access = resolve_cloud_access(env);
    let bucket = env.get(env::S3_BUCKET);

    let (Some(bucket), Some(access)) = (bucket, access) else {
        debug!("S3 cache inactive: needs {} and cloud credentials", env::S3_BUCKET);
        return Ok(None);
    };

    let prefix = env
        .get(env::CACHE_KEY)
        .unwrap_or_else(|| DEFAULT_CACHE_KEY.to_string());

    S3Cache::from_access_config(&access, bucket, prefix, verbose)
        .await
        .map(Some)
}

/// Builds the HTTP cache when a server base is configured.
pub fn maybe_http_cache(env: &dyn Env, verbose: bool) -> Result<Option<HttpCache>> {
    let Some(server_base) = env.get(env::HTTP_SERVER_BASE) else {
        return Ok(None);
    };
    debug!(server_base = %server_base, "HTTP cache selected");
    HttpCache::new(&server_base, verbose).map(Some)
}
