//! Composition of the local tier and the optional remote tier into the one
//! cache handed to the protocol runner.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::backends::{CombinedCache, DiskCache, LocalCache, LoggingCache, OutputEntry};
use crate::env::{self, Env};
use crate::error::{Error, Result};
use crate::selector::{select_remote, RemoteBackend};

/// Subdirectory of the user cache dir used when `GOCACHE_DISK_DIR` is unset.
pub const DEFAULT_CACHE_SUBDIR: &str = "go-cacher";

/// The three shapes a composed cache can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeShape {
    Local,
    Logged,
    Combined,
}

/// The cache served to the Go toolchain.
pub enum CacheFacade {
    /// Bare disk cache.
    Local(DiskCache),
    /// Disk cache with stats logging.
    Logged(LoggingCache),
    /// Disk cache in front of a remote tier.
    Combined(CombinedCache<RemoteBackend>),
}

impl CacheFacade {
    pub fn shape(&self) -> FacadeShape {
        match self {
            Self::Local(_) => FacadeShape::Local,
            Self::Logged(_) => FacadeShape::Logged,
            Self::Combined(_) => FacadeShape::Combined,
        }
    }

    /// The remote tier, present only for combined caches.
    pub fn remote(&self) -> Option<&RemoteBackend> {
        match self {
            Self::Combined(cache) => Some(cache.remote()),
            _ => None,
        }
    }

    pub fn local(&self) -> &DiskCache {
        match self {
            Self::Local(cache) => cache,
            Self::Logged(cache) => cache.inner(),
            Self::Combined(cache) => cache.local(),
        }
    }
}

#[async_trait]
impl LocalCache for CacheFacade {
    async fn get(&self, action_id: &str) -> Result<Option<OutputEntry>> {
        match self {
            Self::Local(cache) => cache.get(action_id).await,
            Self::Logged(cache) => cache.get(action_id).await,
            Self::Combined(cache) => cache.get(action_id).await,
        }
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<PathBuf> {
        match self {
            Self::Local(cache) => cache.put(action_id, output_id, body).await,
            Self::Logged(cache) => cache.put(action_id, output_id, body).await,
            Self::Combined(cache) => cache.put(action_id, output_id, body).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::Local(cache) => cache.close().await,
            Self::Logged(cache) => cache.close().await,
            Self::Combined(cache) => cache.close().await,
        }
    }
}

/// Layers the local cache with the selected remote.
///
/// With a remote the verbose flag goes to the combined cache's own
/// instrumentation; without one it decides whether the disk cache gets the
/// logging decorator.
pub fn compose(local: DiskCache, remote: Option<RemoteBackend>, verbose: bool) -> CacheFacade {
    match remote {
        Some(remote) => CacheFacade::Combined(CombinedCache::new(local, remote, verbose)),
        None if verbose => CacheFacade::Logged(LoggingCache::new(local)),
        None => CacheFacade::Local(local),
    }
}

/// Directory for the local cache: `GOCACHE_DISK_DIR`, else the platform user
/// cache dir joined with [`DEFAULT_CACHE_SUBDIR`].
///
/// # Errors
///
/// Returns [`Error::CacheDir`] if no platform cache dir exists.
pub fn local_cache_dir(env: &dyn Env) -> Result<PathBuf> {
    if let Some(dir) = env.get(env::DISK_CACHE_DIR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|dir| dir.join(DEFAULT_CACHE_SUBDIR))
        .ok_or(Error::CacheDir)
}

/// Resolves every tier from `env` and composes the cache.
///
/// # Errors
///
/// Any malformed configuration aborts composition; absent configuration
/// only disables the corresponding tier.
pub async fn build_cache(env: &dyn Env, verbose: bool) -> Result<CacheFacade> {
    let dir = local_cache_dir(env)?;
    let local = DiskCache::new(&dir, verbose)?;
    let remote = select_remote(env, verbose).await?;

    info!(
        dir = %dir.display(),
        remote = remote.as_ref().map(RemoteBackend::name).unwrap_or("none"),
        verbose,
        "cache configured"
    );

    Ok(compose(local, remote, verbose))
}
