//! Core library for go-cacher, a `GOCACHEPROG` helper for the Go toolchain.
//!
//! Configuration signals decide which tiers are active: a local disk cache
//! is always present, and at most one remote (S3 or HTTP) sits behind it.
//! [`build_cache`] composes the tiers into a [`CacheFacade`] which
//! [`CacheProc`] serves over stdin/stdout.

pub mod aws;
pub mod backends;
pub mod cacheproc;
pub mod composer;
pub mod env;
pub mod error;
pub mod selector;

pub use aws::{resolve_bucket_endpoint, resolve_cloud_access, CloudAccessConfig, CloudCredentials};
pub use backends::{LocalCache, OutputEntry, RemoteCache, RemoteEntry};
pub use cacheproc::CacheProc;
pub use composer::{build_cache, compose, local_cache_dir, CacheFacade, FacadeShape};
pub use env::{Env, MapEnv, OsEnv};
pub use error::{Error, Result};
pub use selector::{select_remote, RemoteBackend, DEFAULT_CACHE_KEY};
