//! Configuration signals read from the environment.
//!
//! Every lookup goes through the [`Env`] trait so that backend resolution can
//! be driven from a fixed mapping in tests instead of the process environment.

use std::collections::HashMap;

/// Local disk cache directory. Defaults to the user cache dir + `go-cacher`.
pub const DISK_CACHE_DIR: &str = "GOCACHE_DISK_DIR";

/// Custom S3 endpoint base (MinIO, R2 and friends).
pub const S3_ENDPOINT: &str = "GOCACHE_S3_ENDPOINT";
pub const AWS_REGION: &str = "GOCACHE_AWS_REGION";
pub const AWS_ACCESS_KEY: &str = "GOCACHE_AWS_ACCESS_KEY";
pub const AWS_SECRET_KEY: &str = "GOCACHE_AWS_SECRET_KEY";
pub const AWS_CREDS_PROFILE: &str = "GOCACHE_AWS_CREDS_PROFILE";
pub const S3_BUCKET: &str = "GOCACHE_S3_BUCKET";
/// Shared AWS config file, same meaning as for the AWS CLI.
pub const AWS_CONFIG_FILE: &str = "AWS_CONFIG_FILE";
pub const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
/// Namespacing prefix for S3 object keys.
pub const CACHE_KEY: &str = "GOCACHE_CACHE_KEY";

/// HTTP cache server prefix (scheme and authority only).
pub const HTTP_SERVER_BASE: &str = "GOCACHE_HTTP_SERVER_BASE";

/// Source of configuration signals.
///
/// Implementations return `None` both for unset and for empty values: an
/// empty signal never counts as configured.
pub trait Env: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads signals from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnv;

impl Env for OsEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

/// Fixed signal mapping, mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a signal, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl Env for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|value| !value.is_empty()).cloned()
    }
}
