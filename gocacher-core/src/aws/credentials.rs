//! Cloud access configuration resolved from environment signals.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_types::os_shim_internal::{Env as ProcessEnv, Fs};

use crate::env::{self, Env};
use crate::error::{Error, Result};

/// Credentials used to reach the object store.
#[derive(Clone, PartialEq, Eq)]
pub enum CloudCredentials {
    /// Explicit access key pair.
    StaticKeyPair {
        access_key: String,
        secret_key: String,
    },
    /// Profile from the shared AWS config and credentials files.
    NamedProfile { profile: String },
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticKeyPair { access_key, .. } => f
                .debug_struct("StaticKeyPair")
                .field("access_key", access_key)
                .field("secret_key", &"** redacted **")
                .finish(),
            Self::NamedProfile { profile } => f
                .debug_struct("NamedProfile")
                .field("profile", profile)
                .finish(),
        }
    }
}

/// Resolved cloud access settings.
///
/// `region` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudAccessConfig {
    pub region: String,
    pub credentials: CloudCredentials,
    /// Custom endpoint base, only attached for static key pairs.
    pub base_endpoint: Option<String>,
    pub profile_files: ProfileFileLocations,
}

/// Shared config and credentials file overrides. `None` keeps the SDK's
/// default location for that file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFileLocations {
    pub config: Option<PathBuf>,
    pub credentials: Option<PathBuf>,
}

impl ProfileFileLocations {
    pub fn from_env(env: &dyn Env) -> Self {
        Self {
            config: env.get(env::AWS_CONFIG_FILE).map(PathBuf::from),
            credentials: env.get(env::AWS_SHARED_CREDENTIALS_FILE).map(PathBuf::from),
        }
    }

    fn profile_files(&self) -> ProfileFiles {
        let builder = ProfileFiles::builder();
        let builder = match &self.config {
            Some(path) => builder.with_file(ProfileFileKind::Config, path),
            None => builder.include_default_config_file(true),
        };
        let builder = match &self.credentials {
            Some(path) => builder.with_file(ProfileFileKind::Credentials, path),
            None => builder.include_default_credentials_file(true),
        };
        builder.build()
    }
}

/// Resolves cloud access from the environment.
///
/// Returns `None` when no region is set, or when a region is set without a
/// complete key pair or a profile. A key pair takes precedence over a
/// profile; a lone access key or secret key counts as absent.
pub fn resolve_cloud_access(env: &dyn Env) -> Option<CloudAccessConfig> {
    let region = env.get(env::AWS_REGION)?;

    if let (Some(access_key), Some(secret_key)) =
        (env.get(env::AWS_ACCESS_KEY), env.get(env::AWS_SECRET_KEY))
    {
        return Some(CloudAccessConfig {
            region,
            credentials: CloudCredentials::StaticKeyPair {
                access_key,
                secret_key,
            },
            base_endpoint: env.get(env::S3_ENDPOINT),
            profile_files: ProfileFileLocations::from_env(env),
        });
    }

    env.get(env::AWS_CREDS_PROFILE)
        .map(|profile| CloudAccessConfig {
            region,
            credentials: CloudCredentials::NamedProfile { profile },
            base_endpoint: None,
            profile_files: ProfileFileLocations::from_env(env),
        })
}

/// Loads the AWS SDK configuration for the resolved access settings.
///
/// Loading reads the shared config files but makes no network calls;
/// credentials are fetched lazily by the client.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if a named profile is missing from the
/// shared files or the files cannot be parsed.
pub async fn load_sdk_config(access: &CloudAccessConfig) -> Result<SdkConfig> {
    let profile_files = access.profile_files.profile_files();
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(access.region.clone()))
        .profile_files(profile_files.clone());

    match &access.credentials {
        CloudCredentials::StaticKeyPair {
            access_key,
            secret_key,
        } => {
            let creds = Credentials::new(access_key, secret_key, None, None, "gocacher-static");
            loader = loader.credentials_provider(creds);
        }
        CloudCredentials::NamedProfile { profile } => {
            ensure_profile_exists(profile, &profile_files).await?;
            loader = loader.profile_name(profile);
        }
    }

    Ok(loader.load().await)
}

async fn ensure_profile_exists(profile: &str, profile_files: &ProfileFiles) -> Result<()> {
    let credentials_error = |message: String| Error::Credentials {
        profile: profile.to_string(),
        message,
    };

    let profiles = aws_config::profile::load(
        &Fs::real(),
        &ProcessEnv::real(),
        profile_files,
        Some(Cow::Owned(profile.to_string())),
    )
    .await
    .map_err(|e| credentials_error(e.to_string()))?;

    if profiles.get_profile(profile).is_none() {
        return Err(credentials_error(
            "not found in the shared config or credentials files".to_string(),
        ));
    }
    Ok(())
}
