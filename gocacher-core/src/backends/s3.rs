//! S3 remote cache.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use crate::aws::{load_sdk_config, BucketEndpointResolver, CloudAccessConfig};
use crate::error::{Error, Result};

use super::{RemoteCache, RemoteEntry};

/// Object metadata key holding the output id of an action.
const OUTPUT_ID_METADATA_KEY: &str = "outputid";

/// Remote cache storing one object per action in an S3 bucket.
///
/// Objects live at `cache/{prefix}/{goarch}/{goos}/{action_id}` so that
/// different toolchains and key generations never collide.
#[derive(Debug, Clone)]
pub struct S3Cache {
    client: Client,
    bucket: String,
    prefix: String,
    custom_endpoint: bool,
    verbose: bool,
}

impl S3Cache {
    /// Wraps an already configured client. `custom_endpoint` records whether
    /// the client resolves endpoints through a [`BucketEndpointResolver`].
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        custom_endpoint: bool,
        verbose: bool,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            custom_endpoint,
            verbose,
        }
    }

    /// Builds the client from resolved access settings.
    ///
    /// A base endpoint in `access` installs a [`BucketEndpointResolver`];
    /// otherwise the SDK resolves endpoints itself. No network calls are made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the base endpoint is malformed and
    /// [`Error::Credentials`] if a named profile cannot be loaded.
    pub async fn from_access_config(
        access: &CloudAccessConfig,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        verbose: bool,
    ) -> Result<Self> {
        let resolver = access
            .base_endpoint
            .as_deref()
            .map(BucketEndpointResolver::new)
            .transpose()?;

        let sdk_config = load_sdk_config(access).await?;
        let mut config = aws_sdk_s3::config::Builder::from(&sdk_config);
        let custom_endpoint = resolver.is_some();
        if let Some(resolver) = resolver {
            config = config.endpoint_resolver(resolver);
        }

        let cache = Self::new(
            Client::from_conf(config.build()),
            bucket,
            prefix,
            custom_endpoint,
            verbose,
        );

        info!(
            bucket = %cache.bucket,
            prefix = %cache.prefix,
            region = %access.region,
            custom_endpoint,
            "Initialized S3 cache"
        );
        Ok(cache)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether the client resolves endpoints through a user supplied base.
    pub fn has_custom_endpoint(&self) -> bool {
        self.custom_endpoint
    }

    fn action_key(&self, action_id: &str) -> String {
        format!(
            "cache/{}/{}/{}/{}",
            self.prefix,
            go_arch(),
            go_os(),
            action_id
        )
    }

    fn s3_error(&self, message: String) -> Error {
        Error::S3 {
            bucket: self.bucket.clone(),
            message,
        }
    }
}

/// Architecture name as the Go toolchain spells it.
fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "s390x" => "s390x",
        other => other,
    }
}

fn go_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

#[async_trait]
impl RemoteCache for S3Cache {
    async fn get(&self, action_id: &str) -> Result<Option<RemoteEntry>> {
        let key = self.action_key(action_id);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let no_such_key = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                let not_found = err
                    .raw_response()
                    .map(|raw| raw.status().as_u16() == 404)
                    .unwrap_or(false);
                if no_such_key || not_found {
                    if self.verbose {
                        debug!(key = %key, "s3 miss");
                    }
                    return Ok(None);
                }
                return Err(self.s3_error(format!(
                    "get {} failed: {}",
                    key,
                    DisplayErrorContext(&err)
                )));
            }
        };

        let output_id = output
            .metadata()
            .and_then(|metadata| metadata.get(OUTPUT_ID_METADATA_KEY))
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| self.s3_error(format!("object {} has no output id metadata", key)))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| self.s3_error(format!("reading {} failed: {}", key, e)))?
            .into_bytes();

        if self.verbose {
            debug!(key = %key, output_id = %output_id, size = body.len(), "s3 hit");
        }
        Ok(Some(RemoteEntry { output_id, body }))
    }

    async fn put(&self, action_id: &str, output_id: &str, body: Bytes) -> Result<()> {
        let key = self.action_key(action_id);
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_length(size as i64)
            .metadata(OUTPUT_ID_METADATA_KEY, output_id)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                self.s3_error(format!("put {} failed: {}", key, DisplayErrorContext(&err)))
            })?;

        if self.verbose {
            debug!(key = %key, output_id, size, "s3 put");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
