//! Bucket-scoped endpoint resolution for S3-compatible services.
//!
//! A single user supplied endpoint serves any bucket: the bucket becomes the
//! first path segment and the region travels in the query string.

use aws_sdk_s3::config::endpoint::{Endpoint, EndpointFuture, Params, ResolveEndpoint};
use url::Url;

use crate::error::{Error, Result};

/// Builds `{base}/{bucket}?region={region}`.
///
/// The bucket is percent-encoded as a single path segment; the query string
/// is omitted entirely when no region is given.
///
/// # Errors
///
/// Returns [`Error::InvalidEndpoint`] if `base` is not an absolute URL that
/// can carry a path.
pub fn resolve_bucket_endpoint(base: &str, bucket: &str, region: Option<&str>) -> Result<Url> {
    build_endpoint(base, Some(bucket), region)
}

fn parse_base(base: &str) -> Result<Url> {
    let url = Url::parse(base).map_err(|e| Error::InvalidEndpoint {
        endpoint: base.to_string(),
        message: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidEndpoint {
            endpoint: base.to_string(),
            message: "endpoint cannot carry a path".to_string(),
        });
    }
    Ok(url)
}

fn build_endpoint(base: &str, bucket: Option<&str>, region: Option<&str>) -> Result<Url> {
    let mut url = parse_base(base)?;

    if let Some(bucket) = bucket {
        let mut segments = url.path_segments_mut().map_err(|_| Error::InvalidEndpoint {
            endpoint: base.to_string(),
            message: "endpoint cannot carry a path".to_string(),
        })?;
        segments.pop_if_empty().push(bucket);
    }

    if let Some(region) = region {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "region")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("region", region);
    }

    Ok(url)
}

/// S3 endpoint resolver that embeds the bucket in the path of a fixed base.
///
/// The SDK builds requests from the scheme, authority and path of the
/// resolved endpoint; the `region` query does not reach the server.
#[derive(Debug, Clone)]
pub struct BucketEndpointResolver {
    base: String,
}

impl BucketEndpointResolver {
    /// Creates a resolver, validating the base endpoint up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] for a malformed base.
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let base = base.into();
        parse_base(&base)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Resolves the endpoint for a request. Requests without a bucket resolve
    /// to the base itself.
    pub fn resolve(&self, bucket: Option<&str>, region: Option<&str>) -> Result<Url> {
        build_endpoint(&self.base, bucket, region)
    }
}

impl ResolveEndpoint for BucketEndpointResolver {
    fn resolve_endpoint<'a>(&'a self, params: &'a Params) -> EndpointFuture<'a> {
        let endpoint = self
            .resolve(params.bucket(), params.region())
            .map(|url| Endpoint::builder().url(url.to_string()).build())
            .map_err(Into::into);
        EndpointFuture::ready(endpoint)
    }
}
