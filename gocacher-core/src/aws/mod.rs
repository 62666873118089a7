//! AWS configuration: credential resolution and bucket-scoped endpoints.

mod credentials;
mod endpoint;

pub use credentials::{
    load_sdk_config, resolve_cloud_access, CloudAccessConfig, CloudCredentials,
    ProfileFileLocations,
};
pub use endpoint::{resolve_bucket_endpoint, BucketEndpointResolver};
