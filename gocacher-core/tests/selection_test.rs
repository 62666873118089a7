//! Backend selection and composition scenarios.

use gocacher_core::env::{self, MapEnv};
use gocacher_core::{build_cache, select_remote, Error, FacadeShape, RemoteBackend};
use tempfile::TempDir;

fn base_env(temp_dir: &TempDir) -> MapEnv {
    MapEnv::new().with(env::DISK_CACHE_DIR, temp_dir.path().to_string_lossy())
}

#[tokio::test]
async fn test_nothing_configured_selects_no_remote() {
    let env = MapEnv::new();
    assert!(select_remote(&env, false).await.unwrap().is_none());
}

#[tokio::test]
async fn test_local_only_shape_depends_on_verbose() {
    let temp_dir = TempDir::new().unwrap();
    let env = base_env(&temp_dir);

    let quiet = build_cache(&env, false).await.unwrap();
    assert_eq!(quiet.shape(), FacadeShape::Local);
    assert!(quiet.remote().is_none());

    let verbose = build_cache(&env, true).await.unwrap();
    assert_eq!(verbose.shape(), FacadeShape::Logged);
    assert_eq!(verbose.local().dir(), temp_dir.path());
}

#[tokio::test]
async fn test_empty_region_falls_through_to_http() {
    let temp_dir = TempDir::new().unwrap();
    let env = base_env(&temp_dir)
        .with(env::AWS_REGION, "")
        .with(env::S3_BUCKET, "b")
        .with(env::HTTP_SERVER_BASE, "https://h");

    let cache = build_cache(&env, false).await.unwrap();
    assert_eq!(cache.shape(), FacadeShape::Combined);
    match cache.remote() {
        Some(RemoteBackend::Http(http)) => assert_eq!(http.base_url(), "https://h"),
        _ => panic!("expected HTTP remote"),
    }
}

#[tokio::test]
async fn test_static_pair_selects_s3_with_default_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let env = base_env(&temp_dir)
        .with(env::AWS_REGION, "r")
        .with(env::AWS_ACCESS_KEY, "a")
        .with(env::AWS_SECRET_KEY, "s")
        .with(env::S3_BUCKET, "b");

    let cache = build_cache(&env, false).await.unwrap();
    assert_eq!(cache.shape(), FacadeShape::Combined);
    match cache.remote() {
        Some(RemoteBackend::ObjectStorage(s3)) => {
            assert_eq!(s3.bucket(), "b");
            assert_eq!(s3.prefix(), "v1");
            assert!(!s3.has_custom_endpoint());
        }
        _ => panic!("expected S3 remote"),
    }
}

/// Points the shared AWS files into `temp_dir`, with `credentials` as the
/// credentials file contents.
fn with_profile_files(env: MapEnv, temp_dir: &TempDir, credentials: &str) -> MapEnv {
    let credentials_file = temp_dir.path().join("aws-credentials");
    std::fs::write(&credentials_file, credentials).unwrap();
    env.with(
        env::AWS_SHARED_CREDENTIALS_FILE,
        credentials_file.to_string_lossy(),
    )
    .with(
        env::AWS_CONFIG_FILE,
        temp_dir.path().join("aws-config").to_string_lossy(),
    )
}

#[tokio::test]
async fn test_s3_wins_over_http() {
    let temp_dir = TempDir::new().unwrap();
    let env = MapEnv::new()
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_CREDS_PROFILE, "default")
        .with(env::S3_BUCKET, "bucket")
        .with(env::CACHE_KEY, "v7")
        .with(env::HTTP_SERVER_BASE, "https://cache.example.com");
    let env = with_profile_files(
        env,
        &temp_dir,
        "[default]\naws_access_key_id = a\naws_secret_access_key = s\n",
    );

    let remote = select_remote(&env, false).await.unwrap();
    match remote {
        Some(RemoteBackend::ObjectStorage(s3)) => assert_eq!(s3.prefix(), "v7"),
        _ => panic!("expected S3 remote"),
    }
}

#[tokio::test]
async fn test_missing_profile_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let env = base_env(&temp_dir)
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_CREDS_PROFILE, "profile-that-does-not-exist")
        .with(env::S3_BUCKET, "bucket")
        .with(env::HTTP_SERVER_BASE, "https://h");
    let env = with_profile_files(env, &temp_dir, "");

    assert!(matches!(
        select_remote(&env, false).await,
        Err(Error::Credentials { .. })
    ));
    assert!(matches!(
        build_cache(&env, false).await,
        Err(Error::Credentials { .. })
    ));
}

#[tokio::test]
async fn test_bucket_without_credentials_uses_http() {
    let env = MapEnv::new()
        .with(env::AWS_REGION, "us-east-1")
        .with(env::S3_BUCKET, "bucket")
        .with(env::HTTP_SERVER_BASE, "http://localhost:8080");

    let remote = select_remote(&env, false).await.unwrap();
    assert!(matches!(remote, Some(RemoteBackend::Http(_))));
}

#[tokio::test]
async fn test_credentials_without_bucket_is_inactive() {
    let env = MapEnv::new()
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_ACCESS_KEY, "a")
        .with(env::AWS_SECRET_KEY, "s");

    assert!(select_remote(&env, false).await.unwrap().is_none());
}

#[tokio::test]
async fn test_endpoint_override_installs_bucket_resolver() {
    let env = MapEnv::new()
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_ACCESS_KEY, "a")
        .with(env::AWS_SECRET_KEY, "s")
        .with(env::S3_ENDPOINT, "http://minio:9000")
        .with(env::S3_BUCKET, "bucket");

    match select_remote(&env, false).await.unwrap() {
        Some(RemoteBackend::ObjectStorage(s3)) => assert!(s3.has_custom_endpoint()),
        _ => panic!("expected S3 remote"),
    }
}

#[tokio::test]
async fn test_malformed_endpoint_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let env = base_env(&temp_dir)
        .with(env::AWS_REGION, "us-east-1")
        .with(env::AWS_ACCESS_KEY, "a")
        .with(env::AWS_SECRET_KEY, "s")
        .with(env::S3_ENDPOINT, "minio:9000 with spaces")
        .with(env::S3_BUCKET, "bucket")
        .with(env::HTTP_SERVER_BASE, "https://h");

    let result = build_cache(&env, false).await;
    assert!(matches!(result, Err(Error::InvalidEndpoint { .. })));
}
