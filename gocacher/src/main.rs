//! go-cacher: a `GOCACHEPROG` helper for the Go toolchain.
//!
//! Point `GOCACHEPROG` at this binary. Stdout carries the protocol, so all
//! logging goes to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gocacher_core::{build_cache, CacheProc, OsEnv};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "go-cacher")]
#[command(about = "GOCACHEPROG helper with a local disk tier and optional S3 or HTTP remote tier")]
struct Cli {
    /// Log cache statistics and per-request details
    #[arg(long, env = "GOCACHE_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let env = OsEnv;
    let cache = tokio::select! {
        cache = build_cache(&env, cli.verbose) => {
            cache.context("Failed to configure cache backends")?
        }
        _ = shutdown_signal() => {
            info!("Shutdown during startup");
            return Ok(());
        }
    };

    let runner = CacheProc::new(Arc::new(cache));
    runner
        .run_until(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await
        .context("Cache protocol failed")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
