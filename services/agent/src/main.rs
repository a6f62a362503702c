//! tracedeck agent
//!
//! Headless watcher for Inspektor Gadget trace jobs. It polls the seccomp
//! and biolatency trace resources, logs lifecycle transitions and job
//! errors, and keeps the seccomp policy buckets of one namespace (or all
//! namespaces) refreshed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tracedeck_agent::config::Config;
use tracedeck_agent::plugin::{builtin_plugins, RecordingRegistry};
use tracedeck_agent::reconciler::{Reconciler, ReconcilerConfig};
use tracedeck_agent::KubeClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tracedeck agent");
    info!(
        api_url = %config.cluster.api_url,
        namespace = config.namespace.as_ref().map(|n| n.as_str()).unwrap_or("*"),
        jobs = ?config.jobs,
        "Configuration loaded"
    );

    let mut registry = RecordingRegistry::default();
    let failed = registry.install(&builtin_plugins());
    if !failed.is_empty() {
        error!(plugins = ?failed, "Plugin initialization failed");
    }
    info!(
        routes = registry.routes.len(),
        sidebar_items = registry.sidebar_items.len(),
        "Plugins registered"
    );

    let cluster = Arc::new(KubeClient::new(config.cluster.clone())?);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = Reconciler::new(
        cluster,
        config.jobs.clone(),
        config.namespace.clone(),
        ReconcilerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
        },
    );
    let mut reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
            info!("Reconciler exited");
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);
    if !reconciler_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), reconciler_handle).await;
    }

    info!("Agent shutdown complete");
    Ok(())
}
