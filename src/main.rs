mod alerts;
mod cluster;
mod config;
mod conn;
mod metrics;
mod monitor;
mod node;

use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use alerts::AlertRegistry;
use cluster::Cluster;
use config::Config;
use conn::Connector;
use monitor::Monitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_configuration()?;

    let cluster = Arc::new(Cluster::from_config(&config.cluster, &config.db));
    let (alerts, mut alert_events) = AlertRegistry::new();
    let connector = Arc::new(Connector::from_config(&config.tls, &config.db, alerts.clone())?);

    info!(
        cluster = cluster.name(),
        nodes = cluster.nodes().len(),
        proxies = cluster.proxies().len(),
        tls = config.tls.enabled,
        "Cluster configured"
    );

    if !config.monitor.metrics_addr.is_empty() {
        let addr = config.monitor.metrics_addr.clone();
        let cluster = cluster.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(&addr, cluster).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // Drain alert events on behalf of the external reporting layer; in this
    // process they only feed the open-alerts gauge.
    {
        let alerts = alerts.clone();
        tokio::spawn(async move {
            while alert_events.recv().await.is_some() {
                metrics::metrics().set_alerts_open(alerts.open_count() as i64);
            }
        });
    }

    let monitor = Monitor::new(cluster, connector, alerts, &config.monitor);
    let cancel = monitor.cancellation_token();

    tokio::select! {
        _ = monitor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    }

    Ok(())
}

fn load_configuration() -> anyhow::Result<Config> {
    let mut paths = vec!["config/argus.toml".to_string(), "argus.toml".to_string()];
    if let Some(path) = std::env::args().nth(1) {
        paths.insert(0, path);
    }

    for path in &paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = %path, "Loaded configuration");
                return Ok(config);
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load config");
            }
        }
    }

    anyhow::bail!(
        "no usable configuration file found (tried {})",
        paths.join(", ")
    )
}
