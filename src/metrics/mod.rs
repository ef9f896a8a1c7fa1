//! Prometheus metrics for the cluster monitor.
//!
//! The monitor's own counters live in a `prometheus` registry; per-node
//! replication facts are additionally rendered as hand-built exposition
//! lines (`metric{instance="<host>"} <value>`) appended to the /metrics
//! body, matching the external reporting contract.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Monitor metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    /// Monitoring ticks completed
    pub ticks_total: IntCounter,
    /// Node refreshes that failed or timed out, by node
    pub refresh_errors_total: IntCounterVec,
    /// Current node count by health state
    pub node_states: IntGaugeVec,
    /// Whether every node is up (has_all_db_up)
    pub cluster_all_db_up: IntGauge,
    /// Whether the whole fleet is provisioned
    pub cluster_provisioned: IntGauge,
    /// Whether the resolved master is absent or failed
    pub cluster_master_failed: IntGauge,
    /// Open alerts in the registry
    pub alerts_open: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ticks_total = IntCounter::new(
            "argus_ticks_total",
            "Total number of monitoring ticks completed",
        )
        .unwrap();

        let refresh_errors_total = IntCounterVec::new(
            Opts::new(
                "argus_refresh_errors_total",
                "Total number of failed or timed out node refreshes",
            ),
            &["node"],
        )
        .unwrap();

        let node_states = IntGaugeVec::new(
            Opts::new(
                "argus_node_states",
                "Current number of nodes by health state",
            ),
            &["state"],
        )
        .unwrap();

        let cluster_all_db_up = IntGauge::new(
            "argus_cluster_all_db_up",
            "1 when no node is failed or suspect, 0 otherwise",
        )
        .unwrap();

        let cluster_provisioned = IntGauge::new(
            "argus_cluster_provisioned",
            "1 when every node and proxy is provisioned, 0 otherwise",
        )
        .unwrap();

        let cluster_master_failed = IntGauge::new(
            "argus_cluster_master_failed",
            "1 when the resolved master is absent or failed, 0 otherwise",
        )
        .unwrap();

        let alerts_open = IntGauge::new("argus_alerts_open", "Number of open alerts").unwrap();

        registry.register(Box::new(ticks_total.clone())).unwrap();
        registry
            .register(Box::new(refresh_errors_total.clone()))
            .unwrap();
        registry.register(Box::new(node_states.clone())).unwrap();
        registry
            .register(Box::new(cluster_all_db_up.clone()))
            .unwrap();
        registry
            .register(Box::new(cluster_provisioned.clone()))
            .unwrap();
        registry
            .register(Box::new(cluster_master_failed.clone()))
            .unwrap();
        registry.register(Box::new(alerts_open.clone())).unwrap();

        Self {
            registry,
            ticks_total,
            refresh_errors_total,
            node_states,
            cluster_all_db_up,
            cluster_provisioned,
            cluster_master_failed,
            alerts_open,
        }
    }

    pub fn record_tick(&self) {
        self.ticks_total.inc();
    }

    pub fn record_refresh_error(&self, node: &str) {
        self.refresh_errors_total.with_label_values(&[node]).inc();
    }

    pub fn set_node_state_counts(&self, counts: &[(&str, i64)]) {
        for (state, count) in counts {
            self.node_states.with_label_values(&[state]).set(*count);
        }
    }

    pub fn set_cluster_facts(&self, all_db_up: bool, provisioned: bool, master_failed: bool) {
        self.cluster_all_db_up.set(all_db_up as i64);
        self.cluster_provisioned.set(provisioned as i64);
        self.cluster_master_failed.set(master_failed as i64);
    }

    pub fn set_alerts_open(&self, count: i64) {
        self.alerts_open.set(count);
    }

    /// Registry contents in Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server.
///
/// /metrics serves the registry plus one exposition line per node metric;
/// /health answers OK.
pub async fn start_metrics_server(
    addr: &str,
    cluster: std::sync::Arc<crate::cluster::Cluster>,
) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
        cluster: Arc<crate::cluster::Cluster>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        match req.uri().path() {
            "/metrics" => {
                let mut body = metrics().gather();
                for node in cluster.nodes() {
                    body.push_str(&node.exposition_lines());
                }
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap())
            }
            "/health" => Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
                .unwrap()),
            _ => Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("Not Found")))
                .unwrap()),
        }
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let cluster = cluster.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, cluster.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_gather_contains_registered_series() {
        let m = Metrics::new();
        m.record_tick();
        m.set_cluster_facts(true, false, true);
        m.set_node_state_counts(&[("running", 2), ("failed", 1)]);
        let body = m.gather();
        assert!(body.contains("argus_ticks_total 1"));
        assert!(body.contains("argus_cluster_all_db_up 1"));
        assert!(body.contains("argus_cluster_provisioned 0"));
        assert!(body.contains("argus_cluster_master_failed 1"));
        assert!(body.contains("argus_node_states{state=\"running\"} 2"));
    }
}
