//! The monitoring loop.
//!
//! One tick refreshes every node's raw status in parallel (each attempt
//! bounded by a timeout so an unreachable node cannot stall the tick),
//! swaps all fresh snapshots in, then evaluates the aggregate predicates.
//! Predicates therefore always read a consistent per-tick view: cookie and
//! state writes happen before any aggregate read of the same tick, and a
//! node that missed its deadline keeps serving its previous snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{codes, AlertRegistry, Severity};
use crate::cluster::{Cluster, Proxy};
use crate::config::MonitorConfig;
use crate::conn::{ConnectError, Connector, MysqlDialer};
use crate::metrics::metrics;
use crate::node::{Flavor, Node, NodeState, NodeStatus, ReplicationStatus};

pub struct Monitor {
    cluster: Arc<Cluster>,
    connector: Arc<Connector<MysqlDialer>>,
    alerts: Arc<AlertRegistry>,
    interval: Duration,
    refresh_timeout: Duration,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(
        cluster: Arc<Cluster>,
        connector: Arc<Connector<MysqlDialer>>,
        alerts: Arc<AlertRegistry>,
        cfg: &MonitorConfig,
    ) -> Self {
        Self {
            cluster,
            connector,
            alerts,
            interval: Duration::from_millis(cfg.interval_ms.max(1)),
            refresh_timeout: Duration::from_millis(cfg.refresh_timeout_ms.max(1)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tick until cancelled. Startup is staggered with a random delay so
    /// several monitor processes do not poll their fleets in phase.
    pub async fn run(&self) {
        let jitter = rand::thread_rng().gen_range(0..self.interval.as_millis().max(2) as u64);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(cluster = self.cluster.name(), "Monitor loop started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(cluster = self.cluster.name(), "Monitor loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One monitoring tick: refresh, swap, evaluate.
    pub async fn tick(&self) {
        let refreshes = join_all(self.cluster.nodes().iter().map(|node| {
            let node = node.clone();
            async move {
                let result =
                    tokio::time::timeout(self.refresh_timeout, self.refresh_node(&node)).await;
                (node, result)
            }
        }))
        .await;

        // all snapshot swaps and state writes land before any predicate
        // runs, so one evaluation never mixes data from two ticks
        for (node, result) in refreshes {
            match result {
                Ok(Ok(status)) => {
                    let new_state = classify(&status);
                    node.apply_status(status);
                    let old_state = node.state();
                    if old_state != new_state {
                        info!(node = node.url(), from = ?old_state, to = ?new_state, "Node state changed");
                        node.set_state(new_state);
                    }
                    self.alerts.resolve(codes::NODE_UNREACHABLE, node.url());
                }
                Ok(Err(e)) => self.note_refresh_failure(&node, Some(&e)),
                Err(_) => self.note_refresh_failure(&node, None),
            }
        }

        self.check_proxies().await;
        self.evaluate();
        metrics().record_tick();
    }

    /// Fetch one node's raw status over a fresh connection.
    async fn refresh_node(&self, node: &Node) -> Result<NodeStatus, ConnectError> {
        let mut conn = self.connector.connect(node).await?;

        let variables: HashMap<String, String> = conn
            .query_kv("SHOW GLOBAL VARIABLES")
            .await?
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        let status_vars = conn.query_kv("SHOW GLOBAL STATUS").await?;

        let version = variables.get("VERSION").cloned().unwrap_or_default();
        let flavor = Flavor::from_version(&version);
        let server_id = variables
            .get("SERVER_ID")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let read_only = variables.get("READ_ONLY").map(String::as_str) == Some("ON");
        let have_mysql_gtid = flavor == Flavor::Mysql
            && variables
                .get("GTID_MODE")
                .map(|v| v.starts_with("ON"))
                .unwrap_or(false);

        let slave_status_sql = match flavor {
            Flavor::MariaDb => "SHOW ALL SLAVES STATUS",
            Flavor::Mysql => "SHOW SLAVE STATUS",
        };
        let replications = conn
            .query_rows(slave_status_sql)
            .await?
            .iter()
            .map(|row| ReplicationStatus::from_row(row, flavor))
            .collect();

        Ok(NodeStatus {
            flavor,
            version,
            server_id,
            have_mysql_gtid,
            read_only,
            replications,
            variables,
            status_vars,
            ..Default::default()
        })
    }

    fn note_refresh_failure(&self, node: &Node, err: Option<&ConnectError>) {
        metrics().record_refresh_error(node.url());
        let old_state = node.state();
        let new_state = state_after_failure(old_state);
        if new_state != old_state {
            match err {
                Some(e) => {
                    warn!(node = node.url(), from = ?old_state, to = ?new_state, error = %e, "Node poll failed")
                }
                None => {
                    warn!(node = node.url(), from = ?old_state, to = ?new_state, "Node poll timed out")
                }
            }
            node.set_state(new_state);
        }
        // the connectivity fact is reported immediately; the health state
        // demotion above stays two-strike
        self.alerts.raise(
            codes::NODE_UNREACHABLE,
            node.url(),
            Severity::Error,
            format!("Node {} is unreachable", node.url()),
        );
    }

    /// Proxies carry no replication state; reachability is the whole check.
    async fn check_proxies(&self) {
        join_all(self.cluster.proxies().iter().map(|px| {
            let px = px.clone();
            async move {
                let reachable = matches!(
                    tokio::time::timeout(
                        self.refresh_timeout,
                        tokio::net::TcpStream::connect(px.url()),
                    )
                    .await,
                    Ok(Ok(_))
                );
                self.note_proxy_check(&px, reachable);
            }
        }))
        .await;
    }

    fn note_proxy_check(&self, px: &Proxy, reachable: bool) {
        let old_state = px.state();
        if reachable {
            if !old_state.is_running() {
                info!(proxy = px.url(), from = ?old_state, "Proxy reachable");
                px.set_state(NodeState::Running);
            }
            self.alerts.resolve(codes::PROXY_UNREACHABLE, px.url());
            return;
        }
        let new_state = state_after_failure(old_state);
        if new_state != old_state {
            warn!(proxy = px.url(), from = ?old_state, to = ?new_state, "Proxy check failed");
            px.set_state(new_state);
        }
        self.alerts.raise(
            codes::PROXY_UNREACHABLE,
            px.url(),
            Severity::Error,
            format!("Proxy {} is unreachable", px.url()),
        );
    }

    /// Fold the tick's per-node facts into the cluster-wide decisions and
    /// publish them.
    fn evaluate(&self) {
        let all_db_up = self.cluster.has_all_db_up();
        let provisioned = self.cluster.is_provisioned();
        let master_failed = self.cluster.is_master_failed();

        let mut counts = [
            ("running", 0i64),
            ("master", 0),
            ("slave", 0),
            ("suspect", 0),
            ("failed", 0),
            ("unconnected", 0),
        ];
        for node in self.cluster.nodes() {
            let idx = match node.state() {
                NodeState::Running => 0,
                NodeState::Master => 1,
                NodeState::Slave => 2,
                NodeState::Suspect => 3,
                NodeState::Failed => 4,
                NodeState::Unconnected => 5,
            };
            counts[idx].1 += 1;
        }

        metrics().set_node_state_counts(&counts);
        metrics().set_cluster_facts(all_db_up, provisioned, master_failed);
        metrics().set_alerts_open(self.alerts.open_count() as i64);

        debug!(
            cluster = self.cluster.name(),
            all_db_up,
            provisioned,
            master_failed,
            rolling_restart = self.cluster.has_request_db_rolling_restart(),
            rolling_reprov = self.cluster.has_request_db_rolling_reprov(),
            "Tick evaluated"
        );
    }
}

/// Role classification from a fresh snapshot: a node with replication
/// channels or read_only set is a replica, the rest are masters.
fn classify(status: &NodeStatus) -> NodeState {
    if !status.replications.is_empty() || status.read_only {
        NodeState::Slave
    } else {
        NodeState::Master
    }
}

/// Demotion on a missed poll: running nodes become Suspect first and Failed
/// on the next miss, so a single network blip never fails a node outright.
fn state_after_failure(state: NodeState) -> NodeState {
    match state {
        NodeState::Running | NodeState::Master | NodeState::Slave | NodeState::Unconnected => {
            NodeState::Suspect
        }
        NodeState::Suspect | NodeState::Failed => NodeState::Failed,
    }
}
