//! Per-node monitoring state.
//!
//! A [`Node`] represents one database server instance: its identity (URL,
//! never an internal id), its health state as owned by the external failover
//! state machine, the raw status snapshot replaced wholesale on every poll
//! tick, sticky operation cookies, and the connection security state that
//! persists across reconnect attempts.

mod cookies;
mod replication;
mod topology;

pub use cookies::{Cookie, CookieState};
pub use replication::ReplicationStatus;
pub use topology::TopologyError;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::conn::TlsState;

/// Health state of a node, owned by the external failover state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Answering polls, role not yet resolved
    Running,
    /// Answering polls and acting as the replication master
    Master,
    /// Answering polls and replicating from an upstream
    Slave,
    /// Missed a poll; counts as not-up for aggregate decisions
    Suspect,
    /// Declared down
    Failed,
    /// Never reached since process start
    Unconnected,
}

impl NodeState {
    pub fn is_running(&self) -> bool {
        matches!(self, NodeState::Running | NodeState::Master | NodeState::Slave)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeState::Failed)
    }
}

/// Database dialect family, drives GTID fact resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    MariaDb,
    #[default]
    Mysql,
}

impl Flavor {
    pub fn from_version(version: &str) -> Self {
        if version.to_lowercase().contains("mariadb") {
            Flavor::MariaDb
        } else {
            Flavor::Mysql
        }
    }
}

/// Raw status snapshot for one node, replaced wholesale each poll tick.
///
/// Readers always see either the previous tick's snapshot or the new one,
/// never a mix.
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub flavor: Flavor,
    pub version: String,
    /// Numeric server identifier used for topology correlation
    pub server_id: u64,
    /// MySQL-family cluster-wide GTID capability
    pub have_mysql_gtid: bool,
    pub read_only: bool,
    /// Current replication records, one per configured channel
    pub replications: Vec<ReplicationStatus>,
    /// Records from the last poll that reported any channels; fallback for
    /// nodes that temporarily cannot report live status
    pub last_seen_replications: Vec<ReplicationStatus>,
    /// Server variables as of this poll
    pub variables: HashMap<String, String>,
    /// Status counters as of this poll
    pub status_vars: HashMap<String, String>,
    /// Status counters from the previous poll, for delta computation
    pub prev_status_vars: HashMap<String, String>,
}

/// One monitored database server instance
pub struct Node {
    url: String,
    host: String,
    port: u16,
    name: String,
    /// Which replication channel this node follows when several are configured
    replication_source_name: String,
    state: RwLock<NodeState>,
    status: RwLock<NodeStatus>,
    provision_cookie: Cookie,
    restart_cookie: Cookie,
    reprov_cookie: Cookie,
    tls_state: AtomicU8,
}

impl Node {
    pub fn new(host: &str, port: u16, replication_source_name: &str) -> Self {
        Self {
            url: format!("{}:{}", host, port),
            host: host.to_string(),
            port,
            name: host.to_string(),
            replication_source_name: replication_source_name.to_string(),
            state: RwLock::new(NodeState::Unconnected),
            status: RwLock::new(NodeStatus::default()),
            provision_cookie: Cookie::default(),
            restart_cookie: Cookie::default(),
            reprov_cookie: Cookie::default(),
            tls_state: AtomicU8::new(TlsState::Current as u8),
        }
    }

    /// Connection URL, the only valid identity for membership tests
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Short display name, also matched against configured host lists
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replication_source_name(&self) -> &str {
        &self.replication_source_name
    }

    // ------------------------------------------------------------------
    // Health state (written by the external state machine / classifier)
    // ------------------------------------------------------------------

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_failed()
    }

    // ------------------------------------------------------------------
    // Raw status snapshot
    // ------------------------------------------------------------------

    pub fn status(&self) -> RwLockReadGuard<'_, NodeStatus> {
        self.status.read()
    }

    /// Swap in a fresh snapshot from a completed poll.
    ///
    /// Carries forward the last-seen replication records when the new poll
    /// reported no channels, and rotates the status-variable map into the
    /// previous slot for delta computation.
    pub fn apply_status(&self, mut new: NodeStatus) {
        let mut cur = self.status.write();
        if new.replications.is_empty() {
            new.last_seen_replications = std::mem::take(&mut cur.last_seen_replications);
        } else {
            new.last_seen_replications = new.replications.clone();
        }
        new.prev_status_vars = std::mem::take(&mut cur.status_vars);
        *cur = new;
    }

    pub fn server_id(&self) -> u64 {
        self.status.read().server_id
    }

    pub fn flavor(&self) -> Flavor {
        self.status.read().flavor
    }

    // ------------------------------------------------------------------
    // Cookies
    // ------------------------------------------------------------------

    pub fn has_provision_cookie(&self) -> bool {
        self.provision_cookie.is_set()
    }

    /// Idempotent; returns true only when the cookie was newly set
    pub fn set_provision_cookie(&self) -> bool {
        self.provision_cookie.request()
    }

    pub fn has_restart_cookie(&self) -> bool {
        self.restart_cookie.is_set()
    }

    pub fn has_reprov_cookie(&self) -> bool {
        self.reprov_cookie.is_set()
    }

    /// Restart cookie handle for the orchestration collaborator
    pub fn restart_cookie(&self) -> &Cookie {
        &self.restart_cookie
    }

    /// Reprovision cookie handle for the orchestration collaborator
    pub fn reprov_cookie(&self) -> &Cookie {
        &self.reprov_cookie
    }

    // ------------------------------------------------------------------
    // Connection security state
    // ------------------------------------------------------------------

    pub fn tls_state(&self) -> TlsState {
        TlsState::from_u8(self.tls_state.load(Ordering::Acquire))
    }

    pub fn set_tls_state(&self, state: TlsState) {
        self.tls_state.store(state as u8, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Prometheus-style text exposition, one line per metric:
    /// `metricname{instance="<host>"} <value>`
    pub fn exposition_lines(&self) -> String {
        let mut out = String::new();
        let mut metric = |name: &str, value: String| {
            out.push_str(name);
            out.push_str("{instance=\"");
            out.push_str(&self.host);
            out.push_str("\"} ");
            out.push_str(&value);
            out.push('\n');
        };
        metric("node_up", (self.is_running() as u8).to_string());
        metric("replication_delay", self.replication_delay().to_string());
        metric(
            "replication_master_server_id",
            self.replication_server_id().to_string(),
        );
        metric(
            "replication_heartbeat_period",
            format!("{}", self.replication_heartbeat_period()),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(channel: &str, master_id: u64) -> ReplicationStatus {
        ReplicationStatus {
            channel: channel.to_string(),
            master_server_id: master_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_is_url() {
        let node = Node::new("db1", 3306, "");
        assert_eq!(node.url(), "db1:3306");
        assert_eq!(node.name(), "db1");
        assert_eq!(node.state(), NodeState::Unconnected);
    }

    #[test]
    fn test_state_predicates() {
        let node = Node::new("db1", 3306, "");
        node.set_state(NodeState::Master);
        assert!(node.is_running());
        node.set_state(NodeState::Suspect);
        assert!(!node.is_running());
        assert!(!node.is_failed());
        node.set_state(NodeState::Failed);
        assert!(node.is_failed());
    }

    #[test]
    fn test_apply_status_retains_last_seen() {
        let node = Node::new("db1", 3306, "");
        node.apply_status(NodeStatus {
            replications: vec![record("", 7)],
            ..Default::default()
        });
        assert_eq!(node.status().last_seen_replications.len(), 1);

        // a poll with no channels keeps the prior last-seen records
        node.apply_status(NodeStatus::default());
        assert!(node.status().replications.is_empty());
        assert_eq!(node.status().last_seen_replications[0].master_server_id, 7);
    }

    #[test]
    fn test_apply_status_rotates_status_vars() {
        let node = Node::new("db1", 3306, "");
        let mut first = NodeStatus::default();
        first
            .status_vars
            .insert("Com_select".to_string(), "10".to_string());
        node.apply_status(first);

        let mut second = NodeStatus::default();
        second
            .status_vars
            .insert("Com_select".to_string(), "25".to_string());
        node.apply_status(second);

        let status = node.status();
        assert_eq!(status.prev_status_vars.get("Com_select").unwrap(), "10");
        assert_eq!(status.status_vars.get("Com_select").unwrap(), "25");
    }

    #[test]
    fn test_flavor_detection() {
        assert_eq!(
            Flavor::from_version("10.11.6-MariaDB-log"),
            Flavor::MariaDb
        );
        assert_eq!(Flavor::from_version("8.0.36"), Flavor::Mysql);
    }

    #[test]
    fn test_exposition_lines_format() {
        let node = Node::new("db1", 3306, "");
        node.set_state(NodeState::Running);
        let lines = node.exposition_lines();
        assert!(lines.contains("node_up{instance=\"db1\"} 1\n"));
        assert!(lines.contains("replication_delay{instance=\"db1\"} 0\n"));
    }
}
