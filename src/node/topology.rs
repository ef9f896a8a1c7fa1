//! Replication topology resolver.
//!
//! Turns a node's raw replication status records into topology facts:
//! which upstream it follows, how far behind it is, whether GTID is in use,
//! and which other nodes replicate from the same upstream.

use std::sync::Arc;

use thiserror::Error;

use super::{Flavor, Node, ReplicationStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// No channels configured, or none matching the requested name.
    /// A normal state for masters and standalone nodes, never a fault.
    #[error("no replication channels")]
    NoChannels,
}

impl Node {
    /// Look up the record for the given channel among the current records.
    pub fn slave_status(&self, channel: &str) -> Result<ReplicationStatus, TopologyError> {
        self.status
            .read()
            .replications
            .iter()
            .find(|ss| ss.channel == channel)
            .cloned()
            .ok_or(TopologyError::NoChannels)
    }

    /// Like [`Node::slave_status`] but served from the last poll that
    /// reported any channels, for nodes mid-reconnection. Falls back to the
    /// live records when nothing was ever retained.
    pub fn slave_status_last_seen(
        &self,
        channel: &str,
    ) -> Result<ReplicationStatus, TopologyError> {
        let status = self.status.read();
        if status.last_seen_replications.is_empty() {
            drop(status);
            return self.slave_status(channel);
        }
        status
            .last_seen_replications
            .iter()
            .find(|ss| ss.channel == channel)
            .cloned()
            .ok_or(TopologyError::NoChannels)
    }

    pub fn all_slave_status(&self) -> Vec<ReplicationStatus> {
        self.status.read().replications.clone()
    }

    /// Upstream numeric server identifier for the active channel, 0 when
    /// unresolvable.
    pub fn replication_server_id(&self) -> u64 {
        self.slave_status(&self.replication_source_name)
            .map(|ss| ss.master_server_id)
            .unwrap_or(0)
    }

    /// Seconds behind the upstream for the active channel.
    ///
    /// Zero means "no evidence of lag": it is returned both for a verified
    /// zero and when the node reports no measurement or no channel at all.
    /// Never negative.
    pub fn replication_delay(&self) -> i64 {
        self.slave_status(&self.replication_source_name)
            .map(|ss| ss.seconds_behind.unwrap_or(0).max(0))
            .unwrap_or(0)
    }

    pub fn replication_heartbeat_period(&self) -> f64 {
        self.slave_status(&self.replication_source_name)
            .map(|ss| ss.heartbeat_period)
            .unwrap_or(0.0)
    }

    pub fn replication_master_host(&self) -> String {
        self.slave_status(&self.replication_source_name)
            .map(|ss| ss.master_host)
            .unwrap_or_default()
    }

    pub fn replication_master_port(&self) -> String {
        self.slave_status(&self.replication_source_name)
            .map(|ss| ss.master_port)
            .unwrap_or_else(|_| "3306".to_string())
    }

    /// Textual Yes/No to match external reporting.
    ///
    /// MariaDB reports GTID mode per channel; MySQL exposes it as a
    /// server-wide capability.
    pub fn replication_using_gtid(&self) -> String {
        match self.flavor() {
            Flavor::MariaDb => self
                .slave_status(&self.replication_source_name)
                .map(|ss| ss.using_gtid)
                .unwrap_or_else(|_| "No".to_string()),
            Flavor::Mysql => {
                if self.status.read().have_mysql_gtid {
                    "Yes".to_string()
                } else {
                    "No".to_string()
                }
            }
        }
    }

    pub fn is_replication_using_gtid_strict(&self) -> bool {
        match self.flavor() {
            Flavor::MariaDb => {
                self.status.read().variables.get("GTID_STRICT_MODE").map(String::as_str)
                    == Some("ON")
            }
            Flavor::Mysql => true,
        }
    }

    /// Find another node replicating from the same upstream server id.
    ///
    /// Discovers replicas sharing this node's master without any explicit
    /// topology configuration. None when this node has no resolvable
    /// upstream or no other node matches.
    pub fn sibling(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>> {
        let own = self.slave_status(&self.replication_source_name).ok()?;
        nodes
            .iter()
            .find(|sl| {
                if sl.server_id() == self.server_id() {
                    return false;
                }
                match sl.slave_status(sl.replication_source_name()) {
                    Ok(ss) => ss.master_server_id == own.master_server_id,
                    Err(_) => false,
                }
            })
            .cloned()
    }

    /// Integer deltas between this poll's status counters and the previous
    /// poll's, skipping unchanged and non-numeric entries.
    pub fn status_delta(&self) -> Vec<(String, i64)> {
        let status = self.status.read();
        let mut delta: Vec<(String, i64)> = status
            .status_vars
            .iter()
            .filter_map(|(k, v)| {
                let cur = v.parse::<i64>().ok()?;
                let prev = status.prev_status_vars.get(k)?.parse::<i64>().ok()?;
                (cur != prev).then(|| (k.clone(), cur - prev))
            })
            .collect();
        delta.sort_by(|a, b| a.0.cmp(&b.0));
        delta
    }
}
