//! Cluster aggregate predicates.
//!
//! Folds per-node and per-proxy facts into the cluster-wide booleans the
//! external failover state machine consumes. Every predicate returns a
//! definite answer under all input conditions, including empty node sets;
//! I/O errors never propagate out of this layer.
//!
//! Quantifier asymmetry is deliberate: single-node operations trigger on
//! *any* cookie (existential), rolling cluster-wide operations require
//! *every* node's cookie (universal) so one flaky node cannot start a
//! fleet-wide rollout.

use tracing::info;

use super::Cluster;
use crate::node::{Node, NodeState};

impl Cluster {
    /// Whether every node and proxy has been observed provisioned.
    ///
    /// Immediately true when provisioning is not this system's
    /// responsibility: an on-premise fleet, or no hosts configured at all.
    /// Otherwise a node or proxy without the provision cookie gets it set
    /// now if it is currently reachable (lazy detection); an unreachable
    /// one fails the whole predicate with no partial credit.
    pub fn is_provisioned(&self) -> bool {
        if !self.orchestrator.manages_provisioning() {
            return true;
        }
        if self.hosts.is_empty() {
            return true;
        }
        for db in &self.nodes {
            if !db.has_provision_cookie() {
                if db.is_running() {
                    if db.set_provision_cookie() {
                        info!(node = db.url(), state = ?db.state(), "Node reachable, recording provision cookie");
                    }
                } else {
                    return false;
                }
            }
        }
        for px in &self.proxies {
            if !px.has_provision_cookie() {
                if px.is_running() {
                    if px.set_provision_cookie() {
                        info!(proxy = px.url(), state = ?px.state(), "Proxy reachable, recording provision cookie");
                    }
                } else {
                    return false;
                }
            }
        }
        true
    }

    /// False on an empty node set, and false when any node is Failed or
    /// Suspect. Suspect counts as not-up: fail closed.
    pub fn has_all_db_up(&self) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        !self
            .nodes
            .iter()
            .any(|s| matches!(s.state(), NodeState::Failed | NodeState::Suspect))
    }

    /// Any node requesting an individual restart
    pub fn has_request_db_restart(&self) -> bool {
        self.nodes.iter().any(|s| s.has_restart_cookie())
    }

    /// Any node requesting an individual reprovision
    pub fn has_request_db_reprov(&self) -> bool {
        self.nodes.iter().any(|s| s.has_reprov_cookie())
    }

    /// Every node requesting a restart; gates the cluster-wide rolling
    /// restart. An empty node set never gates one on vacuous truth.
    pub fn has_request_db_rolling_restart(&self) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        self.nodes.iter().all(|s| s.has_restart_cookie())
    }

    /// Every node requesting a reprovision; same contract as the rolling
    /// restart gate.
    pub fn has_request_db_rolling_reprov(&self) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        self.nodes.iter().all(|s| s.has_reprov_cookie())
    }

    /// Any proxy requesting an individual restart
    pub fn has_request_proxies_restart(&self) -> bool {
        self.proxies.iter().any(|p| p.has_restart_cookie())
    }

    /// Any proxy requesting an individual reprovision
    pub fn has_request_proxies_reprov(&self) -> bool {
        self.proxies.iter().any(|p| p.has_reprov_cookie())
    }

    pub fn is_in_ignored_hosts(&self, server: &Node) -> bool {
        self.ignore_hosts.contains(server.url()) || self.ignore_hosts.contains(server.name())
    }

    pub fn is_in_prefered_backup_hosts(&self, server: &Node) -> bool {
        self.backup_hosts.contains(server.url()) || self.backup_hosts.contains(server.name())
    }

    pub fn is_in_ignored_readonly(&self, server: &Node) -> bool {
        self.ignore_readonly_hosts.contains(server.url())
            || self.ignore_readonly_hosts.contains(server.name())
    }

    pub fn is_in_prefered_hosts(&self, server: &Node) -> bool {
        self.prefer_master_hosts.contains(server.url())
            || self.prefer_master_hosts.contains(server.name())
    }

    /// True when the resolved master (real or computed) is absent or Failed
    pub fn is_master_failed(&self) -> bool {
        match self.get_master() {
            Some(master) => master.is_failed(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::test_cluster;
    use super::*;
    use crate::config::{Activity, ClusterSectionConfig, DbConfig, Orchestrator};
    use crate::node::{NodeStatus, ReplicationStatus};

    fn managed_cluster(hosts: &str, proxies: &str) -> Cluster {
        let cfg = ClusterSectionConfig {
            name: "test".to_string(),
            hosts: hosts.to_string(),
            proxies: proxies.to_string(),
            ignore_hosts: "db3,db4".to_string(),
            prefer_master_hosts: "db1".to_string(),
            backup_hosts: "db2:3306".to_string(),
            ignore_readonly_hosts: "db9".to_string(),
            orchestrator: Orchestrator::Opensvc,
            activity: Activity::Active,
            replication_source_name: String::new(),
            db_tags: Vec::new(),
            proxy_tags: Vec::new(),
        };
        Cluster::from_config(&cfg, &DbConfig::default())
    }

    fn set_replica(node: &Node, server_id: u64, master_id: u64) {
        node.apply_status(NodeStatus {
            server_id,
            replications: vec![ReplicationStatus {
                master_server_id: master_id,
                ..Default::default()
            }],
            ..Default::default()
        });
    }

    // ------------------------------------------------------------------
    // Empty node set: no vacuous truth
    // ------------------------------------------------------------------

    #[test]
    fn test_empty_node_set_predicates() {
        let cluster = test_cluster("");
        assert!(!cluster.has_all_db_up());
        assert!(!cluster.has_request_db_rolling_restart());
        assert!(!cluster.has_request_db_rolling_reprov());
        assert!(!cluster.has_request_db_restart());
        assert!(!cluster.has_request_db_reprov());
    }

    // ------------------------------------------------------------------
    // has_all_db_up
    // ------------------------------------------------------------------

    #[test]
    fn test_has_all_db_up_suspect_counts_as_down() {
        let cluster = test_cluster("db1:3306,db2:3306");
        cluster.nodes()[0].set_state(NodeState::Running);
        cluster.nodes()[1].set_state(NodeState::Running);
        assert!(cluster.has_all_db_up());

        cluster.nodes()[1].set_state(NodeState::Suspect);
        assert!(!cluster.has_all_db_up());

        cluster.nodes()[1].set_state(NodeState::Failed);
        assert!(!cluster.has_all_db_up());
    }

    // ------------------------------------------------------------------
    // Restart/reprov cookies: existential vs universal
    // ------------------------------------------------------------------

    #[test]
    fn test_rolling_restart_requires_every_cookie() {
        let cluster = test_cluster("db1:3306,db2:3306,db3:3306");
        for node in cluster.nodes() {
            node.restart_cookie().request();
        }
        assert!(cluster.has_request_db_rolling_restart());
        assert!(cluster.has_request_db_restart());

        // removing exactly one cookie breaks the universal gate but not the
        // existential trigger
        cluster.nodes()[1].restart_cookie().clear();
        assert!(!cluster.has_request_db_rolling_restart());
        assert!(cluster.has_request_db_restart());
    }

    #[test]
    fn test_rolling_reprov_mirrors_restart_semantics() {
        let cluster = test_cluster("db1:3306,db2:3306");
        assert!(!cluster.has_request_db_rolling_reprov());
        cluster.nodes()[0].reprov_cookie().request();
        assert!(!cluster.has_request_db_rolling_reprov());
        assert!(cluster.has_request_db_reprov());
        cluster.nodes()[1].reprov_cookie().request();
        assert!(cluster.has_request_db_rolling_reprov());
    }

    #[test]
    fn test_proxy_restart_is_existential() {
        let cluster = managed_cluster("db1:3306", "proxy1:3307,proxy2:3307");
        assert!(!cluster.has_request_proxies_restart());
        cluster.proxies()[1].restart_cookie().request();
        assert!(cluster.has_request_proxies_restart());
        assert!(!cluster.has_request_proxies_reprov());
    }

    // ------------------------------------------------------------------
    // is_provisioned
    // ------------------------------------------------------------------

    #[test]
    fn test_on_premise_is_always_provisioned() {
        let cluster = test_cluster("db1:3306,db2:3306");
        // nodes unreachable (Unconnected) but the backend is on-premise
        assert!(cluster.is_provisioned());
    }

    #[test]
    fn test_no_hosts_is_always_provisioned() {
        let cluster = managed_cluster("", "");
        assert!(cluster.is_provisioned());
    }

    #[test]
    fn test_provisioned_fails_fast_on_unreachable() {
        let cluster = managed_cluster("db1:3306,db2:3306", "");
        cluster.nodes()[0].set_state(NodeState::Running);
        // db2 never reached: fail, no partial credit
        assert!(!cluster.is_provisioned());
        // but db1's reachability was recorded on the way
        assert!(cluster.nodes()[0].has_provision_cookie());
        assert!(!cluster.nodes()[1].has_provision_cookie());
    }

    #[test]
    fn test_provisioned_when_all_reachable_including_proxies() {
        let cluster = managed_cluster("db1:3306,db2:3306", "proxy1:3307");
        for node in cluster.nodes() {
            node.set_state(NodeState::Running);
        }
        assert!(!cluster.is_provisioned()); // proxy still unreachable
        cluster.proxies()[0].set_state(NodeState::Running);
        assert!(cluster.is_provisioned());

        // cookies stick: provisioning stays true when a node later dies
        cluster.nodes()[0].set_state(NodeState::Failed);
        assert!(cluster.is_provisioned());
    }

    // ------------------------------------------------------------------
    // Host list membership
    // ------------------------------------------------------------------

    #[test]
    fn test_ignored_hosts_matches_name_or_url() {
        let cluster = managed_cluster("db1:3306", "");
        let db3 = Node::new("db3", 3306, "");
        let db5 = Node::new("db5", 3306, "");
        let db2 = Node::new("db2", 3306, "");
        assert!(cluster.is_in_ignored_hosts(&db3)); // by name
        assert!(!cluster.is_in_ignored_hosts(&db5));
        assert!(cluster.is_in_prefered_backup_hosts(&db2)); // by URL
        assert!(cluster.is_in_prefered_hosts(&Node::new("db1", 3306, "")));
        assert!(cluster.is_in_ignored_readonly(&Node::new("db9", 3306, "")));
        assert!(!cluster.is_in_ignored_readonly(&db2));
    }

    #[test]
    fn test_empty_lists_match_nothing() {
        let cluster = test_cluster("db1:3306");
        let node = Node::new("db1", 3306, "");
        assert!(!cluster.is_in_ignored_hosts(&node));
        assert!(!cluster.is_in_prefered_hosts(&node));
        assert!(!cluster.is_in_prefered_backup_hosts(&node));
        assert!(!cluster.is_in_ignored_readonly(&node));
    }

    // ------------------------------------------------------------------
    // Master failure, including the documented three-node scenario
    // ------------------------------------------------------------------

    #[test]
    fn test_is_master_failed_without_master() {
        let cluster = test_cluster("db1:3306,db2:3306");
        assert!(cluster.is_master_failed());
    }

    #[test]
    fn test_three_node_scenario() {
        // A (Running, upstream id 7), B (Failed, server id 7),
        // C (Running, upstream id 7)
        let cluster = test_cluster("dba:3306,dbb:3306,dbc:3306");
        let nodes = cluster.nodes();
        let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

        set_replica(a, 2, 7);
        a.set_state(NodeState::Running);
        b.apply_status(NodeStatus {
            server_id: 7,
            ..Default::default()
        });
        b.set_state(NodeState::Failed);
        set_replica(c, 3, 7);
        c.set_state(NodeState::Running);

        // B is Failed, so the fleet is not all-up
        assert!(!cluster.has_all_db_up());

        // A and C replicate from the same upstream id
        let all: Vec<Arc<Node>> = nodes.to_vec();
        assert_eq!(a.sibling(&all).unwrap().url(), c.url());
        assert_eq!(c.sibling(&all).unwrap().url(), a.url());

        // the computed master is B, and B is Failed
        assert_eq!(cluster.get_master().unwrap().url(), b.url());
        assert!(cluster.is_master_failed());
    }

    #[test]
    fn test_master_recovery_clears_failure() {
        let cluster = test_cluster("db1:3306,db2:3306");
        cluster.nodes()[0].set_state(NodeState::Master);
        assert!(!cluster.is_master_failed());
        cluster.nodes()[0].set_state(NodeState::Failed);
        // no longer crowned and no topology evidence: absent master reads
        // as failed
        assert!(cluster.is_master_failed());
    }
}
