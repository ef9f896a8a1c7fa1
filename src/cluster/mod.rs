//! Cluster ownership and cluster-scoped facts.
//!
//! A [`Cluster`] exclusively owns its nodes and proxies for its lifetime.
//! Nodes are never shared across clusters even when the same physical server
//! participates in two logical clusters; membership is therefore always
//! decided by connection URL, never by reference or internal id.

mod predicates;
mod proxy;

pub use proxy::Proxy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{
    parse_host_port, Activity, ClusterSectionConfig, DbConfig, HostList, Orchestrator,
};
use crate::node::{Node, NodeState};

/// Flags owned by the external failover state machine, shared with this core
#[derive(Debug, Default)]
pub struct FailoverFlags {
    in_failover: AtomicBool,
    discovered: AtomicBool,
}

impl FailoverFlags {
    pub fn set_in_failover(&self, v: bool) {
        self.in_failover.store(v, Ordering::Release);
    }

    pub fn is_in_failover(&self) -> bool {
        self.in_failover.load(Ordering::Acquire)
    }

    pub fn set_discovered(&self, v: bool) {
        self.discovered.store(v, Ordering::Release);
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered.load(Ordering::Acquire)
    }
}

/// One monitored cluster: node set, proxies, and cluster-scoped configuration
pub struct Cluster {
    name: String,
    nodes: Vec<Arc<Node>>,
    proxies: Vec<Arc<Proxy>>,
    /// Configured node specifiers; empty means provisioning gating is moot
    hosts: HostList,
    ignore_hosts: HostList,
    prefer_master_hosts: HostList,
    backup_hosts: HostList,
    ignore_readonly_hosts: HostList,
    orchestrator: Orchestrator,
    activity: Activity,
    db_tags: Vec<String>,
    proxy_tags: Vec<String>,
    failover: Arc<FailoverFlags>,
}

impl Cluster {
    /// Build the cluster from its config section, parsing every
    /// comma-separated host list exactly once.
    pub fn from_config(cfg: &ClusterSectionConfig, db: &DbConfig) -> Self {
        let hosts = HostList::parse(&cfg.hosts);
        let nodes = hosts
            .iter()
            .map(|spec| {
                let (host, port) = parse_host_port(spec, db.default_port);
                Arc::new(Node::new(&host, port, &cfg.replication_source_name))
            })
            .collect();
        let proxies = HostList::parse(&cfg.proxies)
            .iter()
            .map(|spec| {
                let (host, port) = parse_host_port(spec, db.default_port);
                Arc::new(Proxy::new(&host, port))
            })
            .collect();

        Self {
            name: cfg.name.clone(),
            nodes,
            proxies,
            hosts,
            ignore_hosts: HostList::parse(&cfg.ignore_hosts),
            prefer_master_hosts: HostList::parse(&cfg.prefer_master_hosts),
            backup_hosts: HostList::parse(&cfg.backup_hosts),
            ignore_readonly_hosts: HostList::parse(&cfg.ignore_readonly_hosts),
            orchestrator: cfg.orchestrator,
            activity: cfg.activity,
            db_tags: cfg.db_tags.clone(),
            proxy_tags: cfg.proxy_tags.clone(),
            failover: Arc::new(FailoverFlags::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn proxies(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    /// Handle the external failover state machine writes its flags through
    pub fn failover_flags(&self) -> Arc<FailoverFlags> {
        self.failover.clone()
    }

    /// Membership by URL equality only. Internal ids are not stable across
    /// clusters sharing a node.
    pub fn has_server(&self, server: &Node) -> bool {
        self.nodes.iter().any(|sv| sv.url() == server.url())
    }

    /// Raw membership in the configured host specifier list
    pub fn is_in_host_list(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn have_db_tag(&self, tag: &str) -> bool {
        self.db_tags.iter().any(|t| t == tag)
    }

    pub fn have_proxy_tag(&self, tag: &str) -> bool {
        self.proxy_tags.iter().any(|t| t == tag)
    }

    pub fn is_active(&self) -> bool {
        self.activity == Activity::Active
    }

    pub fn is_in_failover(&self) -> bool {
        self.failover.is_in_failover()
    }

    pub fn is_discovered(&self) -> bool {
        self.failover.is_discovered()
    }

    /// Resolve the current master: a node the state machine already crowned,
    /// or failing that a computed one, whose server id is reported as the
    /// upstream by some other node.
    pub fn get_master(&self) -> Option<Arc<Node>> {
        if let Some(m) = self.nodes.iter().find(|n| n.state() == NodeState::Master) {
            return Some(m.clone());
        }
        self.nodes
            .iter()
            .find(|candidate| {
                let sid = candidate.server_id();
                sid != 0
                    && self
                        .nodes
                        .iter()
                        .any(|r| r.url() != candidate.url() && r.replication_server_id() == sid)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::node::ReplicationStatus;

    pub(crate) fn test_cluster(hosts: &str) -> Cluster {
        let cfg = ClusterSectionConfig {
            name: "test".to_string(),
            hosts: hosts.to_string(),
            proxies: String::new(),
            ignore_hosts: String::new(),
            prefer_master_hosts: String::new(),
            backup_hosts: String::new(),
            ignore_readonly_hosts: String::new(),
            orchestrator: Orchestrator::OnPremise,
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

    #[test]
    fn test_has_server_matches_by_url() {
        let cluster = test_cluster("db1:3306,db2:3306");
        let same_url = Node::new("db1", 3306, "");
        let other = Node::new("db1", 3307, "");
        assert!(cluster.has_server(&same_url));
        assert!(!cluster.has_server(&other));
    }

    #[test]
    fn test_get_master_prefers_crowned_node() {
        let cluster = test_cluster("db1:3306,db2:3306");
        cluster.nodes()[1].set_state(NodeState::Master);
        assert_eq!(cluster.get_master().unwrap().url(), "db2:3306");
    }

    #[test]
    fn test_get_master_computes_from_topology() {
        let cluster = test_cluster("db1:3306,db2:3306,db3:3306");
        let nodes = cluster.nodes();
        // db1 is nobody's replica but carries the id replicas point at
        nodes[0].apply_status(NodeStatus {
            server_id: 7,
            ..Default::default()
        });
        set_replica(&nodes[1], 2, 7);
        set_replica(&nodes[2], 3, 7);
        assert_eq!(cluster.get_master().unwrap().url(), "db1:3306");
    }

    #[test]
    fn test_get_master_none_without_evidence() {
        let cluster = test_cluster("db1:3306,db2:3306");
        assert!(cluster.get_master().is_none());
    }

    #[test]
    fn test_tags_and_activity() {
        let cfg = ClusterSectionConfig {
            name: "test".to_string(),
            hosts: String::new(),
            proxies: String::new(),
            ignore_hosts: String::new(),
            prefer_master_hosts: String::new(),
            backup_hosts: String::new(),
            ignore_readonly_hosts: String::new(),
            orchestrator: Orchestrator::OnPremise,
            activity: Activity::Standby,
            replication_source_name: String::new(),
            db_tags: vec!["ssd".to_string()],
            proxy_tags: vec!["edge".to_string()],
        };
        let cluster = Cluster::from_config(&cfg, &DbConfig::default());
        assert!(!cluster.is_active());
        assert!(cluster.have_db_tag("ssd"));
        assert!(!cluster.have_db_tag("edge"));
        assert!(cluster.have_proxy_tag("edge"));
    }

    #[test]
    fn test_failover_flags_shared_handle() {
        let cluster = test_cluster("db1:3306");
        let flags = cluster.failover_flags();
        assert!(!cluster.is_in_failover());
        flags.set_in_failover(true);
        flags.set_discovered(true);
        assert!(cluster.is_in_failover());
        assert!(cluster.is_discovered());
    }
}
