use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Monitoring loop settings
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Cluster topology and host lists
    pub cluster: ClusterSectionConfig,
    /// Credentials used to poll database nodes
    #[serde(default)]
    pub db: DbConfig,
    /// Client TLS settings for node connections
    #[serde(default)]
    pub tls: TlsConfig,
}

// ============================================================================
// Monitor Configuration
// ============================================================================

/// Settings for the polling loop and the metrics endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between monitoring ticks (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Per-node timeout for one status refresh (milliseconds)
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Listen address for the Prometheus /metrics endpoint (empty disables it)
    #[serde(default)]
    pub metrics_addr: String,
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_refresh_timeout_ms() -> u64 {
    2000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            metrics_addr: String::new(),
        }
    }
}

// ============================================================================
// Cluster Configuration
// ============================================================================

/// One monitored cluster: its node set, proxies, and host lists.
///
/// Host lists arrive as comma-separated strings (the external contract) and
/// are parsed exactly once, at load time, into [`HostList`] sets.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSectionConfig {
    /// Cluster name
    pub name: String,
    /// Database nodes, comma-separated host[:port] specifiers
    #[serde(default)]
    pub hosts: String,
    /// Front-end proxies, comma-separated host[:port] specifiers
    #[serde(default)]
    pub proxies: String,
    /// Nodes excluded from failover election
    #[serde(default)]
    pub ignore_hosts: String,
    /// Nodes preferred as master candidates
    #[serde(default)]
    pub prefer_master_hosts: String,
    /// Nodes preferred as backup targets
    #[serde(default)]
    pub backup_hosts: String,
    /// Nodes exempt from read-only enforcement
    #[serde(default)]
    pub ignore_readonly_hosts: String,
    /// Provisioning backend selector
    #[serde(default)]
    pub orchestrator: Orchestrator,
    /// Monitoring activity flag
    #[serde(default)]
    pub activity: Activity,
    /// Replication channel this cluster follows on multi-source nodes
    #[serde(default)]
    pub replication_source_name: String,
    /// Tags applied to database nodes
    #[serde(default)]
    pub db_tags: Vec<String>,
    /// Tags applied to proxies
    #[serde(default)]
    pub proxy_tags: Vec<String>,
}

/// Provisioning backend in charge of the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Orchestrator {
    /// Machines are managed outside this system; provisioning gating is off
    #[default]
    OnPremise,
    Opensvc,
    Kubernetes,
    Slapos,
    Local,
}

impl Orchestrator {
    /// Whether this system is responsible for tracking provisioning state
    pub fn manages_provisioning(&self) -> bool {
        !matches!(self, Orchestrator::OnPremise)
    }
}

/// Whether this monitor instance actively evaluates the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    #[default]
    Active,
    Standby,
}

// ============================================================================
// Database & TLS Configuration
// ============================================================================

/// Credentials and defaults for polling connections
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Port assumed for host specifiers without an explicit one
    #[serde(default = "default_db_port")]
    pub default_port: u16,
}

fn default_db_user() -> String {
    "monitor".to_string()
}

fn default_db_port() -> u16 {
    3306
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            user: default_db_user(),
            password: String::new(),
            default_port: default_db_port(),
        }
    }
}

/// Client TLS material, current and previous certificate generations
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub client_cert: String,
    #[serde(default)]
    pub client_key: String,
    #[serde(default)]
    pub old_client_cert: String,
    #[serde(default)]
    pub old_client_key: String,
}

// ============================================================================
// Host lists
// ============================================================================

/// A set of host specifiers parsed from a comma-separated config string.
///
/// Membership matches a node's URL or its short name. An empty config string
/// parses to an empty list with no members, never a phantom "" entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostList(Vec<String>);

impl HostList {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// URL-or-name membership test
    pub fn contains(&self, candidate: &str) -> bool {
        self.0.iter().any(|h| h == candidate)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Split a host specifier into host and port, applying the default port
/// when the specifier carries none.
pub fn parse_host_port(spec: &str, default_port: u16) -> (String, u16) {
    match spec.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (spec.to_string(), default_port),
        },
        None => (spec.to_string(), default_port),
    }
}
