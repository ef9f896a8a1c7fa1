//! Replication status records.
//!
//! One record is a point-in-time snapshot of a single replication channel as
//! reported by `SHOW SLAVE STATUS` (or `SHOW ALL SLAVES STATUS` on MariaDB
//! multi-source setups). Records are replaced wholesale on every poll.

use std::collections::HashMap;

use super::Flavor;

/// Snapshot of one replication channel's state on one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationStatus {
    /// Channel name; empty for the default single-source channel
    pub channel: String,
    /// Upstream host this channel replicates from
    pub master_host: String,
    /// Upstream port, kept textual to match server reporting
    pub master_port: String,
    /// Upstream numeric server identifier, 0 when unreported
    pub master_server_id: u64,
    /// Measured replication lag; None when the node reports no measurement
    pub seconds_behind: Option<i64>,
    /// Heartbeat period configured for the channel
    pub heartbeat_period: f64,
    /// GTID-mode indicator as reported (dialect-dependent text)
    pub using_gtid: String,
}

impl ReplicationStatus {
    /// Build a record from one text-protocol result row.
    ///
    /// Column names differ between dialects and versions; both the
    /// traditional and the renamed (Source_*/Replica_*) spellings are
    /// accepted.
    pub fn from_row(row: &HashMap<String, String>, flavor: Flavor) -> Self {
        let col = |names: &[&str]| -> String {
            names
                .iter()
                .find_map(|n| row.get(*n))
                .cloned()
                .unwrap_or_default()
        };

        let channel = col(&["Connection_name", "Channel_Name", "Channel_name"]);
        let master_host = col(&["Master_Host", "Source_Host"]);
        let master_port = col(&["Master_Port", "Source_Port"]);
        let master_server_id = col(&["Master_Server_Id", "Source_Server_Id"])
            .parse::<u64>()
            .unwrap_or(0);

        let raw_delay = col(&["Seconds_Behind_Master", "Seconds_Behind_Source"]);
        let seconds_behind = match raw_delay.as_str() {
            "" | "NULL" => None,
            v => v.parse::<i64>().ok(),
        };

        let heartbeat_period = col(&["Slave_Heartbeat_Period", "Replica_Heartbeat_Period"])
            .parse::<f64>()
            .unwrap_or(0.0);

        let using_gtid = match flavor {
            Flavor::MariaDb => col(&["Using_Gtid"]),
            // MySQL reports GTID use through Auto_Position, not a mode column
            Flavor::Mysql => {
                if col(&["Auto_Position"]) == "1" {
                    "Yes".to_string()
                } else {
                    "No".to_string()
                }
            }
        };

        Self {
            channel,
            master_host,
            master_port,
            master_server_id,
            seconds_behind,
            heartbeat_period,
            using_gtid,
        }
    }
}
