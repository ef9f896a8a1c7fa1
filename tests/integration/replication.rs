//! Replication status probes against a live node.
//!
//! These mirror the queries the monitor's refresh path issues and check the
//! invariants the evaluation engine depends on.

use crate::{get_node_config, skip_if_not_enabled};
use mysql::prelude::*;
use mysql::Row;

#[test]
fn test_server_reports_identity_variables() {
    skip_if_not_enabled!();

    let config = get_node_config();
    let mut conn = config.conn();

    let server_id: Option<u64> = conn
        .query_first("SELECT @@server_id")
        .expect("SELECT @@server_id should succeed");
    assert!(server_id.unwrap_or(0) > 0, "server_id must be configured");

    let version: Option<String> = conn
        .query_first("SELECT @@version")
        .expect("SELECT @@version should succeed");
    assert!(!version.unwrap_or_default().is_empty());
}

#[test]
fn test_slave_status_delay_is_never_negative() {
    skip_if_not_enabled!();

    let config = get_node_config();
    let mut conn = config.conn();

    let rows: Vec<Row> = conn
        .query("SHOW SLAVE STATUS")
        .expect("SHOW SLAVE STATUS should succeed");

    for row in rows {
        let columns = row.columns();
        let idx = columns
            .iter()
            .position(|c| {
                let name = c.name_str();
                name == "Seconds_Behind_Master" || name == "Seconds_Behind_Source"
            })
            .expect("slave status should report a delay column");
        // NULL means unmeasured, which the monitor maps to zero
        let delay: Option<i64> = row.get(idx).unwrap_or(None);
        if let Some(delay) = delay {
            assert!(delay >= 0, "live delay must never be negative");
        }
    }
}

#[test]
fn test_global_status_is_numeric_where_expected() {
    skip_if_not_enabled!();

    let config = get_node_config();
    let mut conn = config.conn();

    let rows: Vec<(String, String)> = conn
        .query("SHOW GLOBAL STATUS LIKE 'Uptime'")
        .expect("SHOW GLOBAL STATUS should succeed");
    assert_eq!(rows.len(), 1);
    assert!(
        rows[0].1.parse::<i64>().is_ok(),
        "Uptime must parse as an integer for delta computation"
    );
}
