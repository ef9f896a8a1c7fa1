//! Integration test entry point
//!
//! Run with: ARGUS_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - ARGUS_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - ARGUS_TEST_DB_HOST: Database node host (default: 127.0.0.1)
//! - ARGUS_TEST_DB_PORT: Database node port (default: 3306)
//! - ARGUS_TEST_DB_USER: Monitoring user (default: monitor)
//! - ARGUS_TEST_DB_PASS: Monitoring password (default: empty)

mod replication;

use mysql::{OptsBuilder, Pool, PooledConn};
use std::env;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("ARGUS_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set ARGUS_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Node connection config from environment
pub struct NodeTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl NodeTestConfig {
    pub fn conn(&self) -> PooledConn {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()));
        let pool = Pool::new(opts).expect("Pool creation should succeed");
        pool.get_conn().expect("Connection should succeed")
    }
}

pub fn get_node_config() -> NodeTestConfig {
    NodeTestConfig {
        host: env::var("ARGUS_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("ARGUS_TEST_DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("ARGUS_TEST_DB_USER").unwrap_or_else(|_| "monitor".to_string()),
        password: env::var("ARGUS_TEST_DB_PASS").unwrap_or_default(),
    }
}
