//! Front-end proxy monitoring state.
//!
//! Proxies carry the same health state and operation cookies as database
//! nodes but no replication status; the monitor only checks reachability.

use parking_lot::RwLock;

use crate::node::{Cookie, NodeState};

/// One monitored proxy instance
pub struct Proxy {
    url: String,
    host: String,
    port: u16,
    name: String,
    state: RwLock<NodeState>,
    provision_cookie: Cookie,
    restart_cookie: Cookie,
    reprov_cookie: Cookie,
}

impl Proxy {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("{}:{}", host, port),
            host: host.to_string(),
            port,
            name: host.to_string(),
            state: RwLock::new(NodeState::Unconnected),
            provision_cookie: Cookie::default(),
            restart_cookie: Cookie::default(),
            reprov_cookie: Cookie::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

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

    pub fn restart_cookie(&self) -> &Cookie {
        &self.restart_cookie
    }

    pub fn reprov_cookie(&self) -> &Cookie {
        &self.reprov_cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_identity_and_state() {
        let proxy = Proxy::new("proxy1", 3307);
        assert_eq!(proxy.url(), "proxy1:3307");
        assert_eq!(proxy.state(), NodeState::Unconnected);
        proxy.set_state(NodeState::Running);
        assert!(proxy.is_running());
    }

    #[test]
    fn test_proxy_cookies_idempotent() {
        let proxy = Proxy::new("proxy1", 3307);
        assert!(proxy.set_provision_cookie());
        assert!(!proxy.set_provision_cookie());
        assert!(proxy.has_provision_cookie());

        proxy.restart_cookie().request();
        assert!(proxy.has_restart_cookie());
        proxy.restart_cookie().clear();
        assert!(!proxy.has_restart_cookie());
    }
}
