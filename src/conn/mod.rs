//! Resilient node connections.
//!
//! Obtains a live connection to a node while tolerating certificate
//! rotation: connection attempts walk a fallback ladder of security states
//! (current certificate, previous certificate, no client certificate) and
//! the state that succeeds is persisted on the node, so the next reconnect
//! starts there instead of re-probing from scratch.

mod codec;
mod handshake;

pub use codec::{Packet, PacketCodec};

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::alerts::{codes, AlertRegistry, Severity};
use crate::config::{DbConfig, TlsConfig};
use crate::node::Node;

use codec::{
    capabilities::*, column_name, is_eof_packet, is_err_packet, is_ok_packet, read_lenenc_int,
    read_lenenc_str, COM_PING, COM_QUERY,
};
use handshake::{compute_auth_response, ssl_request, ErrPacket, HandshakeResponse, InitialHandshake};

/// Which certificate generation a node's connection currently uses.
/// Persists across reconnect attempts on the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlsState {
    /// The current certificate configuration
    Current = 0,
    /// The previous certificate generation, used mid-rotation
    Old = 1,
    /// No client certificate (plaintext connection)
    None = 2,
}

impl TlsState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TlsState::Old,
            2 => TlsState::None,
            _ => TlsState::Current,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Disconnected")]
    Disconnected,
    #[error("Query failed: {0}")]
    Query(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Server does not support TLS")]
    TlsUnsupported,
}

// ============================================================================
// TLS profiles
// ============================================================================

/// Client TLS configurations, one per certificate generation
#[derive(Clone, Default)]
pub struct TlsProfiles {
    current: Option<Arc<rustls::ClientConfig>>,
    old: Option<Arc<rustls::ClientConfig>>,
}

impl TlsProfiles {
    /// Load certificate material once, at startup
    pub fn from_config(cfg: &TlsConfig) -> Result<Self, ConnectError> {
        if !cfg.enabled {
            return Ok(Self::default());
        }
        let current = Some(load_client_config(
            &cfg.ca_cert,
            &cfg.client_cert,
            &cfg.client_key,
        )?);
        let old = if cfg.old_client_cert.is_empty() {
            None
        } else {
            Some(load_client_config(
                &cfg.ca_cert,
                &cfg.old_client_cert,
                &cfg.old_client_key,
            )?)
        };
        Ok(Self { current, old })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let cfg = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth(),
        );
        Self {
            current: Some(cfg.clone()),
            old: Some(cfg),
        }
    }

    fn for_state(&self, state: TlsState) -> Option<Arc<rustls::ClientConfig>> {
        match state {
            TlsState::Current => self.current.clone(),
            TlsState::Old => self.old.clone(),
            TlsState::None => None,
        }
    }
}

fn load_client_config(
    ca: &str,
    cert: &str,
    key: &str,
) -> Result<Arc<rustls::ClientConfig>, ConnectError> {
    let read = |path: &str| {
        std::fs::read(path).map_err(|e| ConnectError::Tls(format!("read {}: {}", path, e)))
    };

    let mut roots = rustls::RootCertStore::empty();
    let ca_pem = read(ca)?;
    for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
        let cert = cert.map_err(|e| ConnectError::Tls(format!("parse {}: {}", ca, e)))?;
        roots
            .add(cert)
            .map_err(|e| ConnectError::Tls(e.to_string()))?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = if cert.is_empty() {
        builder.with_no_client_auth()
    } else {
        let cert_pem = read(cert)?;
        let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::Tls(format!("parse {}: {}", cert, e)))?;
        let key_pem = read(key)?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| ConnectError::Tls(format!("parse {}: {}", key, e)))?
            .ok_or_else(|| ConnectError::Tls(format!("no private key in {}", key)))?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| ConnectError::Tls(e.to_string()))?
    };
    Ok(Arc::new(config))
}

// ============================================================================
// Connection profile & dialing
// ============================================================================

/// Everything one connection attempt needs, resolved for one security state
pub struct ConnectProfile {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls_state: TlsState,
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

/// The dial step of a connection attempt, separated out so the fallback
/// ladder can be exercised without a live server.
pub trait Dial {
    type Link;

    fn dial(
        &self,
        profile: &ConnectProfile,
    ) -> impl std::future::Future<Output = Result<Self::Link, ConnectError>>;
}

/// Production dialer: TCP plus the MySQL handshake
pub struct MysqlDialer;

impl Dial for MysqlDialer {
    type Link = NodeConnection;

    async fn dial(&self, profile: &ConnectProfile) -> Result<NodeConnection, ConnectError> {
        NodeConnection::connect(profile).await
    }
}

/// The fallback ladder starting from a node's persisted state: the persisted
/// state first, then the remaining states in canonical order, so a node
/// stuck on the old certificate still recovers to the current one once the
/// rotation completes.
fn ladder_from(start: TlsState) -> Vec<TlsState> {
    let canonical = [TlsState::Current, TlsState::Old, TlsState::None];
    let mut order = vec![start];
    order.extend(canonical.iter().copied().filter(|s| *s != start));
    order
}

/// Opens node connections, walking the security-state ladder when the fleet
/// has TLS enabled
pub struct Connector<D = MysqlDialer> {
    dialer: D,
    tls_enabled: bool,
    profiles: TlsProfiles,
    user: String,
    password: String,
    alerts: Arc<AlertRegistry>,
}

impl Connector<MysqlDialer> {
    pub fn from_config(
        tls: &TlsConfig,
        db: &DbConfig,
        alerts: Arc<AlertRegistry>,
    ) -> Result<Self, ConnectError> {
        Ok(Self::with_dialer(
            MysqlDialer,
            tls.enabled,
            TlsProfiles::from_config(tls)?,
            db,
            alerts,
        ))
    }
}

impl<D: Dial> Connector<D> {
    pub fn with_dialer(
        dialer: D,
        tls_enabled: bool,
        profiles: TlsProfiles,
        db: &DbConfig,
        alerts: Arc<AlertRegistry>,
    ) -> Self {
        Self {
            dialer,
            tls_enabled,
            profiles,
            user: db.user.clone(),
            password: db.password.clone(),
            alerts,
        }
    }

    fn profile(&self, node: &Node, state: TlsState) -> ConnectProfile {
        ConnectProfile {
            host: node.host().to_string(),
            port: node.port(),
            user: self.user.clone(),
            password: self.password.clone(),
            tls_state: state,
            tls: self.profiles.for_state(state),
        }
    }

    /// Connect to a node, adapting its security state across certificate
    /// rotations. The state that succeeds is persisted on the node.
    pub async fn connect(&self, node: &Node) -> Result<D::Link, ConnectError> {
        if !self.tls_enabled {
            return self.dialer.dial(&self.profile(node, TlsState::None)).await;
        }

        let start = node.tls_state();
        let mut last_err = ConnectError::Connect("no connection attempt made".to_string());
        for state in ladder_from(start) {
            if state == TlsState::Old && self.profiles.old.is_none() {
                continue;
            }
            match self.dialer.dial(&self.profile(node, state)).await {
                Ok(link) => {
                    match state {
                        TlsState::Old if start != TlsState::Old => {
                            self.alerts.raise(
                                codes::TLS_OLD_CERT,
                                node.url(),
                                Severity::Warning,
                                format!(
                                    "Node {} accepts only the previous certificate generation, rotation likely in progress",
                                    node.url()
                                ),
                            );
                        }
                        TlsState::Current => {
                            self.alerts.resolve(codes::TLS_OLD_CERT, node.url());
                        }
                        _ => {}
                    }
                    node.set_tls_state(state);
                    return Ok(link);
                }
                Err(e) => {
                    debug!(node = node.url(), state = ?state, error = %e, "Connection attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

// ============================================================================
// Node connection
// ============================================================================

enum Transport {
    Plain(Framed<TcpStream, PacketCodec>),
    Tls(Box<Framed<TlsStream<TcpStream>, PacketCodec>>),
}

impl Transport {
    async fn send(&mut self, packet: Packet) -> Result<(), ConnectError> {
        match self {
            Transport::Plain(f) => f.send(packet).await,
            Transport::Tls(f) => f.send(packet).await,
        }
        .map_err(|e| ConnectError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Packet, ConnectError> {
        match self {
            Transport::Plain(f) => f.next().await,
            Transport::Tls(f) => f.next().await,
        }
        .ok_or(ConnectError::Disconnected)?
        .map_err(|e| ConnectError::Io(e.to_string()))
    }
}

/// A live, authenticated connection to one node, used for status polling
pub struct NodeConnection {
    transport: Transport,
    #[allow(dead_code)]
    capabilities: u32,
}

impl NodeConnection {
    /// TCP connect, optional TLS upgrade, and authentication
    pub async fn connect(profile: &ConnectProfile) -> Result<Self, ConnectError> {
        let addr = format!("{}:{}", profile.host, profile.port);
        debug!(addr = %addr, state = ?profile.tls_state, "Connecting to node");

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ConnectError::Connect(e.to_string()))?;
        let mut framed = Framed::new(stream, PacketCodec);

        let first = framed
            .next()
            .await
            .ok_or(ConnectError::Disconnected)?
            .map_err(|e| ConnectError::Io(e.to_string()))?;

        // the server can reject before handshaking, e.g. host blocked
        if is_err_packet(&first.payload) {
            return Err(ConnectError::Connect(error_message(&first.payload)));
        }

        let server_handshake = InitialHandshake::parse(&first.payload)
            .ok_or_else(|| ConnectError::Protocol("Invalid server handshake".to_string()))?;

        let mut caps = DEFAULT_CAPABILITIES & server_handshake.capability_flags;
        let auth_response =
            compute_auth_response(&profile.password, &server_handshake.auth_plugin_data());

        let mut transport = match &profile.tls {
            Some(tls_config) => {
                if !server_handshake.supports_tls() {
                    return Err(ConnectError::TlsUnsupported);
                }
                caps |= CLIENT_SSL;
                framed
                    .send(ssl_request(caps, 0x21))
                    .await
                    .map_err(|e| ConnectError::Io(e.to_string()))?;

                let server_name = rustls::pki_types::ServerName::try_from(profile.host.clone())
                    .map_err(|e| ConnectError::Tls(e.to_string()))?;
                let tls_stream = TlsConnector::from(tls_config.clone())
                    .connect(server_name, framed.into_inner())
                    .await
                    .map_err(|e| ConnectError::Tls(e.to_string()))?;
                let mut framed = Framed::new(tls_stream, PacketCodec);

                let response = HandshakeResponse {
                    capability_flags: caps,
                    max_packet_size: 16 * 1024 * 1024,
                    character_set: 0x21,
                    username: profile.user.clone(),
                    auth_response,
                    auth_plugin_name: server_handshake.auth_plugin_name.clone(),
                };
                framed
                    .send(response.encode(2))
                    .await
                    .map_err(|e| ConnectError::Io(e.to_string()))?;
                Transport::Tls(Box::new(framed))
            }
            None => {
                let response = HandshakeResponse {
                    capability_flags: caps,
                    max_packet_size: 16 * 1024 * 1024,
                    character_set: 0x21,
                    username: profile.user.clone(),
                    auth_response,
                    auth_plugin_name: server_handshake.auth_plugin_name.clone(),
                };
                framed
                    .send(response.encode(1))
                    .await
                    .map_err(|e| ConnectError::Io(e.to_string()))?;
                Transport::Plain(framed)
            }
        };

        let reply = transport.recv().await?;
        if is_err_packet(&reply.payload) {
            return Err(ConnectError::Auth(error_message(&reply.payload)));
        }
        if !is_ok_packet(&reply.payload) {
            return Err(ConnectError::Protocol(
                "Expected OK packet after authentication".to_string(),
            ));
        }

        debug!(addr = %addr, "Node authentication successful");
        Ok(Self {
            transport,
            capabilities: caps,
        })
    }

    pub async fn ping(&mut self) -> Result<(), ConnectError> {
        self.transport.send(Packet::command(COM_PING, &[])).await?;
        let reply = self.transport.recv().await?;
        if is_ok_packet(&reply.payload) {
            Ok(())
        } else {
            Err(ConnectError::Protocol(
                "Expected OK packet for ping".to_string(),
            ))
        }
    }

    /// Run a text-protocol query and decode each row into a column/value
    /// map. SQL NULL leaves the column absent from its row.
    pub async fn query_rows(
        &mut self,
        sql: &str,
    ) -> Result<Vec<HashMap<String, String>>, ConnectError> {
        self.transport
            .send(Packet::command(COM_QUERY, sql.as_bytes()))
            .await?;

        let first = self.transport.recv().await?;
        if is_err_packet(&first.payload) {
            return Err(ConnectError::Query(error_message(&first.payload)));
        }
        if is_ok_packet(&first.payload) {
            // statement produced no result set
            return Ok(Vec::new());
        }

        let mut buf = &first.payload[..];
        let col_count = read_lenenc_int(&mut buf)
            .ok_or_else(|| ConnectError::Protocol("Invalid column count".to_string()))?
            as usize;

        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            let def = self.transport.recv().await?;
            columns.push(column_name(&def.payload).unwrap_or_default());
        }

        // classic framing: EOF terminates the column definitions
        let after_columns = self.transport.recv().await?;
        let mut next = if is_eof_packet(&after_columns.payload) {
            self.transport.recv().await?
        } else {
            after_columns
        };

        let mut rows = Vec::new();
        loop {
            if is_eof_packet(&next.payload) || is_ok_packet(&next.payload) {
                break;
            }
            if is_err_packet(&next.payload) {
                return Err(ConnectError::Query(error_message(&next.payload)));
            }

            let mut buf = &next.payload[..];
            let mut row = HashMap::with_capacity(columns.len());
            for name in &columns {
                match read_lenenc_str(&mut buf) {
                    Some(Some(value)) => {
                        row.insert(name.clone(), value);
                    }
                    Some(None) => {} // NULL
                    None => {
                        return Err(ConnectError::Protocol("Truncated row".to_string()));
                    }
                }
            }
            rows.push(row);
            next = self.transport.recv().await?;
        }
        Ok(rows)
    }

    /// Run a two-column name/value query (`SHOW VARIABLES`, `SHOW STATUS`)
    /// into a map.
    pub async fn query_kv(&mut self, sql: &str) -> Result<HashMap<String, String>, ConnectError> {
        let rows = self.query_rows(sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let name = row.remove("Variable_name")?;
                let value = row.remove("Value").unwrap_or_default();
                Some((name, value))
            })
            .collect())
    }
}

fn error_message(payload: &[u8]) -> String {
    ErrPacket::parse(payload)
        .map(|e| format!("{} ({})", e.error_message, e.error_code))
        .unwrap_or_else(|| "Malformed error packet".to_string())
}
