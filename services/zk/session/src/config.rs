//! Connection configuration.

use crate::error::SessionError;
use rand::seq::SliceRandom;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::warn;
use zk_wire::DEFAULT_MAX_FRAME_LEN;

/// Port used when a server entry omits one
pub const DEFAULT_PORT: u16 = 2181;

/// Credential replayed after every (re)connect
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthData {
    /// Auth scheme, e.g. `digest`
    pub scheme: String,
    /// Opaque credential bytes
    pub data: Vec<u8>,
}

impl AuthData {
    /// Create a credential
    pub fn new(scheme: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: scheme.into(),
            data: data.into(),
        }
    }
}

/// Configuration for a client connection
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server entries as `host:port`
    pub servers: Vec<String>,
    /// Requested session timeout
    pub session_timeout: Duration,
    /// Path prefix stripped from notification paths
    pub chroot: Option<String>,
    /// Credentials sent after every connect, in order
    pub auth: Vec<AuthData>,
    /// Skip re-registering watches after reconnect
    pub disable_auto_watch_reset: bool,
    /// Shuffle the resolved server list once at startup
    pub shuffle_servers: bool,
    /// Upper bound (exclusive) on inbound frame length
    pub max_frame_len: usize,
    /// Ceiling on a single socket connect
    pub connect_attempt_timeout: Duration,
    /// Pause after tearing down a connection
    pub reconnect_pause: Duration,
    /// Upper bound of the random delay before each reconnect
    pub max_reconnect_jitter: Duration,
    /// Extra delay after a full lap over the server list
    pub lap_cooldown: Duration,
    /// Session id to resume, 0 for a new session
    pub session_id: i64,
    /// Password of the session to resume
    pub session_passwd: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![format!("127.0.0.1:{}", DEFAULT_PORT)],
            session_timeout: Duration::from_secs(30),
            chroot: None,
            auth: Vec::new(),
            disable_auto_watch_reset: false,
            shuffle_servers: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_attempt_timeout: Duration::from_secs(10),
            reconnect_pause: Duration::from_millis(100),
            max_reconnect_jitter: Duration::from_millis(50),
            lap_cooldown: Duration::from_secs(1),
            session_id: 0,
            session_passwd: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Parse `host1:port,host2:port/chroot`
    pub fn from_connect_string(connect_string: &str) -> Result<Self, SessionError> {
        let (hosts, chroot) = match connect_string.find('/') {
            Some(idx) => (&connect_string[..idx], Some(&connect_string[idx..])),
            None => (connect_string, None),
        };

        let chroot = match chroot {
            None | Some("/") => None,
            Some(path) if path.ends_with('/') => {
                return Err(SessionError::InvalidConnectString(format!(
                    "chroot {} must not end with /",
                    path
                )));
            }
            Some(path) => Some(path.to_string()),
        };

        let servers: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| {
                if host.contains(':') {
                    host.to_string()
                } else {
                    format!("{}:{}", host, DEFAULT_PORT)
                }
            })
            .collect();

        if servers.is_empty() {
            return Err(SessionError::InvalidConnectString(
                connect_string.to_string(),
            ));
        }

        Ok(Self {
            servers,
            chroot,
            ..Self::default()
        })
    }

    /// Resolve every server entry, skipping entries that fail to resolve
    pub fn resolve_servers(&self) -> Result<Vec<SocketAddr>, SessionError> {
        let mut addrs = Vec::new();
        for server in &self.servers {
            match server.to_socket_addrs() {
                Ok(resolved) => addrs.extend(resolved),
                Err(e) => warn!("Unable to resolve server {}: {}", server, e),
            }
        }

        if addrs.is_empty() {
            return Err(SessionError::NoServers);
        }

        if self.shuffle_servers {
            addrs.shuffle(&mut rand::thread_rng());
        }
        Ok(addrs)
    }

    /// Session timeout in whole milliseconds, as sent on the wire
    pub fn session_timeout_ms(&self) -> i32 {
        self.session_timeout.as_millis().min(i32::MAX as u128) as i32
    }
}
