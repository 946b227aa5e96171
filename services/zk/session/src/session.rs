//! Per-connection session state shared between callers and the dispatch task.
//!
//! Application threads only touch the two queues, the state channel and the
//! wakeup signal. Everything else is written by the dispatch task alone.

use crate::config::{AuthData, ClientConfig};
use crate::consumer::{EventConsumer, WatchSource};
use crate::packet::Packet;
use crate::queue::{OutgoingQueue, PendingQueue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, trace};
use zk_wire::ErrorCode;

/// Lifecycle state of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Dialing a server or waiting for the connect response
    Connecting,
    /// Session established
    Connected,
    /// Closed by the application
    Closed,
    /// Authentication rejected
    AuthFailed,
    /// Session expired on the server
    Expired,
}

impl ConnectionState {
    /// Whether the connection may still (re)connect
    pub fn is_alive(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::AuthFailed => "AUTH_FAILED",
            ConnectionState::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// Statistics for a connection
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    /// Frames written, including handshake and pings
    pub frames_sent: u64,
    /// Frames read, including the connect response
    pub frames_received: u64,
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Socket connects attempted
    pub connect_attempts: u64,
    /// Timestamp of last received frame
    pub last_frame_in: Option<Instant>,
    /// Timestamp of last sent frame
    pub last_frame_out: Option<Instant>,
    /// Most recent ping round-trip time
    pub last_rtt: Option<Duration>,
}

#[derive(Debug, Clone)]
struct SessionInfo {
    session_id: i64,
    passwd: Vec<u8>,
    last_zxid: i64,
    negotiated_timeout: Option<Duration>,
    read_timeout: Duration,
    connect_timeout: Duration,
}

/// State shared by the connection handle and its dispatch task
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) outgoing: OutgoingQueue,
    pub(crate) pending: PendingQueue,
    pub(crate) consumer: Arc<dyn EventConsumer>,
    pub(crate) watches: Option<Arc<dyn WatchSource>>,
    pub(crate) wakeup: Notify,
    server_count: usize,
    session: Mutex<SessionInfo>,
    auth: Mutex<Vec<AuthData>>,
    state: watch::Sender<ConnectionState>,
    closing: AtomicBool,
    stats: Mutex<ConnectionStats>,
}

impl Shared {
    pub(crate) fn new(
        config: ClientConfig,
        server_count: usize,
        consumer: Arc<dyn EventConsumer>,
        watches: Option<Arc<dyn WatchSource>>,
    ) -> Self {
        let server_count = server_count.max(1);
        let session = SessionInfo {
            session_id: config.session_id,
            passwd: config.session_passwd.clone(),
            last_zxid: 0,
            negotiated_timeout: None,
            read_timeout: config.session_timeout * 2 / 3,
            connect_timeout: config.session_timeout / server_count as u32,
        };
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let auth = config.auth.clone();

        Self {
            config,
            outgoing: OutgoingQueue::new(),
            pending: PendingQueue::new(),
            consumer,
            watches,
            wakeup: Notify::new(),
            server_count,
            session: Mutex::new(session),
            auth: Mutex::new(auth),
            state,
            closing: AtomicBool::new(false),
            stats: Mutex::new(ConnectionStats::default()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Move to `next` unless a terminal state was already reached
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_alive() && *current != next {
                debug!("Connection state {} -> {}", current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Unconditionally set the state
    pub(crate) fn force_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        debug!("Connection state {} -> {}", previous, next);
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) fn session_id(&self) -> i64 {
        self.session.lock().session_id
    }

    pub(crate) fn session_passwd(&self) -> Vec<u8> {
        self.session.lock().passwd.clone()
    }

    pub(crate) fn last_zxid(&self) -> i64 {
        self.session.lock().last_zxid
    }

    pub(crate) fn negotiated_timeout(&self) -> Option<Duration> {
        self.session.lock().negotiated_timeout
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.session.lock().read_timeout
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.session.lock().connect_timeout
    }

    /// Advance the last seen zxid; older values are ignored
    pub(crate) fn update_last_zxid(&self, zxid: i64) {
        let mut session = self.session.lock();
        if zxid > session.last_zxid {
            session.last_zxid = zxid;
        }
    }

    /// Store the outcome of a successful negotiation
    pub(crate) fn apply_negotiated(&self, timeout_ms: i32, session_id: i64, passwd: Vec<u8>) {
        let negotiated = Duration::from_millis(timeout_ms.max(0) as u64);
        let mut session = self.session.lock();
        session.negotiated_timeout = Some(negotiated);
        session.read_timeout = negotiated * 2 / 3;
        session.connect_timeout = negotiated / self.server_count as u32;
        session.session_id = session_id;
        session.passwd = passwd;
    }

    pub(crate) fn auth_info(&self) -> Vec<AuthData> {
        self.auth.lock().clone()
    }

    pub(crate) fn add_auth(&self, auth: AuthData) {
        self.auth.lock().push(auth);
    }

    pub(crate) fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.frames_sent += 1;
        stats.bytes_sent += bytes as u64;
        stats.last_frame_out = Some(Instant::now());
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.frames_received += 1;
        stats.bytes_received += bytes as u64;
        stats.last_frame_in = Some(Instant::now());
    }

    pub(crate) fn record_connect_attempt(&self) {
        self.stats.lock().connect_attempts += 1;
    }

    pub(crate) fn record_rtt(&self, rtt: Duration) {
        self.stats.lock().last_rtt = Some(rtt);
    }

    /// Error code reported for packets failed in the current state
    pub(crate) fn connection_loss_code(&self) -> ErrorCode {
        match self.state() {
            ConnectionState::AuthFailed => ErrorCode::AuthFailed,
            ConnectionState::Closed | ConnectionState::Expired => ErrorCode::SessionExpired,
            ConnectionState::Connecting | ConnectionState::Connected => ErrorCode::ConnectionLoss,
        }
    }

    /// Register the packet's watch, mark it finished and hand it off
    pub(crate) fn complete_packet(&self, mut packet: Packet) {
        if let Some(registration) = packet.watch_registration.as_ref() {
            registration.register(packet.err().unwrap_or_default());
        }
        packet.mark_finished();
        trace!("Finished packet {:?}", packet);
        self.consumer.queue_packet(packet);
    }

    /// Fail a packet with the error code dictated by the current state.
    ///
    /// Packets without a reply header are internal and dropped silently.
    pub(crate) fn fail_for_connection_loss(&self, mut packet: Packet) {
        if packet.reply_header.is_none() {
            return;
        }
        packet.set_err(self.connection_loss_code().code());
        self.complete_packet(packet);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state())
            .field("session_id", &format_args!("0x{:x}", self.session_id()))
            .field("outgoing", &self.outgoing.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
