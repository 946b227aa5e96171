//! Public handle to a client connection.

use crate::address::AddressRotation;
use crate::config::{AuthData, ClientConfig};
use crate::consumer::{EventConsumer, WatchSource};
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::packet::Request;
use crate::session::{ConnectionState, ConnectionStats, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zk_wire::OpCode;

/// Handle owning the background dispatch task of one session
pub struct ClientConnection {
    shared: Arc<Shared>,
    addresses: Mutex<Option<AddressRotation>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientConnection {
    /// Resolve the configured servers and prepare a connection
    pub fn new(
        config: ClientConfig,
        consumer: Arc<dyn EventConsumer>,
    ) -> Result<Self, SessionError> {
        Self::build(config, consumer, None)
    }

    /// Like [`ClientConnection::new`], re-registering watches from `watches`
    /// after every reconnect
    pub fn with_watch_source(
        config: ClientConfig,
        consumer: Arc<dyn EventConsumer>,
        watches: Arc<dyn WatchSource>,
    ) -> Result<Self, SessionError> {
        Self::build(config, consumer, Some(watches))
    }

    fn build(
        config: ClientConfig,
        consumer: Arc<dyn EventConsumer>,
        watches: Option<Arc<dyn WatchSource>>,
    ) -> Result<Self, SessionError> {
        let addrs = config.resolve_servers()?;
        info!(
            "Initiating client connection, servers={:?} sessionTimeout={:?}",
            addrs, config.session_timeout
        );
        let addresses =
            AddressRotation::new(addrs, config.max_reconnect_jitter, config.lap_cooldown);
        let shared = Shared::new(config, addresses.len(), consumer, watches);

        Ok(Self {
            shared: Arc::new(shared),
            addresses: Mutex::new(Some(addresses)),
            task: Mutex::new(None),
        })
    }

    /// Spawn the dispatch task; must be called from within a tokio runtime
    pub fn start(&self) {
        let Some(addresses) = self.addresses.lock().take() else {
            warn!("Client connection already started");
            return;
        };
        let dispatcher = Dispatcher::new(Arc::clone(&self.shared), addresses);
        *self.task.lock() = Some(tokio::spawn(dispatcher.run()));
    }

    /// Queue a request and return its xid.
    ///
    /// The outcome always arrives through the consumer. When the connection
    /// is no longer alive the packet is failed right away.
    pub fn submit(&self, request: Request) -> i32 {
        let shared = &self.shared;
        match shared.outgoing.enqueue(request, || shared.is_alive()) {
            Ok(xid) => {
                shared.wake();
                xid
            }
            Err(packet) => {
                let xid = packet.xid().unwrap_or_default();
                debug!("Connection not alive, failing xid {}", xid);
                shared.fail_for_connection_loss(packet);
                xid
            }
        }
    }

    /// Add a credential, sending it now if the session is alive
    pub fn add_auth_info(&self, scheme: impl Into<String>, data: impl Into<Vec<u8>>) {
        let auth = AuthData::new(scheme, data);
        self.shared.add_auth(auth.clone());

        if !self.shared.is_alive() {
            return;
        }
        let request = Request::new(OpCode::Auth).with_record(zk_wire::AuthPacket {
            auth_type: 0,
            scheme: auth.scheme,
            auth: auth.data,
        });
        self.submit(request);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Receiver observing every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe_state()
    }

    /// Session id, 0 until the first negotiation
    pub fn session_id(&self) -> i64 {
        self.shared.session_id()
    }

    /// Session password assigned by the server
    pub fn session_passwd(&self) -> Vec<u8> {
        self.shared.session_passwd()
    }

    /// Highest zxid seen in a reply
    pub fn last_zxid(&self) -> i64 {
        self.shared.last_zxid()
    }

    /// Timeout granted by the server, if negotiated
    pub fn negotiated_timeout(&self) -> Option<Duration> {
        self.shared.negotiated_timeout()
    }

    /// Traffic counters
    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats()
    }

    /// Close the connection and wait for the dispatch task to finish.
    ///
    /// Anything still queued or in flight fails with a session-expired code.
    pub async fn close(&self) {
        if self.shared.is_alive() {
            debug!("Closing client for session 0x{:x}", self.shared.session_id());
            self.shared.mark_closing();
            self.shared.force_state(ConnectionState::Closed);
            self.shared.wake();
        }

        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!("Dispatch task ended abnormally: {}", e);
                }
                info!("Session 0x{:x} closed", self.shared.session_id());
            }
            None => {
                // no dispatch task will drain the queue
                for packet in self.shared.outgoing.drain_all() {
                    self.shared.fail_for_connection_loss(packet);
                }
            }
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if self.shared.is_alive() {
            self.shared.mark_closing();
            self.shared.force_state(ConnectionState::Closed);
            self.shared.wake();
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("shared", &self.shared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ChannelConsumer, Delivery, KeeperState, WatchedEvent};
    use crate::packet::Packet;
    use crate::transport::listen_tcp;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};
    use zk_wire::{
        encode_frame, ConnectRequest, ConnectResponse, ErrorCode, GetDataRequest, GetDataResponse,
        InputArchive, Record, ReplyHeader, RequestHeader, Stat, AUTH_XID, PING_XID,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(addrs: &[std::net::SocketAddr]) -> ClientConfig {
        ClientConfig {
            servers: addrs.iter().map(|a| a.to_string()).collect(),
            session_timeout: Duration::from_secs(6),
            shuffle_servers: false,
            reconnect_pause: Duration::from_millis(10),
            max_reconnect_jitter: Duration::from_millis(5),
            lap_cooldown: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    fn connection(
        config: ClientConfig,
    ) -> (ClientConnection, mpsc::UnboundedReceiver<Delivery>) {
        let (consumer, rx) = ChannelConsumer::new();
        let conn = ClientConnection::new(config, Arc::new(consumer)).unwrap();
        (conn, rx)
    }

    async fn read_payload(stream: &mut TcpStream) -> Bytes {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(prefix) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        Bytes::from(payload)
    }

    async fn read_request_header(stream: &mut TcpStream) -> RequestHeader {
        let payload = read_payload(stream).await;
        RequestHeader::decode(&mut InputArchive::new(payload)).unwrap()
    }

    /// Accept one connection and answer its handshake
    async fn handshake(
        listener: &TcpListener,
        timeout_ms: i32,
        session_id: i64,
    ) -> (TcpStream, ConnectRequest) {
        let (mut stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut request = ConnectRequest::default();
        request
            .deserialize(&mut InputArchive::new(read_payload(&mut stream).await))
            .unwrap();

        let response = ConnectResponse {
            protocol_version: 0,
            timeout: timeout_ms,
            session_id,
            passwd: vec![1; 16],
        };
        stream
            .write_all(&encode_frame(&[&response as &dyn Record]))
            .await
            .unwrap();
        (stream, request)
    }

    async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> WatchedEvent {
        match next_delivery(rx).await {
            Delivery::Event(event) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    async fn next_packet(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Packet {
        match next_delivery(rx).await {
            Delivery::Packet(packet) => packet,
            other => panic!("expected a packet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        conn.start();

        let (mut server, connect) = handshake(&listener, 6000, 0x99).await;
        assert_eq!(connect.session_id, 0);
        assert_eq!(connect.timeout, 6000);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.session_id(), 0x99);
        assert_eq!(conn.negotiated_timeout(), Some(Duration::from_millis(6000)));

        let xid = conn.submit(
            Request::new(OpCode::GetData)
                .with_record(GetDataRequest {
                    path: "/a".into(),
                    watch: false,
                })
                .with_response(GetDataResponse::default())
                .with_paths("/a", "/a"),
        );
        assert_eq!(xid, 1);

        let header = read_request_header(&mut server).await;
        assert_eq!(header, RequestHeader::new(1, OpCode::GetData));

        let body = GetDataResponse {
            data: Some(b"hello".to_vec()),
            stat: Stat::default(),
        };
        let reply = ReplyHeader::new(1, 5, 0);
        server
            .write_all(&encode_frame(&[&reply as &dyn Record, &body as &dyn Record]))
            .await
            .unwrap();

        let packet = next_packet(&mut rx).await;
        assert!(packet.is_finished());
        assert_eq!(packet.err(), Some(0));
        assert_eq!(
            packet.response_as::<GetDataResponse>().unwrap().data.as_deref(),
            Some(&b"hello"[..])
        );
        assert_eq!(conn.last_zxid(), 5);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_servers_are_skipped_in_order() {
        let mut dead = Vec::new();
        for _ in 0..2 {
            let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
            dead.push(listener.local_addr().unwrap());
        }
        let live = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addrs = [dead[0], dead[1], live.local_addr().unwrap()];

        let (conn, mut rx) = connection(test_config(&addrs));
        conn.start();
        let (_server, _) = handshake(&live, 6000, 7).await;

        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);
        assert_eq!(conn.stats().connect_attempts, 3);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_reconnects_and_resumes_session() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let config = ClientConfig {
            max_frame_len: 1024,
            ..test_config(&[listener.local_addr().unwrap()])
        };
        let (conn, mut rx) = connection(config);
        conn.start();

        let (mut server, _) = handshake(&listener, 6000, 0x55).await;
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        server.write_all(&4096u32.to_be_bytes()).await.unwrap();
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);

        let (_server, connect) = handshake(&listener, 6000, 0x55).await;
        assert_eq!(connect.session_id, 0x55);
        assert_eq!(connect.passwd, vec![1; 16]);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_expired_session_never_reconnects() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        let mut states = conn.subscribe_state();

        // queued before the connection exists
        conn.submit(Request::new(OpCode::Exists));
        conn.start();

        let (_server, _) = handshake(&listener, 0, 0).await;
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Expired);

        let packet = next_packet(&mut rx).await;
        assert_eq!(packet.xid(), Some(1));
        assert_eq!(packet.err(), Some(ErrorCode::SessionExpired.code()));

        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Expired))
            .await
            .unwrap()
            .unwrap();
        assert!(timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err());
        assert_eq!(conn.stats().connect_attempts, 1);

        // late traffic fails immediately
        conn.submit(Request::new(OpCode::Exists));
        assert_eq!(
            next_packet(&mut rx).await.err(),
            Some(ErrorCode::SessionExpired.code())
        );
    }

    #[tokio::test]
    async fn test_connection_loss_fails_every_packet_once() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        conn.start();

        let (mut server, _) = handshake(&listener, 6000, 1).await;
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        for _ in 0..3 {
            conn.submit(Request::new(OpCode::Exists));
        }
        for xid in 1..=3 {
            assert_eq!(read_request_header(&mut server).await.xid, xid);
        }
        drop(server);

        for xid in 1..=3 {
            let packet = next_packet(&mut rx).await;
            assert_eq!(packet.xid(), Some(xid));
            assert_eq!(packet.err(), Some(ErrorCode::ConnectionLoss.code()));
            assert!(packet.is_finished());
        }
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);

        conn.close().await;
        while let Ok(delivery) = rx.try_recv() {
            assert!(
                !matches!(delivery, Delivery::Packet(_)),
                "packet completed twice: {:?}",
                delivery
            );
        }
    }

    #[tokio::test]
    async fn test_unanswered_handshake_times_out_and_reconnects() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let config = ClientConfig {
            session_timeout: Duration::from_millis(300),
            ..test_config(&[listener.local_addr().unwrap()])
        };
        let (conn, mut rx) = connection(config);
        conn.submit(Request::new(OpCode::Exists));
        conn.start();

        // accepted but never answered
        let (mut silent, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let opened = Instant::now();
        read_payload(&mut silent).await;
        assert_eq!(read_request_header(&mut silent).await.xid, 1);

        let packet = next_packet(&mut rx).await;
        assert_eq!(packet.xid(), Some(1));
        assert_eq!(packet.err(), Some(ErrorCode::ConnectionLoss.code()));
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);
        // connect timeout is the session timeout over one server
        assert!(opened.elapsed() >= Duration::from_millis(250));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let (_server, connect) = handshake(&listener, 300, 0x21).await;
        assert_eq!(connect.session_id, 0);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);
        assert_eq!(conn.stats().connect_attempts, 2);

        conn.close().await;
        drop(silent);
    }

    #[tokio::test]
    async fn test_silent_server_after_handshake_times_out() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        conn.start();

        // read timeout 200ms; pings go unanswered
        let (mut server, _) = handshake(&listener, 300, 0x22).await;
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);
        let answered = Instant::now();

        conn.submit(Request::new(OpCode::Exists));
        assert_eq!(read_request_header(&mut server).await.xid, 1);

        let packet = next_packet(&mut rx).await;
        assert_eq!(packet.err(), Some(ErrorCode::ConnectionLoss.code()));
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);
        assert!(answered.elapsed() >= Duration::from_millis(150));

        let (_server, connect) = handshake(&listener, 300, 0x22).await;
        assert_eq!(connect.session_id, 0x22);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        conn.close().await;
        drop(server);
    }

    #[tokio::test]
    async fn test_ping_sent_after_half_read_timeout() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        conn.start();

        // read timeout 200ms, ping due after 100ms of silence
        let (mut server, _) = handshake(&listener, 300, 2).await;
        let answered = Instant::now();
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        let header = timeout(WAIT, read_request_header(&mut server)).await.unwrap();
        assert_eq!(header, RequestHeader::new(PING_XID, OpCode::Ping));
        let waited = answered.elapsed();
        assert!(
            waited >= Duration::from_millis(90) && waited < Duration::from_millis(190),
            "ping sent after {:?}",
            waited
        );

        let ack = ReplyHeader::new(PING_XID, 0, 0);
        server
            .write_all(&encode_frame(&[&ack as &dyn Record]))
            .await
            .unwrap();

        timeout(WAIT, async {
            while conn.stats().last_rtt.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        conn.close().await;
        assert!(conn.stats().frames_received >= 2);
    }

    #[tokio::test]
    async fn test_add_auth_info_is_sent_now_and_on_reconnect() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (conn, mut rx) = connection(test_config(&[listener.local_addr().unwrap()]));
        conn.start();

        let (mut server, _) = handshake(&listener, 6000, 3).await;
        assert_eq!(next_event(&mut rx).await.state, KeeperState::SyncConnected);

        conn.add_auth_info("digest", "bob:pw");
        let header = read_request_header(&mut server).await;
        assert_eq!(header, RequestHeader::new(AUTH_XID, OpCode::Auth));

        drop(server);
        assert_eq!(next_event(&mut rx).await.state, KeeperState::Disconnected);

        let (mut server, _) = handshake(&listener, 6000, 3).await;
        let header = read_request_header(&mut server).await;
        assert_eq!(header, RequestHeader::new(AUTH_XID, OpCode::Auth));

        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_without_start_fails_queued_packets() {
        let (conn, mut rx) = connection(test_config(&["127.0.0.1:9".parse().unwrap()]));
        conn.submit(Request::new(OpCode::Exists));
        conn.close().await;

        assert_eq!(conn.state(), ConnectionState::Closed);
        let packet = next_packet(&mut rx).await;
        assert_eq!(packet.err(), Some(ErrorCode::SessionExpired.code()));
    }
}
