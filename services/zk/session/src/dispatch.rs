//! Dispatch loop: the single task that owns the socket.
//!
//! Each iteration connects if needed, checks the receive deadline, schedules
//! a ping when the connection has been quiet for half the read timeout, and
//! then performs one I/O step: read one frame if the socket is readable,
//! otherwise write one queued packet if writing is enabled. Any error tears
//! the connection down and the loop starts over unless the session reached a
//! terminal state.

use crate::address::AddressRotation;
use crate::consumer::{KeeperState, WatchedEvent};
use crate::error::SessionError;
use crate::handshake;
use crate::keepalive::{self, PingTracker};
use crate::packet::Packet;
use crate::session::{ConnectionState, Shared};
use crate::transport::connect_tcp;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};
use zk_wire::{
    ErrorCode, FrameDecoder, InputArchive, Record, ReplyHeader, WatcherEvent, AUTH_XID,
    LENGTH_PREFIX_SIZE, NOTIFICATION_XID, PING_XID,
};

const RETRY_CONN_MSG: &str = ", closing socket connection and attempting reconnect";

enum Readiness {
    Read,
    Write,
    Idle,
}

/// Send and receive timestamps driving the deadlines
#[derive(Debug, Clone, Copy)]
struct Activity {
    last_heard: Instant,
    last_send: Instant,
}

impl Activity {
    fn now() -> Self {
        let now = Instant::now();
        Self {
            last_heard: now,
            last_send: now,
        }
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    addresses: AddressRotation,
    socket: Option<TcpStream>,
    peer: Option<SocketAddr>,
    decoder: FrameDecoder,
    initialized: bool,
    write_enabled: bool,
    ping: PingTracker,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>, addresses: AddressRotation) -> Self {
        let decoder = FrameDecoder::with_max_frame_len(shared.config.max_frame_len);
        Self {
            shared,
            addresses,
            socket: None,
            peer: None,
            decoder,
            initialized: false,
            write_enabled: false,
            ping: PingTracker::default(),
        }
    }

    /// Drive the connection until the session is closed or terminal
    pub(crate) async fn run(mut self) {
        let mut activity = Activity::now();

        while self.shared.is_alive() {
            if self.socket.is_none() && self.shared.is_closing() {
                break;
            }

            if let Err(e) = self.step(&mut activity).await {
                if self.shared.is_closing() {
                    debug!(
                        "Error while closing dispatch loop for session 0x{:x}: {}",
                        self.shared.session_id(),
                        e
                    );
                    break;
                }

                self.log_failure(&e);
                self.cleanup().await;
                if self.shared.is_alive() {
                    self.shared
                        .consumer
                        .queue_event(WatchedEvent::state_change(KeeperState::Disconnected));
                }
                activity = Activity::now();
            }
        }

        self.cleanup().await;
        if self.shared.is_alive() {
            self.shared
                .consumer
                .queue_event(WatchedEvent::state_change(KeeperState::Disconnected));
        }
        debug!(
            "Dispatch loop exited for session 0x{:x}. Stats: {:?}",
            self.shared.session_id(),
            self.shared.stats()
        );
    }

    async fn step(&mut self, activity: &mut Activity) -> Result<(), SessionError> {
        if self.socket.is_none() {
            self.start_connect().await?;
            *activity = Activity::now();
        }

        let now = Instant::now();
        let idle_recv = now.saturating_duration_since(activity.last_heard);
        let idle_send = now.saturating_duration_since(activity.last_send);
        let connected = self.shared.state() == ConnectionState::Connected;
        let read_timeout = self.shared.read_timeout();

        let budget = if connected {
            read_timeout
        } else {
            self.shared.connect_timeout()
        };
        let recv_left = match budget.checked_sub(idle_recv) {
            Some(left) if !left.is_zero() => left,
            _ => {
                return Err(SessionError::SessionTimeout {
                    idle: idle_recv,
                    session_id: self.shared.session_id(),
                })
            }
        };
        let mut to = recv_left;

        if connected {
            match keepalive::time_to_next_ping(read_timeout, idle_send) {
                None => {
                    self.send_ping();
                    activity.last_send = now;
                    self.write_enabled = true;
                }
                Some(next) => to = to.min(next),
            }
        }

        let now = Instant::now();
        if !self.shared.outgoing.is_empty() {
            activity.last_send = now;
        }
        if self.do_io(to, recv_left).await? {
            activity.last_heard = now;
        }
        Ok(())
    }

    async fn start_connect(&mut self) -> Result<(), SessionError> {
        let attempt = self.addresses.next_attempt();
        if let Some(cooldown) = attempt.cooldown {
            debug!("Tried all {} servers, pausing {:?}", self.addresses.len(), cooldown);
        }
        let delay = attempt.delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        self.shared.transition(ConnectionState::Connecting);
        info!("Opening socket connection to server {}", attempt.addr);
        self.shared.record_connect_attempt();

        let socket = connect_tcp(attempt.addr, self.shared.config.connect_attempt_timeout).await?;
        info!(
            "Socket connection established to {}, initiating session",
            attempt.addr
        );
        self.addresses.mark_connected();
        self.socket = Some(socket);
        self.peer = Some(attempt.addr);
        self.initialized = false;

        handshake::prime_connection(&self.shared);
        self.write_enabled = true;
        Ok(())
    }

    fn send_ping(&mut self) {
        self.ping.record_ping();
        if let Err(packet) = self
            .shared
            .outgoing
            .enqueue(keepalive::ping_request(), || true)
        {
            self.shared.fail_for_connection_loss(packet);
        }
    }

    /// One I/O step; returns whether a frame was received.
    ///
    /// `to` bounds the wait for readiness only. A frame that has started to
    /// arrive is read to completion within the remaining receive budget.
    async fn do_io(&mut self, to: Duration, recv_left: Duration) -> Result<bool, SessionError> {
        let readiness = {
            let socket = self.socket.as_ref().ok_or_else(socket_missing)?;
            tokio::select! {
                biased;

                ready = socket.readable() => {
                    ready?;
                    Readiness::Read
                }

                ready = socket.writable(), if self.write_enabled => {
                    ready?;
                    Readiness::Write
                }

                // new traffic queued
                _ = self.shared.wakeup.notified() => Readiness::Idle,

                _ = sleep(to) => Readiness::Idle,
            }
        };

        let mut received = false;
        match readiness {
            Readiness::Read => {
                let frame = self.read_frame(recv_left).await?;
                received = true;
                self.handle_frame(frame)?;
            }
            Readiness::Write => self.write_one().await?,
            Readiness::Idle => {}
        }

        self.write_enabled = !self.shared.outgoing.is_empty();
        Ok(received)
    }

    async fn read_frame(&mut self, recv_left: Duration) -> Result<Bytes, SessionError> {
        let session_id = self.shared.session_id();
        let socket = self.socket.as_mut().ok_or_else(socket_missing)?;
        let decoder = &self.decoder;

        let read = async {
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            socket.read_exact(&mut prefix).await?;
            let len = decoder.frame_len(prefix)?;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await?;
            Ok::<_, SessionError>(Bytes::from(payload))
        };

        match timeout(recv_left, read).await {
            Ok(Ok(frame)) => {
                self.shared.record_received(LENGTH_PREFIX_SIZE + frame.len());
                Ok(frame)
            }
            Ok(Err(SessionError::ConnectionLoss(e))) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(SessionError::EndOfStream { session_id })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::SessionTimeout {
                idle: recv_left,
                session_id,
            }),
        }
    }

    async fn write_one(&mut self) -> Result<(), SessionError> {
        let socket = self.socket.as_mut().ok_or_else(socket_missing)?;
        let Some(packet) = self.shared.outgoing.pop_front() else {
            return Ok(());
        };

        if let Err(e) = socket.write_all(packet.data()).await {
            // back at the head so cleanup fails it in order
            self.shared.outgoing.prime(vec![packet]);
            return Err(e.into());
        }

        self.shared.record_sent(packet.data().len());
        trace!("Wrote packet {:?}", packet);
        if packet.awaits_reply() {
            self.shared.pending.push_back(packet);
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Bytes) -> Result<(), SessionError> {
        if !self.initialized {
            self.initialized = true;
            handshake::process_connect_response(&self.shared, frame)?;
            return Ok(());
        }
        self.read_response(frame)
    }

    /// Route one reply frame received after the handshake
    pub(crate) fn read_response(&mut self, frame: Bytes) -> Result<(), SessionError> {
        let session_id = self.shared.session_id();
        let mut ar = InputArchive::new(frame);
        let mut reply = ReplyHeader::default();
        reply.deserialize(&mut ar)?;

        match reply.xid {
            PING_XID => {
                if let Some(rtt) = self.ping.process_ack() {
                    self.shared.record_rtt(rtt);
                    debug!(
                        "Got ping response for sessionid 0x{:x} after {}ms",
                        session_id,
                        rtt.as_millis()
                    );
                }
                return Ok(());
            }
            AUTH_XID => {
                debug!("Got auth sessionid 0x{:x}", session_id);
                return Ok(());
            }
            NOTIFICATION_XID => {
                let mut event = WatcherEvent::default();
                event.deserialize(&mut ar)?;
                let event =
                    WatchedEvent::from_notification(event, self.shared.config.chroot.as_deref());
                debug!("Got {} for sessionid 0x{:x}", event, session_id);
                self.shared.consumer.queue_event(event);
                return Ok(());
            }
            _ => {}
        }

        let Some(mut packet) = self.shared.pending.pop_head() else {
            return Err(SessionError::ProtocolDesync {
                expected: None,
                got: reply.xid,
            });
        };

        let outcome = self.fill_packet(&mut packet, reply, &mut ar);
        self.shared.complete_packet(packet);
        outcome
    }

    fn fill_packet(
        &self,
        packet: &mut Packet,
        reply: ReplyHeader,
        ar: &mut InputArchive,
    ) -> Result<(), SessionError> {
        if packet.xid() != Some(reply.xid) {
            packet.set_err(ErrorCode::ConnectionLoss.code());
            return Err(SessionError::ProtocolDesync {
                expected: packet.xid(),
                got: reply.xid,
            });
        }

        if let Some(header) = packet.reply_header.as_mut() {
            *header = reply;
        }
        self.shared.update_last_zxid(reply.zxid);

        if reply.err == ErrorCode::Ok.code() {
            if let Some(response) = packet.response.as_mut() {
                if let Err(e) = response.deserialize(ar) {
                    packet.set_err(ErrorCode::MarshallingError.code());
                    return Err(e.into());
                }
            }
        }

        trace!(
            "Reading reply sessionid 0x{:x}, packet {:?}",
            self.shared.session_id(),
            packet
        );
        Ok(())
    }

    /// Close the socket and fail everything queued or in flight
    async fn cleanup(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown().await {
                debug!("Ignoring error during socket close: {}", e);
            }
        }
        self.peer = None;
        self.initialized = false;
        self.write_enabled = false;

        sleep(self.shared.config.reconnect_pause).await;

        for packet in self.shared.pending.drain_all() {
            self.shared.fail_for_connection_loss(packet);
        }
        for packet in self.shared.outgoing.drain_all() {
            self.shared.fail_for_connection_loss(packet);
        }
    }

    fn log_failure(&self, err: &SessionError) {
        match err {
            err if err.is_terminal() => {
                info!("{}, closing socket connection", err);
            }
            SessionError::SessionTimeout { .. } | SessionError::EndOfStream { .. } => {
                info!("{}{}", err, RETRY_CONN_MSG);
            }
            _ => {
                let server = self
                    .peer
                    .map(|peer| peer.to_string())
                    .unwrap_or_else(|| "null".to_string());
                warn!(
                    "Session 0x{:x} for server {}, unexpected error{}: {}",
                    self.shared.session_id(),
                    server,
                    RETRY_CONN_MSG,
                    err
                );
            }
        }
    }
}

fn socket_missing() -> SessionError {
    SessionError::ConnectionLoss(io::Error::new(io::ErrorKind::NotConnected, "socket is null"))
}
