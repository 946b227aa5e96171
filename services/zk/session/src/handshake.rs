//! Session negotiation performed on every (re)connect.
//!
//! Right after a socket connects the outgoing queue is primed with, in
//! order: the connect request, one auth packet per credential and, when
//! watches exist, a set-watches packet. The first frame read back is the
//! connect response.

use crate::config::AuthData;
use crate::consumer::{KeeperState, WatchSnapshot, WatchedEvent};
use crate::error::SessionError;
use crate::packet::Packet;
use crate::session::{ConnectionState, Shared};
use bytes::Bytes;
use tracing::{debug, info, warn};
use zk_wire::{
    encode_connect, AuthPacket, ConnectRequest, ConnectResponse, InputArchive, OpCode, Record,
    ReplyHeader, RequestHeader, SetWatches, AUTH_XID, PROTOCOL_VERSION, SET_WATCHES_XID,
};

/// Connect request resuming `session_id` (0 for a new session)
pub fn connect_request(
    timeout_ms: i32,
    session_id: i64,
    passwd: Vec<u8>,
    last_zxid: i64,
) -> ConnectRequest {
    ConnectRequest {
        protocol_version: PROTOCOL_VERSION,
        last_zxid_seen: last_zxid,
        timeout: timeout_ms,
        session_id,
        passwd,
    }
}

/// Build the ordered batch installed at the head of the outgoing queue
pub(crate) fn priming_batch(
    request: &ConnectRequest,
    auth: &[AuthData],
    watches: Option<WatchSnapshot>,
) -> Vec<Packet> {
    let mut batch = Vec::with_capacity(auth.len() + 2);
    batch.push(Packet::raw(encode_connect(request)));

    for credential in auth {
        let record: Box<dyn Record> = Box::new(AuthPacket {
            auth_type: 0,
            scheme: credential.scheme.clone(),
            auth: credential.data.clone(),
        });
        batch.push(Packet::internal(
            RequestHeader::new(AUTH_XID, OpCode::Auth),
            Some(record),
        ));
    }

    if let Some(watches) = watches.filter(|w| !w.is_empty()) {
        let record: Box<dyn Record> = Box::new(SetWatches {
            relative_zxid: request.last_zxid_seen,
            data_watches: watches.data,
            exist_watches: watches.exist,
            child_watches: watches.child,
        });
        let mut packet = Packet::internal(
            RequestHeader::new(SET_WATCHES_XID, OpCode::SetWatches),
            Some(record),
        );
        // matched against the pending queue like any other reply
        packet.reply_header = Some(ReplyHeader::default());
        batch.push(packet);
    }

    batch
}

/// Queue the handshake traffic ahead of everything already waiting
pub(crate) fn prime_connection(shared: &Shared) {
    let request = connect_request(
        shared.config.session_timeout_ms(),
        shared.session_id(),
        shared.session_passwd(),
        shared.last_zxid(),
    );
    let watches = if shared.config.disable_auto_watch_reset {
        None
    } else {
        shared.watches.as_ref().map(|source| source.snapshot())
    };

    let batch = priming_batch(&request, &shared.auth_info(), watches);
    debug!(
        "Priming connection with {} packets for sessionid 0x{:x}",
        batch.len(),
        request.session_id
    );
    shared.outgoing.prime(batch);
}

/// Apply the connect response read as the first frame of a connection
pub(crate) fn process_connect_response(
    shared: &Shared,
    payload: Bytes,
) -> Result<ConnectResponse, SessionError> {
    let mut ar = InputArchive::new(payload);
    let mut response = ConnectResponse::default();
    response.deserialize(&mut ar)?;

    if response.timeout <= 0 {
        let session_id = shared.session_id();
        warn!("Session 0x{:x} has expired", session_id);
        shared.force_state(ConnectionState::Expired);
        shared
            .consumer
            .queue_event(WatchedEvent::state_change(KeeperState::Expired));
        return Err(SessionError::SessionExpired { session_id });
    }

    shared.apply_negotiated(
        response.timeout,
        response.session_id,
        response.passwd.clone(),
    );
    shared.transition(ConnectionState::Connected);
    info!(
        "Session establishment complete, sessionid = 0x{:x}, negotiated timeout = {}ms",
        response.session_id, response.timeout
    );
    shared
        .consumer
        .queue_event(WatchedEvent::state_change(KeeperState::SyncConnected));
    Ok(response)
}
