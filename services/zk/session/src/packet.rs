//! Request/response pairs in flight.

use bytes::Bytes;
use std::fmt;
use zk_wire::{encode_request, OpCode, Record, ReplyHeader, RequestHeader};

/// Watch that becomes active only if its request succeeds
pub trait WatchRegistration: Send + fmt::Debug {
    /// Called once with the final result code of the owning request
    fn register(&self, rc: i32);
}

/// A request submitted by the application
#[derive(Debug)]
pub struct Request {
    /// Operation code
    pub op: OpCode,
    /// Request body, if the operation has one
    pub record: Option<Box<dyn Record>>,
    /// Response body to fill in, if the operation returns one
    pub response: Option<Box<dyn Record>>,
    /// Path as seen by the application
    pub client_path: Option<String>,
    /// Path as sent to the server (chroot applied)
    pub server_path: Option<String>,
    /// Watch to register on completion
    pub watch_registration: Option<Box<dyn WatchRegistration>>,
}

impl Request {
    /// Create a request without a body
    pub fn new(op: OpCode) -> Self {
        Self {
            op,
            record: None,
            response: None,
            client_path: None,
            server_path: None,
            watch_registration: None,
        }
    }

    /// Attach a request body
    pub fn with_record(mut self, record: impl Record + 'static) -> Self {
        self.record = Some(Box::new(record));
        self
    }

    /// Attach a response body to decode into
    pub fn with_response(mut self, response: impl Record + 'static) -> Self {
        self.response = Some(Box::new(response));
        self
    }

    /// Attach client and server paths
    pub fn with_paths(mut self, client_path: impl Into<String>, server_path: impl Into<String>) -> Self {
        self.client_path = Some(client_path.into());
        self.server_path = Some(server_path.into());
        self
    }

    /// Attach a watch registration
    pub fn with_watch(mut self, registration: impl WatchRegistration + 'static) -> Self {
        self.watch_registration = Some(Box::new(registration));
        self
    }
}

/// A request/response pair owned by exactly one queue at a time
pub struct Packet {
    /// Request header, `None` for the connect request
    pub header: Option<RequestHeader>,
    /// Reply header, `None` for internal packets that are never reported
    pub reply_header: Option<ReplyHeader>,
    /// Request body
    pub request: Option<Box<dyn Record>>,
    /// Response body, filled in when the reply carries no error
    pub response: Option<Box<dyn Record>>,
    /// Encoded frame bytes
    pub(crate) data: Bytes,
    /// Watch to register on completion
    pub watch_registration: Option<Box<dyn WatchRegistration>>,
    /// Path as seen by the application
    pub client_path: Option<String>,
    /// Path as sent to the server
    pub server_path: Option<String>,
    finished: bool,
}

impl Packet {
    /// Build and encode a packet with an assigned xid.
    ///
    /// Pings and auth packets get no reply header, so they are never reported
    /// back to the consumer.
    pub(crate) fn from_request(xid: i32, request: Request) -> Self {
        let header = RequestHeader::new(xid, request.op);
        let data = encode_request(&header, request.record.as_deref());
        let reply_header = match request.op {
            OpCode::Ping | OpCode::Auth => None,
            _ => Some(ReplyHeader::default()),
        };
        Self {
            header: Some(header),
            reply_header,
            request: request.record,
            response: request.response,
            data,
            watch_registration: request.watch_registration,
            client_path: request.client_path,
            server_path: request.server_path,
            finished: false,
        }
    }

    /// Internal packet without a reply header
    pub(crate) fn internal(header: RequestHeader, request: Option<Box<dyn Record>>) -> Self {
        let data = encode_request(&header, request.as_deref());
        Self {
            header: Some(header),
            reply_header: None,
            request,
            response: None,
            data,
            watch_registration: None,
            client_path: None,
            server_path: None,
            finished: false,
        }
    }

    /// Pre-encoded frame with no typed request (connect handshake)
    pub(crate) fn raw(data: Bytes) -> Self {
        Self {
            header: None,
            reply_header: None,
            request: None,
            response: None,
            data,
            watch_registration: None,
            client_path: None,
            server_path: None,
            finished: false,
        }
    }

    /// Correlation id, if the packet has a header
    pub fn xid(&self) -> Option<i32> {
        self.header.map(|h| h.xid)
    }

    /// Operation code, if the packet has a header
    pub fn op(&self) -> Option<OpCode> {
        self.header.map(|h| h.op)
    }

    /// Result code recorded in the reply header
    pub fn err(&self) -> Option<i32> {
        self.reply_header.map(|r| r.err)
    }

    /// Whether the packet has been completed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Encoded frame bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the packet waits in the pending queue after it is written
    pub(crate) fn awaits_reply(&self) -> bool {
        matches!(self.op(), Some(op) if op != OpCode::Ping && op != OpCode::Auth)
    }

    /// Typed view of the decoded response
    pub fn response_as<T: Record + 'static>(&self) -> Option<&T> {
        self.response.as_deref().and_then(|r| r.downcast_ref::<T>())
    }

    pub(crate) fn set_err(&mut self, err: i32) {
        if let Some(reply) = self.reply_header.as_mut() {
            reply.err = err;
        }
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("header", &self.header)
            .field("reply_header", &self.reply_header)
            .field("client_path", &self.client_path)
            .field("server_path", &self.server_path)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zk_wire::{GetDataRequest, GetDataResponse, PING_XID};

    #[test]
    fn test_application_packet_awaits_reply() {
        let request = Request::new(OpCode::GetData)
            .with_record(GetDataRequest {
                path: "/a".into(),
                watch: false,
            })
            .with_response(GetDataResponse::default())
            .with_paths("/a", "/app/a");
        let packet = Packet::from_request(7, request);

        assert_eq!(packet.xid(), Some(7));
        assert!(packet.awaits_reply());
        assert_eq!(packet.err(), Some(0));
        assert!(packet.response_as::<GetDataResponse>().is_some());
        assert!(!packet.is_finished());
    }

    #[test]
    fn test_ping_and_handshake_do_not_await_reply() {
        let ping = Packet::internal(RequestHeader::new(PING_XID, OpCode::Ping), None);
        assert!(!ping.awaits_reply());
        assert_eq!(ping.err(), None);

        let queued_ping = Packet::from_request(PING_XID, Request::new(OpCode::Ping));
        assert_eq!(queued_ping.err(), None);

        let handshake = Packet::raw(Bytes::from_static(&[0, 0, 0, 0]));
        assert!(!handshake.awaits_reply());
        assert_eq!(handshake.xid(), None);
    }
}
