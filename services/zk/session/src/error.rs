//! Session engine error types.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use zk_wire::WireError;

/// Errors raised by the session engine
#[derive(Error, Debug)]
pub enum SessionError {
    /// Socket or I/O failure
    #[error("connection lost: {0}")]
    ConnectionLoss(#[from] std::io::Error),

    /// No traffic from the server within the receive budget
    #[error("client session timed out, have not heard from server in {idle:?} for sessionid 0x{session_id:x}")]
    SessionTimeout {
        /// Time since the last received frame
        idle: Duration,
        /// Session id
        session_id: i64,
    },

    /// Server refused to resume the session
    #[error("unable to reconnect, session 0x{session_id:x} has expired")]
    SessionExpired {
        /// Session id
        session_id: i64,
    },

    /// Authentication rejected by the server
    #[error("authentication failed")]
    AuthFailed,

    /// Peer closed the socket mid-frame
    #[error("unable to read additional data from server sessionid 0x{session_id:x}, likely server has closed socket")]
    EndOfStream {
        /// Session id
        session_id: i64,
    },

    /// Reply xid does not match the head of the pending queue
    #[error("xid out of order: got {got}, expected {expected:?}")]
    ProtocolDesync {
        /// Xid at the pending queue head, `None` if the queue was empty
        expected: Option<i32>,
        /// Xid carried by the reply
        got: i32,
    },

    /// Declared frame length outside bounds
    #[error("packet len {0} is out of range")]
    InvalidFrameLength(i64),

    /// Could not open a socket to the chosen server
    #[error("could not make socket connection to {addr}: {reason}")]
    ConnectFailure {
        /// Address that was dialed
        addr: SocketAddr,
        /// Failure description
        reason: String,
    },

    /// Record encoding or decoding failed
    #[error("wire error: {0}")]
    Wire(WireError),

    /// No configured server address resolved
    #[error("no server addresses available")]
    NoServers,

    /// Malformed connect string
    #[error("invalid connect string: {0}")]
    InvalidConnectString(String),
}

impl SessionError {
    /// Whether this error ends the session permanently
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired { .. } | SessionError::AuthFailed
        )
    }
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::FrameLength(len) => SessionError::InvalidFrameLength(len),
            other => SessionError::Wire(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length_maps_to_invalid_frame_length() {
        let err = SessionError::from(WireError::FrameLength(1 << 30));
        assert!(matches!(err, SessionError::InvalidFrameLength(len) if len == 1 << 30));
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(SessionError::SessionExpired { session_id: 1 }.is_terminal());
        assert!(SessionError::AuthFailed.is_terminal());
        assert!(!SessionError::EndOfStream { session_id: 1 }.is_terminal());
    }
}
