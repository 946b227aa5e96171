//! Request and reply headers, operation codes and error codes.
//!
//! Every request frame starts with a [`RequestHeader`] and every non-handshake
//! response frame starts with a [`ReplyHeader`]. The `xid` field correlates
//! the two; a handful of negative xids are reserved for internal traffic.

use crate::archive::{InputArchive, OutputArchive, Record};
use crate::error::WireError;

/// Protocol version sent in the connect request
pub const PROTOCOL_VERSION: i32 = 0;

/// Reply xid carrying a watcher notification
pub const NOTIFICATION_XID: i32 = -1;
/// Xid of keepalive pings and their acks
pub const PING_XID: i32 = -2;
/// Xid of auth packets and their acks
pub const AUTH_XID: i32 = -4;
/// Xid of the watch reset packet sent after reconnect
pub const SET_WATCHES_XID: i32 = -8;

/// Operation codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Watcher notification
    Notification = 0,
    /// Create a node
    Create = 1,
    /// Delete a node
    Delete = 2,
    /// Check whether a node exists
    Exists = 3,
    /// Read node data
    GetData = 4,
    /// Write node data
    SetData = 5,
    /// Read node ACL
    GetAcl = 6,
    /// Write node ACL
    SetAcl = 7,
    /// List children
    GetChildren = 8,
    /// Sync with the leader
    Sync = 9,
    /// Keepalive
    Ping = 11,
    /// List children with stat
    GetChildren2 = 12,
    /// Version check
    Check = 13,
    /// Multi-op transaction
    Multi = 14,
    /// Add auth credentials
    Auth = 100,
    /// Re-register watches
    SetWatches = 101,
    /// Create a session
    CreateSession = -10,
    /// Close the session
    CloseSession = -11,
    /// Error response
    Error = -1,
}

impl TryFrom<i32> for OpCode {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, WireError> {
        match value {
            0 => Ok(OpCode::Notification),
            1 => Ok(OpCode::Create),
            2 => Ok(OpCode::Delete),
            3 => Ok(OpCode::Exists),
            4 => Ok(OpCode::GetData),
            5 => Ok(OpCode::SetData),
            6 => Ok(OpCode::GetAcl),
            7 => Ok(OpCode::SetAcl),
            8 => Ok(OpCode::GetChildren),
            9 => Ok(OpCode::Sync),
            11 => Ok(OpCode::Ping),
            12 => Ok(OpCode::GetChildren2),
            13 => Ok(OpCode::Check),
            14 => Ok(OpCode::Multi),
            100 => Ok(OpCode::Auth),
            101 => Ok(OpCode::SetWatches),
            -10 => Ok(OpCode::CreateSession),
            -11 => Ok(OpCode::CloseSession),
            -1 => Ok(OpCode::Error),
            _ => Err(WireError::OpCode(value)),
        }
    }
}

/// Result codes carried in reply headers
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Server-side system error
    SystemError = -1,
    /// Runtime inconsistency detected
    RuntimeInconsistency = -2,
    /// Data inconsistency detected
    DataInconsistency = -3,
    /// Connection to the server was lost
    ConnectionLoss = -4,
    /// Record could not be (de)serialized
    MarshallingError = -5,
    /// Operation not implemented
    Unimplemented = -6,
    /// Operation timed out
    OperationTimeout = -7,
    /// Invalid arguments
    BadArguments = -8,
    /// Node does not exist
    NoNode = -101,
    /// Not authenticated
    NoAuth = -102,
    /// Version conflict
    BadVersion = -103,
    /// Ephemeral nodes may not have children
    NoChildrenForEphemerals = -108,
    /// Node already exists
    NodeExists = -110,
    /// Node has children
    NotEmpty = -111,
    /// Session expired
    SessionExpired = -112,
    /// Invalid callback
    InvalidCallback = -113,
    /// Invalid ACL
    InvalidAcl = -114,
    /// Authentication failed
    AuthFailed = -115,
}

impl ErrorCode {
    /// Map a raw code, unknown values become `SystemError`
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            -2 => ErrorCode::RuntimeInconsistency,
            -3 => ErrorCode::DataInconsistency,
            -4 => ErrorCode::ConnectionLoss,
            -5 => ErrorCode::MarshallingError,
            -6 => ErrorCode::Unimplemented,
            -7 => ErrorCode::OperationTimeout,
            -8 => ErrorCode::BadArguments,
            -101 => ErrorCode::NoNode,
            -102 => ErrorCode::NoAuth,
            -103 => ErrorCode::BadVersion,
            -108 => ErrorCode::NoChildrenForEphemerals,
            -110 => ErrorCode::NodeExists,
            -111 => ErrorCode::NotEmpty,
            -112 => ErrorCode::SessionExpired,
            -113 => ErrorCode::InvalidCallback,
            -114 => ErrorCode::InvalidAcl,
            -115 => ErrorCode::AuthFailed,
            _ => ErrorCode::SystemError,
        }
    }

    /// Raw wire value
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

/// Header prefixed to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Correlation id
    pub xid: i32,
    /// Operation code
    pub op: OpCode,
}

impl RequestHeader {
    /// Create a request header
    pub fn new(xid: i32, op: OpCode) -> Self {
        Self { xid, op }
    }

    /// Encode into an archive
    pub fn encode(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.xid);
        ar.write_i32(self.op as i32);
    }

    /// Decode from an archive
    pub fn decode(ar: &mut InputArchive) -> Result<Self, WireError> {
        let xid = ar.read_i32()?;
        let op = OpCode::try_from(ar.read_i32()?)?;
        Ok(Self { xid, op })
    }
}

/// Header prefixed to every reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Correlation id echoed from the request
    pub xid: i32,
    /// Transaction id at the time of the reply
    pub zxid: i64,
    /// Result code
    pub err: i32,
}

impl ReplyHeader {
    /// Create a reply header
    pub fn new(xid: i32, zxid: i64, err: i32) -> Self {
        Self { xid, zxid, err }
    }

    /// Result code as an enum
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.err)
    }
}

impl Record for ReplyHeader {
    fn serialize(&self, ar: &mut OutputArchive) {
        ar.write_i32(self.xid);
        ar.write_i64(self.zxid);
        ar.write_i32(self.err);
    }

    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError> {
        self.xid = ar.read_i32()?;
        self.zxid = ar.read_i64()?;
        self.err = ar.read_i32()?;
        Ok(())
    }
}
