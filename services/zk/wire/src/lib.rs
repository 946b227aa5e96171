//! Wire protocol framing, binary records and protocol constants for zk.
//!
//! This crate provides the low-level wire protocol used between the client
//! session engine and a coordination service cluster member: length-prefixed
//! framing, a big-endian record archive, request/reply headers and the typed
//! records exchanged during session establishment and normal operation.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | i32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | RequestHeader (8B)   | xid + op code              |
//! |   or ReplyHeader(16B)| xid + zxid + err           |
//! +----------------------+----------------------------+
//! | record body          | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! The connect request and connect response frames carry no header; they are
//! the first frame written and the first frame read on every connection.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod error;
pub mod frame;
pub mod header;
pub mod proto;

// Re-export main types
pub use archive::{AsAny, InputArchive, OutputArchive, Record, ABSENT_LEN};
pub use error::WireError;
pub use frame::{
    encode_connect, encode_frame, encode_request, FrameDecoder,
    DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_SIZE,
};
pub use header::{
    ErrorCode, OpCode, ReplyHeader, RequestHeader, AUTH_XID, NOTIFICATION_XID, PING_XID,
    PROTOCOL_VERSION, SET_WATCHES_XID,
};
pub use proto::{
    AuthPacket, ConnectRequest, ConnectResponse, ExistsRequest, ExistsResponse, GetDataRequest,
    GetDataResponse, SetWatches, Stat, WatcherEvent,
};
