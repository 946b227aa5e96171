//! Message framing for the wire protocol.
//!
//! Every frame is a 4-byte big-endian length followed by that many payload
//! bytes. Request payloads are a [`RequestHeader`] plus an optional record;
//! the connect request is sent bare.

use crate::archive::{OutputArchive, Record};
use crate::error::WireError;
use crate::header::RequestHeader;
use crate::proto::ConnectRequest;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Length prefix size in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame length (4 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Encode records into one length-prefixed frame
pub fn encode_frame(parts: &[&dyn Record]) -> Bytes {
    let mut ar = OutputArchive::with_capacity(64);
    ar.write_i32(0); // patched below

    for part in parts {
        ar.write_record(*part);
    }

    let payload_len = (ar.len() - LENGTH_PREFIX_SIZE) as u32;
    ar.buf_mut()[..LENGTH_PREFIX_SIZE].copy_from_slice(&payload_len.to_be_bytes());
    ar.into_bytes()
}

/// Encode a request header and optional body into a frame
pub fn encode_request(header: &RequestHeader, request: Option<&dyn Record>) -> Bytes {
    let mut ar = OutputArchive::with_capacity(64);
    ar.write_i32(0);
    header.encode(&mut ar);
    if let Some(request) = request {
        ar.write_record(request);
    }

    let payload_len = (ar.len() - LENGTH_PREFIX_SIZE) as u32;
    ar.buf_mut()[..LENGTH_PREFIX_SIZE].copy_from_slice(&payload_len.to_be_bytes());
    ar.into_bytes()
}

/// Encode the session handshake frame
pub fn encode_connect(request: &ConnectRequest) -> Bytes {
    encode_frame(&[request as &dyn Record])
}

/// Frame decoder validating declared lengths
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default length limit
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder with a custom length limit
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Maximum accepted payload length (exclusive)
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Validate a length prefix and return the payload length
    pub fn frame_len(&self, prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, WireError> {
        let len = i32::from_be_bytes(prefix);
        if len < 0 || len as usize >= self.max_frame_len {
            return Err(WireError::FrameLength(len as i64));
        }
        Ok(len as usize)
    }

    /// Decode one frame payload from a buffer
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        // Need at least 4 bytes for frame length
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let frame_len = self.frame_len([buf[0], buf[1], buf[2], buf[3]])?;

        if buf.len() < LENGTH_PREFIX_SIZE + frame_len {
            trace!(
                "Partial frame: have {} of {} bytes",
                buf.len() - LENGTH_PREFIX_SIZE,
                frame_len
            );
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(buf.split_to(frame_len).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{OpCode, PING_XID};
    use crate::proto::GetDataRequest;
    use bytes::BufMut;

    fn frame_payload(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn test_length_prefix_matches_payload() {
        let header = RequestHeader::new(1, OpCode::GetData);
        let body = GetDataRequest {
            path: "/node".to_string(),
            watch: true,
        };
        let frame = encode_request(&header, Some(&body));

        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - LENGTH_PREFIX_SIZE);
        // header(8) + path(4 + 5) + watch(1)
        assert_eq!(declared, 18);
    }

    #[test]
    fn test_ping_frame_is_header_only() {
        let frame = encode_request(&RequestHeader::new(PING_XID, OpCode::Ping), None);
        assert_eq!(frame.as_ref(), &[0, 0, 0, 8, 0xFF, 0xFF, 0xFF, 0xFE, 0, 0, 0, 11]);
    }

    #[test]
    fn test_frame_len_bounds() {
        let decoder = FrameDecoder::with_max_frame_len(16);
        assert_eq!(decoder.frame_len(15i32.to_be_bytes()).unwrap(), 15);
        assert_eq!(
            decoder.frame_len(16i32.to_be_bytes()),
            Err(WireError::FrameLength(16))
        );
        assert_eq!(
            decoder.frame_len((-1i32).to_be_bytes()),
            Err(WireError::FrameLength(-1))
        );
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let decoder = FrameDecoder::new();
        let frame = frame_payload(b"abcdef");

        let mut buf = BytesMut::from(&frame[..7]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[7..]);
        buf.extend_from_slice(&frame_payload(b"z"));
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"abcdef"))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"z"))
        );
        assert!(buf.is_empty());
    }
}
