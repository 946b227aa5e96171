//! Binary record archive.
//!
//! Records are written field by field in big-endian order. Buffers, strings
//! and vectors carry an `i32` length prefix where `-1` marks an absent value.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::any::Any;
use std::fmt;

/// Length prefix used for absent buffers, strings and vectors
pub const ABSENT_LEN: i32 = -1;

/// Upcast helper so consumers can recover the concrete record type
pub trait AsAny {
    /// View this value as `Any`
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A typed request or response body
pub trait Record: AsAny + Send + fmt::Debug {
    /// Append this record to the archive
    fn serialize(&self, ar: &mut OutputArchive);

    /// Fill this record in place from the archive
    fn deserialize(&mut self, ar: &mut InputArchive) -> Result<(), WireError>;
}

impl dyn Record {
    /// Downcast to a concrete record type
    pub fn downcast_ref<T: Record + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Archive writer backed by a growable buffer
#[derive(Debug, Default)]
pub struct OutputArchive {
    buf: BytesMut,
}

impl OutputArchive {
    /// Create an empty archive
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an archive with a reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a 32-bit integer
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Write a 64-bit integer
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Write a boolean as a single byte
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Write a length-prefixed buffer, `None` encodes as absent
    pub fn write_buffer(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.buf.put_i32(bytes.len() as i32);
                self.buf.put_slice(bytes);
            }
            None => self.buf.put_i32(ABSENT_LEN),
        }
    }

    /// Write a UTF-8 string, `None` encodes as absent
    pub fn write_string(&mut self, value: Option<&str>) {
        self.write_buffer(value.map(str::as_bytes));
    }

    /// Write a vector of strings
    pub fn write_string_vec(&mut self, values: Option<&[String]>) {
        match values {
            Some(values) => {
                self.buf.put_i32(values.len() as i32);
                for value in values {
                    self.write_string(Some(value));
                }
            }
            None => self.buf.put_i32(ABSENT_LEN),
        }
    }

    /// Append a record
    pub fn write_record(&mut self, record: &dyn Record) {
        record.serialize(self);
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Mutable access to the raw buffer
    pub(crate) fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Finish writing and return the bytes
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Archive reader over an immutable buffer
#[derive(Debug)]
pub struct InputArchive {
    buf: Bytes,
}

impl InputArchive {
    /// Create a reader over the given bytes
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Incomplete {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a 32-bit integer
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a 64-bit integer
    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read a single-byte boolean
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        self.need(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    fn read_len(&mut self) -> Result<Option<usize>, WireError> {
        match self.read_i32()? {
            ABSENT_LEN => Ok(None),
            len if len < 0 => Err(WireError::Malformed(len)),
            len => Ok(Some(len as usize)),
        }
    }

    /// Read a length-prefixed buffer
    pub fn read_buffer(&mut self) -> Result<Option<Bytes>, WireError> {
        match self.read_len()? {
            Some(len) => {
                self.need(len)?;
                Ok(Some(self.buf.split_to(len)))
            }
            None => Ok(None),
        }
    }

    /// Read a UTF-8 string
    pub fn read_string(&mut self) -> Result<Option<String>, WireError> {
        match self.read_buffer()? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| WireError::Utf8),
            None => Ok(None),
        }
    }

    /// Read a vector of strings
    pub fn read_string_vec(&mut self) -> Result<Option<Vec<String>>, WireError> {
        let Some(count) = self.read_len()? else {
            return Ok(None);
        };

        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            values.push(self.read_string()?.unwrap_or_default());
        }
        Ok(Some(values))
    }

    /// Fill a record in place
    pub fn read_record(&mut self, record: &mut dyn Record) -> Result<(), WireError> {
        record.deserialize(self)
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_values_use_minus_one() {
        let mut ar = OutputArchive::new();
        ar.write_string(None);
        ar.write_buffer(None);
        ar.write_string_vec(None);

        let bytes = ar.into_bytes();
        assert_eq!(bytes.as_ref(), &[0xFF; 12]);

        let mut input = InputArchive::new(bytes);
        assert_eq!(input.read_string().unwrap(), None);
        assert_eq!(input.read_buffer().unwrap(), None);
        assert_eq!(input.read_string_vec().unwrap(), None);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_string_layout_is_big_endian_length_prefixed() {
        let mut ar = OutputArchive::new();
        ar.write_string(Some("/a"));
        assert_eq!(ar.into_bytes().as_ref(), &[0, 0, 0, 2, b'/', b'a']);
    }

    #[test]
    fn test_truncated_input_is_incomplete() {
        let mut input = InputArchive::new(Bytes::from_static(&[0, 0, 0, 5, b'x']));
        assert_eq!(
            input.read_buffer(),
            Err(WireError::Incomplete {
                needed: 5,
                available: 1
            })
        );
    }

    #[test]
    fn test_negative_length_is_malformed() {
        let mut input = InputArchive::new(Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFE]));
        assert_eq!(input.read_buffer(), Err(WireError::Malformed(-2)));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut input = InputArchive::new(Bytes::from_static(&[0, 0, 0, 1, 0xFF]));
        assert_eq!(input.read_string(), Err(WireError::Utf8));
    }
}
