//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the record was complete
    #[error("incomplete record: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required by the next field
        needed: usize,
        /// Bytes left in the input
        available: usize,
    },

    /// Declared frame length outside the accepted bounds
    #[error("packet len {0} is out of range")]
    FrameLength(i64),

    /// Negative length other than the absent marker
    #[error("malformed length {0}")]
    Malformed(i32),

    /// String field is not valid UTF-8
    #[error("invalid utf-8 in string field")]
    Utf8,

    /// Unknown operation code
    #[error("unknown op code {0}")]
    OpCode(i32),
}
