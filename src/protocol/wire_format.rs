//! Wire format encoding and decoding.
//!
//! Every frame starts with a 5-byte header:
//! ```text
//! ┌──────────────┬────────┬───────────────────────┐
//! │ Length       │ Type   │ Body                  │
//! │ 4 bytes      │ 1 byte │ Length - 1 bytes      │
//! │ uint32 BE    │        │ type-dependent layout │
//! └──────────────┴────────┴───────────────────────┘
//! ```
//!
//! The length counts the type byte plus the body, never itself.
//! All multi-byte integers are Big Endian.

use std::fmt;

use crate::error::{LotteryError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Header size in bytes (length prefix + type byte).
pub const HEADER_SIZE: usize = 5;

/// Size of a `uint32` element count inside a body.
pub const COUNT_SIZE: usize = 4;

/// Size of an encoded `YYYY-MM-DD` date.
pub const DATE_SIZE: usize = 10;

/// Fixed cost of a batch frame before any bet is added (header + count).
pub const BATCH_OVERHEAD: usize = HEADER_SIZE + COUNT_SIZE;

/// Default maximum accepted length field (1 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 1 << 20;

/// Message type tag.
///
/// The known set is closed; any other byte is preserved as `Unknown` so a
/// receiver can answer it instead of tearing the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// 0x00, acknowledgement.
    Success,
    /// 0x01, rejection.
    Error,
    /// 0x10, single bet.
    Bet,
    /// 0x11, batch of bets.
    Batch,
    /// 0x12, echo probe.
    Echo,
    /// 0x13, agency finished sending.
    Notify,
    /// 0x14, winners query for one agency.
    WinnersQuery,
    /// 0x15, winners list response.
    WinnersList,
    /// Any unassigned tag.
    Unknown(u8),
}

impl MsgType {
    /// Decode a type byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => MsgType::Success,
            0x01 => MsgType::Error,
            0x10 => MsgType::Bet,
            0x11 => MsgType::Batch,
            0x12 => MsgType::Echo,
            0x13 => MsgType::Notify,
            0x14 => MsgType::WinnersQuery,
            0x15 => MsgType::WinnersList,
            other => MsgType::Unknown(other),
        }
    }

    /// Encode as the wire byte.
    pub fn as_byte(self) -> u8 {
        match self {
            MsgType::Success => 0x00,
            MsgType::Error => 0x01,
            MsgType::Bet => 0x10,
            MsgType::Batch => 0x11,
            MsgType::Echo => 0x12,
            MsgType::Notify => 0x13,
            MsgType::WinnersQuery => 0x14,
            MsgType::WinnersList => 0x15,
            MsgType::Unknown(b) => b,
        }
    }

    /// Check if this tag is part of the known set.
    #[inline]
    pub fn is_known(self) -> bool {
        !matches!(self, MsgType::Unknown(_))
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgType::Success => f.write_str("MSG_SUCCESS"),
            MsgType::Error => f.write_str("MSG_ERROR"),
            MsgType::Bet => f.write_str("MSG_BET"),
            MsgType::Batch => f.write_str("MSG_BATCH"),
            MsgType::Echo => f.write_str("MSG_ECHO"),
            MsgType::Notify => f.write_str("MSG_NOTIFY"),
            MsgType::WinnersQuery => f.write_str("MSG_WINNERS_QUERY"),
            MsgType::WinnersList => f.write_str("MSG_WINNERS_LIST"),
            MsgType::Unknown(b) => write!(f, "UNKNOWN(0x{:02x})", b),
        }
    }
}

/// Status byte carried by a SUCCESS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SuccessCode {
    /// Batch stored.
    BatchProcessed = 0x01,
    /// Single bet stored.
    BetProcessed = 0x02,
}

impl SuccessCode {
    /// Decode a status byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SuccessCode::BatchProcessed),
            0x02 => Some(SuccessCode::BetProcessed),
            _ => None,
        }
    }

    /// Encode as the wire byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SuccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessCode::BatchProcessed => f.write_str("BATCH_PROCESSED"),
            SuccessCode::BetProcessed => f.write_str("BET_PROCESSED"),
        }
    }
}

/// Error byte carried by an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Batch could not be stored.
    BatchFailed = 0x01,
    /// Bet could not be stored.
    BetFailed = 0x02,
    /// Body did not match its declared structure.
    Malformed = 0x03,
    /// Body was well-formed but not acceptable.
    Invalid = 0x04,
    /// Winners were queried before the draw.
    LotteryNotDone = 0x05,
}

impl ErrorCode {
    /// Decode an error byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ErrorCode::BatchFailed),
            0x02 => Some(ErrorCode::BetFailed),
            0x03 => Some(ErrorCode::Malformed),
            0x04 => Some(ErrorCode::Invalid),
            0x05 => Some(ErrorCode::LotteryNotDone),
            _ => None,
        }
    }

    /// Encode as the wire byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BatchFailed => f.write_str("BATCH_FAILED"),
            ErrorCode::BetFailed => f.write_str("BET_FAILED"),
            ErrorCode::Malformed => f.write_str("MALFORMED"),
            ErrorCode::Invalid => f.write_str("INVALID"),
            ErrorCode::LotteryNotDone => f.write_str("LOTTERY_NOT_DONE"),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Length field: type byte plus body.
    pub length: u32,
    /// Message type tag.
    pub msg_type: MsgType,
}

impl Header {
    /// Create a header for a body of `body_len` bytes.
    ///
    /// Fails when the length field cannot hold the type byte plus body.
    pub fn for_body(msg_type: MsgType, body_len: usize) -> Result<Self> {
        let length = body_len
            .checked_add(1)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or_else(|| {
                LotteryError::Format(format!("body of {} bytes exceeds u32 length", body_len))
            })?;
        Ok(Self { length, msg_type })
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use lottery_wire::protocol::{Header, MsgType};
    ///
    /// let header = Header::for_body(MsgType::Notify, 4).unwrap();
    /// assert_eq!(header.encode(), [0, 0, 0, 5, 0x13]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.msg_type.as_byte();
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: decode_length_prefix(buf)?,
            msg_type: MsgType::from_byte(buf[4]),
        })
    }

    /// Number of body bytes that follow the header.
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// Full size of the frame on the wire.
    #[inline]
    pub fn frame_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.length as usize
    }
}

/// Decode the 4-byte length prefix.
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Validate a length field against protocol limits.
///
/// A zero length has no room for the type byte; an oversize one cannot be
/// consumed safely. Both leave the byte stream unusable.
pub fn validate_length(length: u32, max_frame_length: u32) -> Result<()> {
    if length == 0 {
        return Err(LotteryError::Protocol(
            "Frame length 0 has no type byte".to_string(),
        ));
    }
    if length > max_frame_length {
        return Err(LotteryError::Protocol(format!(
            "Frame length {} exceeds maximum {}",
            length, max_frame_length
        )));
    }
    Ok(())
}
