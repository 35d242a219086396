//! Protocol module - wire format, framing, and message bodies.
//!
//! This module implements the binary protocol spoken between agencies and
//! the lottery server:
//! - 5-byte header encoding/decoding (big-endian length + type tag)
//! - Frame buffer for accumulating partial reads
//! - Typed messages with checked body decoding

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{batch_encoded_len, Message};
pub use wire_format::{
    decode_length_prefix, validate_length, ErrorCode, Header, MsgType, SuccessCode,
    BATCH_OVERHEAD, COUNT_SIZE, DATE_SIZE, DEFAULT_MAX_FRAME_LENGTH, HEADER_SIZE,
    LENGTH_PREFIX_SIZE,
};
