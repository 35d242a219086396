//! Transport module - frame I/O over TCP streams.
//!
//! Provides:
//! - Exact-count reads and full writes that loop over short I/O
//! - One-shot frame and message reads/writes
//! - A cancellation-safe buffered `FrameReader`

mod stream;

pub use stream::{
    read_exact_or_closed, read_frame, read_message, send_all, write_message, FrameReader,
};
