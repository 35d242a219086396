//! Frame I/O over byte streams.
//!
//! Neither reads nor writes are assumed to move a whole frame: every helper
//! here loops until the requested byte count is satisfied.
//!
//! # Example
//!
//! ```ignore
//! use lottery_wire::transport::{read_message, write_message};
//!
//! write_message(&mut writer, &Message::WinnersQuery { agency: 1 }).await?;
//! let reply = read_message(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await?;
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{LotteryError, Result};
use crate::protocol::{
    validate_length, Frame, FrameBuffer, Header, Message, MsgType, LENGTH_PREFIX_SIZE,
};

/// Read buffer size for `FrameReader`.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Read exactly `n` bytes.
///
/// A zero-byte read before `n` bytes have arrived yields `ConnectionClosed`.
pub async fn read_exact_or_closed<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n];
    let mut filled = 0;

    while filled < n {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            return Err(LotteryError::ConnectionClosed);
        }
        filled += read;
    }

    Ok(buf)
}

/// Write every byte of `data`, then flush.
pub async fn send_all<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    while written < data.len() {
        let n = writer.write(&data[written..]).await?;
        if n == 0 {
            return Err(LotteryError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Read one frame: length, then type, then body.
pub async fn read_frame<R>(reader: &mut R, max_frame_length: u32) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let prefix = read_exact_or_closed(reader, LENGTH_PREFIX_SIZE).await?;
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    validate_length(length, max_frame_length)?;

    let tag = read_exact_or_closed(reader, 1).await?;
    let body = read_exact_or_closed(reader, length as usize - 1).await?;

    Ok(Frame::from_header(
        Header {
            length,
            msg_type: MsgType::from_byte(tag[0]),
        },
        Bytes::from(body),
    ))
}

/// Read and decode one message.
///
/// A decode error leaves the stream positioned at the next frame.
pub async fn read_message<R>(reader: &mut R, max_frame_length: u32) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader, max_frame_length).await?;
    Message::decode(&frame)
}

/// Encode and send one message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    send_all(writer, &bytes).await
}

/// Buffered frame reader.
///
/// `next_frame` is cancellation safe: bytes already read stay in the
/// internal buffer if the future is dropped, so it can be raced against a
/// timeout without losing frame alignment.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    ready: VecDeque<Frame>,
    chunk: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_frame_length: u32) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_frame_length(max_frame_length),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// Next complete frame.
    ///
    /// End of stream yields `ConnectionClosed`, whether or not a partial
    /// frame was pending.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(pending = self.buffer.len(), "Stream ended mid-frame");
                }
                return Err(LotteryError::ConnectionClosed);
            }

            self.ready.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }

    /// Next frame, decoded.
    pub async fn next_message(&mut self) -> Result<Message> {
        let frame = self.next_frame().await?;
        Message::decode(&frame)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, ErrorCode, SuccessCode, DEFAULT_MAX_FRAME_LENGTH};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let end = (self.pos + self.step)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            let pos = self.pos;
            buf.put_slice(&self.data[pos..end]);
            self.pos = end;
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that accepts at most `step` bytes per call.
    struct Stingy {
        out: Vec<u8>,
        step: usize,
    }

    impl AsyncWrite for Stingy {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(self.step);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_message_from_trickle() {
        let mut data = Message::Success(SuccessCode::BetProcessed).encode().unwrap();
        data.extend(Message::WinnersList(vec![4, 5]).encode().unwrap());
        let mut reader = Trickle { data, pos: 0, step: 1 };

        assert_eq!(
            read_message(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await.unwrap(),
            Message::Success(SuccessCode::BetProcessed)
        );
        assert_eq!(
            read_message(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await.unwrap(),
            Message::WinnersList(vec![4, 5])
        );
        assert!(matches!(
            read_message(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await,
            Err(LotteryError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_closed() {
        let mut data = build_frame(MsgType::Echo, b"truncated").unwrap();
        data.truncate(8);
        let mut reader = Trickle { data, pos: 0, step: 3 };

        assert!(matches!(
            read_frame(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await,
            Err(LotteryError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_zero_length() {
        let mut reader = Trickle {
            data: vec![0, 0, 0, 0, 0x10],
            pos: 0,
            step: 64,
        };
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_LENGTH)
            .await
            .unwrap_err();
        assert!(matches!(err, LotteryError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_send_all_survives_short_writes() {
        let mut writer = Stingy {
            out: Vec::new(),
            step: 3,
        };
        let message = Message::Error(ErrorCode::Malformed);

        write_message(&mut writer, &message).await.unwrap();

        assert_eq!(writer.out, message.encode().unwrap());
    }

    #[tokio::test]
    async fn test_send_all_zero_write_is_error() {
        let mut writer = Stingy {
            out: Vec::new(),
            step: 0,
        };
        let err = send_all(&mut writer, b"abc").await.unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[tokio::test]
    async fn test_frame_reader_survives_cancellation() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(server, DEFAULT_MAX_FRAME_LENGTH);
        let bytes = Message::Notify { agency: 42 }.encode().unwrap();

        send_all(&mut client, &bytes[..3]).await.unwrap();
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            frames.next_frame(),
        )
        .await;
        assert!(timed_out.is_err());

        send_all(&mut client, &bytes[3..]).await.unwrap();
        assert_eq!(
            frames.next_message().await.unwrap(),
            Message::Notify { agency: 42 }
        );

        drop(client);
        assert!(matches!(
            frames.next_frame().await,
            Err(LotteryError::ConnectionClosed)
        ));
    }
}
