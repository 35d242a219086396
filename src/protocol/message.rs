//! Typed protocol messages and their body layouts.
//!
//! ```text
//! Bet          agency u32 │ first (u32 len + UTF-8) │ last (u32 len + UTF-8)
//!              │ document u32 │ birth date 10 bytes ASCII │ number u32
//! Batch        count u32 │ count × Bet body
//! Notify       agency u32
//! WinnersQuery agency u32
//! WinnersList  count u32 │ count × document u32
//! Success      status code u8
//! Error        error code u8
//! Echo         opaque bytes
//! ```
//!
//! Bodies are self-delimiting; the frame length must match them exactly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::NaiveDate;

use super::frame::Frame;
use super::wire_format::{ErrorCode, MsgType, SuccessCode, BATCH_OVERHEAD, DATE_SIZE, HEADER_SIZE};
use crate::bet::{Bet, DATE_FORMAT};
use crate::error::{LotteryError, Result};

/// Smallest possible bet body (two empty names).
const MIN_BET_BODY: usize = 30;

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Acknowledgement.
    Success(SuccessCode),
    /// Rejection.
    Error(ErrorCode),
    /// A single bet.
    Bet(Bet),
    /// A batch of bets.
    Batch(Vec<Bet>),
    /// Echo probe, body returned verbatim.
    Echo(Bytes),
    /// Agency finished submitting.
    Notify { agency: u32 },
    /// Request for an agency's winners.
    WinnersQuery { agency: u32 },
    /// Winning documents for the querying agency.
    WinnersList(Vec<u32>),
    /// A frame with an unassigned type tag.
    Unknown { tag: u8, body: Bytes },
}

impl Message {
    /// Type tag for this message.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Success(_) => MsgType::Success,
            Message::Error(_) => MsgType::Error,
            Message::Bet(_) => MsgType::Bet,
            Message::Batch(_) => MsgType::Batch,
            Message::Echo(_) => MsgType::Echo,
            Message::Notify { .. } => MsgType::Notify,
            Message::WinnersQuery { .. } => MsgType::WinnersQuery,
            Message::WinnersList(_) => MsgType::WinnersList,
            Message::Unknown { tag, .. } => MsgType::from_byte(*tag),
        }
    }

    /// Append this message's body to `buf`.
    ///
    /// Fails with `Format` before writing anything unusable.
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Message::Success(code) => buf.put_u8(code.as_byte()),
            Message::Error(code) => buf.put_u8(code.as_byte()),
            Message::Bet(bet) => encode_bet(bet, buf)?,
            Message::Batch(bets) => {
                put_count(buf, bets.len())?;
                for bet in bets {
                    encode_bet(bet, buf)?;
                }
            }
            Message::Echo(body) | Message::Unknown { body, .. } => buf.put_slice(body),
            Message::Notify { agency } | Message::WinnersQuery { agency } => buf.put_u32(*agency),
            Message::WinnersList(documents) => {
                put_count(buf, documents.len())?;
                for document in documents {
                    buf.put_u32(*document);
                }
            }
        }
        Ok(())
    }

    /// Build the frame for this message.
    pub fn to_frame(&self) -> Result<Frame> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        Frame::new(self.msg_type(), body.freeze())
    }

    /// Encode to the complete wire representation.
    ///
    /// # Example
    ///
    /// ```
    /// use lottery_wire::protocol::{ErrorCode, Message};
    ///
    /// let bytes = Message::Error(ErrorCode::LotteryNotDone).encode().unwrap();
    /// assert_eq!(bytes, vec![0, 0, 0, 2, 0x01, 0x05]);
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
        buf.put_slice(&[0u8; HEADER_SIZE]);
        self.encode_body(&mut buf)?;

        let length = u32::try_from(buf.len() - HEADER_SIZE + 1)
            .map_err(|_| LotteryError::Format("message body exceeds u32 length".to_string()))?;
        buf[0..4].copy_from_slice(&length.to_be_bytes());
        buf[4] = self.msg_type().as_byte();
        Ok(buf.to_vec())
    }

    /// Decode a frame's body according to its type tag.
    ///
    /// Unknown tags decode successfully to `Message::Unknown`.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let mut body = BodyReader::new(frame.body());
        let message = match frame.msg_type() {
            MsgType::Success => {
                let byte = body.u8("status code")?;
                Message::Success(SuccessCode::from_byte(byte).ok_or_else(|| {
                    LotteryError::Malformed(format!("unknown success code 0x{:02x}", byte))
                })?)
            }
            MsgType::Error => {
                let byte = body.u8("error code")?;
                Message::Error(ErrorCode::from_byte(byte).ok_or_else(|| {
                    LotteryError::Malformed(format!("unknown error code 0x{:02x}", byte))
                })?)
            }
            MsgType::Bet => Message::Bet(body.bet()?),
            MsgType::Batch => {
                let count = body.count(MIN_BET_BODY, "bet")?;
                let mut bets = Vec::with_capacity(count);
                for _ in 0..count {
                    bets.push(body.bet()?);
                }
                Message::Batch(bets)
            }
            MsgType::Echo => return Ok(Message::Echo(frame.body.clone())),
            MsgType::Notify => Message::Notify {
                agency: body.u32("agency")?,
            },
            MsgType::WinnersQuery => Message::WinnersQuery {
                agency: body.u32("agency")?,
            },
            MsgType::WinnersList => {
                let count = body.count(4, "document")?;
                let mut documents = Vec::with_capacity(count);
                for _ in 0..count {
                    documents.push(body.u32("document")?);
                }
                Message::WinnersList(documents)
            }
            MsgType::Unknown(tag) => {
                return Ok(Message::Unknown {
                    tag,
                    body: frame.body.clone(),
                })
            }
        };
        body.finish()?;
        Ok(message)
    }
}

/// Encoded size of a batch frame holding `bets`, header included.
pub fn batch_encoded_len(bets: &[Bet]) -> Result<usize> {
    bets.iter()
        .try_fold(BATCH_OVERHEAD, |total, bet| Ok(total + bet.encoded_len()?))
}

fn put_count(buf: &mut BytesMut, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| LotteryError::Format(format!("{} elements exceed u32 count", count)))?;
    buf.put_u32(count);
    Ok(())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    put_count(buf, value.len())?;
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn encode_bet(bet: &Bet, buf: &mut BytesMut) -> Result<()> {
    // Validate the only fallible field first so nothing partial is left behind.
    let date = bet.birth_date_bytes()?;

    buf.put_u32(bet.agency());
    put_string(buf, bet.first_name())?;
    put_string(buf, bet.last_name())?;
    buf.put_u32(bet.document());
    buf.put_slice(&date);
    buf.put_u32(bet.number());
    Ok(())
}

/// Bounds-checked cursor over a frame body.
struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(LotteryError::Malformed(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    /// Read an element count and check it against the bytes left.
    fn count(&mut self, min_element: usize, what: &str) -> Result<usize> {
        let count = self.u32("count")? as usize;
        if count.saturating_mul(min_element) > self.buf.remaining() {
            return Err(LotteryError::Malformed(format!(
                "declared {} {} entries but only {} bytes follow",
                count,
                what,
                self.buf.remaining()
            )));
        }
        Ok(count)
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        self.need(len, what)?;
        let (raw, rest) = self.buf.split_at(len);
        self.buf = rest;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| LotteryError::Malformed(format!("{} is not UTF-8: {}", what, e)))
    }

    fn date(&mut self) -> Result<NaiveDate> {
        self.need(DATE_SIZE, "birth date")?;
        let (raw, rest) = self.buf.split_at(DATE_SIZE);
        self.buf = rest;

        if !is_date_pattern(raw) {
            return Err(LotteryError::Invalid(format!(
                "birth date {:?} does not match YYYY-MM-DD",
                String::from_utf8_lossy(raw)
            )));
        }
        // The pattern check guarantees ASCII.
        let text = std::str::from_utf8(raw)
            .map_err(|e| LotteryError::Invalid(format!("birth date is not ASCII: {}", e)))?;
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map_err(|e| LotteryError::Invalid(format!("birth date {:?}: {}", text, e)))
    }

    fn bet(&mut self) -> Result<Bet> {
        let agency = self.u32("agency")?;
        let first_name = self.string("first name")?;
        let last_name = self.string("last name")?;
        let document = self.u32("document")?;
        let birth_date = self.date()?;
        let number = self.u32("number")?;
        Ok(Bet::new(
            agency, first_name, last_name, document, birth_date, number,
        ))
    }

    fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(LotteryError::Malformed(format!(
                "{} trailing bytes after body",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

fn is_date_pattern(raw: &[u8]) -> bool {
    raw.len() == DATE_SIZE
        && raw.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn john() -> Bet {
        Bet::new(1, "John", "Does", 19088743, date(2000, 10, 1), 10)
    }

    fn decode_bytes(bytes: &[u8]) -> Result<Message> {
        let mut buffer = super::super::FrameBuffer::new();
        let frames = buffer.push(bytes)?;
        assert_eq!(frames.len(), 1);
        Message::decode(&frames[0])
    }

    #[test]
    fn test_bet_layout_is_bit_exact() {
        let bytes = Message::Bet(john()).encode().unwrap();

        let mut expected = vec![0x00, 0x00, 0x00, 0x27, 0x10];
        expected.extend_from_slice(&[0, 0, 0, 1]);
        expected.extend_from_slice(&[0, 0, 0, 4]);
        expected.extend_from_slice(b"John");
        expected.extend_from_slice(&[0, 0, 0, 4]);
        expected.extend_from_slice(b"Does");
        expected.extend_from_slice(&[0x01, 0x23, 0x45, 0x67]);
        expected.extend_from_slice(b"2000-10-01");
        expected.extend_from_slice(&[0, 0, 0, 10]);

        assert_eq!(bytes.len(), 0x2B);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_bet_decodes_back() {
        let bytes = Message::Bet(john()).encode().unwrap();
        assert_eq!(decode_bytes(&bytes).unwrap(), Message::Bet(john()));
    }

    #[test]
    fn test_batch_has_no_per_bet_prefix() {
        let other = Bet::new(1, "Ana", "Paz", 7, date(1990, 1, 2), 7574);
        let bets = vec![john(), other];
        let bytes = Message::Batch(bets.clone()).encode().unwrap();

        assert_eq!(bytes.len(), batch_encoded_len(&bets).unwrap());
        assert_eq!(&bytes[5..9], &[0, 0, 0, 2]);
        // First bet body starts right after the count.
        assert_eq!(&bytes[9..13], &[0, 0, 0, 1]);
        assert_eq!(decode_bytes(&bytes).unwrap(), Message::Batch(bets));
    }

    #[test]
    fn test_empty_batch() {
        let bytes = Message::Batch(Vec::new()).encode().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 5, 0x11, 0, 0, 0, 0]);
        assert_eq!(batch_encoded_len(&[]).unwrap(), BATCH_OVERHEAD);
    }

    #[test]
    fn test_small_messages() {
        assert_eq!(
            Message::Success(SuccessCode::BatchProcessed).encode().unwrap(),
            vec![0, 0, 0, 2, 0x00, 0x01]
        );
        assert_eq!(
            Message::Notify { agency: 3 }.encode().unwrap(),
            vec![0, 0, 0, 5, 0x13, 0, 0, 0, 3]
        );
        assert_eq!(
            Message::WinnersQuery { agency: 3 }.encode().unwrap(),
            vec![0, 0, 0, 5, 0x14, 0, 0, 0, 3]
        );
        assert_eq!(
            Message::WinnersList(vec![0x0A0B0C0D]).encode().unwrap(),
            vec![0, 0, 0, 9, 0x15, 0, 0, 0, 1, 0x0A, 0x0B, 0x0C, 0x0D]
        );
    }

    #[test]
    fn test_unknown_tag_decodes() {
        let frame = Frame::new(MsgType::Unknown(0x30), Bytes::from_static(b"future")).unwrap();
        let message = Message::decode(&frame).unwrap();

        assert_eq!(
            message,
            Message::Unknown {
                tag: 0x30,
                body: Bytes::from_static(b"future")
            }
        );
        assert_eq!(message.msg_type(), MsgType::Unknown(0x30));
    }

    #[test]
    fn test_truncated_bet_is_malformed() {
        let mut bytes = Message::Bet(john()).encode().unwrap();
        bytes.truncate(bytes.len() - 2);
        bytes[3] -= 2;

        assert!(matches!(
            decode_bytes(&bytes),
            Err(LotteryError::Malformed(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let frame = Frame::new(MsgType::Notify, Bytes::from_static(&[0, 0, 0, 1, 9])).unwrap();
        let err = Message::decode(&frame).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_string_length_overrun_is_malformed() {
        let mut body = BytesMut::new();
        body.put_u32(1);
        body.put_u32(500); // first name claims 500 bytes
        body.put_slice(b"John");
        let frame = Frame::new(MsgType::Bet, body.freeze()).unwrap();

        assert!(matches!(
            Message::decode(&frame),
            Err(LotteryError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut body = BytesMut::new();
        body.put_u32(1);
        body.put_u32(2);
        body.put_slice(&[0xC3, 0x28]);
        let frame = Frame::new(MsgType::Bet, body.freeze()).unwrap();

        let err = Message::decode(&frame).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_bad_date_is_invalid() {
        let bytes = Message::Bet(john()).encode().unwrap();

        let mut slashed = bytes.clone();
        let date_at = bytes.len() - 14;
        slashed[date_at + 4] = b'/';
        assert!(matches!(
            decode_bytes(&slashed),
            Err(LotteryError::Invalid(_))
        ));

        let mut impossible = bytes;
        impossible[date_at + 5..date_at + 7].copy_from_slice(b"13");
        assert!(matches!(
            decode_bytes(&impossible),
            Err(LotteryError::Invalid(_))
        ));
    }

    #[test]
    fn test_batch_count_larger_than_body() {
        let frame = Frame::new(MsgType::Batch, Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF])).unwrap();
        let err = Message::decode(&frame).unwrap_err();
        assert!(err.to_string().contains("declared"));
    }

    #[test]
    fn test_ack_body_must_be_known_code() {
        let frame = Frame::new(MsgType::Success, Bytes::from_static(&[0x09])).unwrap();
        assert!(Message::decode(&frame).is_err());

        let frame = Frame::new(MsgType::Error, Bytes::new()).unwrap();
        assert!(Message::decode(&frame).is_err());

        let frame = Frame::new(MsgType::Error, Bytes::from_static(&[0x05])).unwrap();
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::Error(ErrorCode::LotteryNotDone)
        );
    }

    #[test]
    fn test_unencodable_date_fails_before_output() {
        let far = Bet::new(1, "a", "b", 1, date(10000, 1, 1), 1);
        let mut buf = BytesMut::new();

        assert!(matches!(
            Message::Bet(far).encode_body(&mut buf),
            Err(LotteryError::Format(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_echo_body_kept_verbatim() {
        let frame = Frame::new(MsgType::Echo, Bytes::from_static(b"\x00\x01raw")).unwrap();
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::Echo(Bytes::from_static(b"\x00\x01raw"))
        );
    }
}
