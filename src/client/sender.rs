//! One sender lane: a TCP connection, its batch stream and its ack reader.
//!
//! ```text
//! batches ──► send_all ──► socket ──► server
//!    │                                  │
//!    └─► pending (bets per batch) ──► ack reader ◄──┘
//! ```
//!
//! The ack reader runs as its own task so outbound batches never wait on
//! inbound acknowledgements. Once the batch stream ends and every ack is in,
//! the lane waits for its siblings, sends one Notify and closes its write
//! half.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Barrier};

use crate::batch::Batch;
use crate::error::{LotteryError, Result};
use crate::events::{Event, SharedSink};
use crate::protocol::{Message, SuccessCode, DEFAULT_MAX_FRAME_LENGTH};
use crate::transport::{read_message, send_all, write_message};

/// Outcome of one lane.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub batches_sent: usize,
    pub bets_sent: usize,
    pub acknowledged: usize,
    pub rejected: usize,
    pub notified: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct AckCounts {
    acknowledged: usize,
    rejected: usize,
}

pub(crate) struct Sender {
    pub id: usize,
    pub agency: u32,
    pub address: String,
    pub max_pending: usize,
    pub events: SharedSink,
}

impl Sender {
    /// Run the lane to completion.
    ///
    /// `drained` is shared by every lane of the pipeline and is waited on
    /// exactly once, whatever the outcome, so a failed lane never stalls its
    /// siblings.
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<Batch>,
        drained: Arc<Barrier>,
    ) -> Result<SenderReport> {
        let submitted = self.submit(&mut batches).await;
        // Unblock the dispatcher if this lane gave up early.
        drop(batches);
        drained.wait().await;

        let (mut writer, mut report) = match submitted {
            Ok(ok) => ok,
            Err(e) => {
                self.events.emit(Event::SenderFailed {
                    agency: self.agency,
                    sender: self.id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let notify = Message::Notify {
            agency: self.agency,
        };
        if let Err(e) = self.finish(&mut writer, &notify).await {
            self.events.emit(Event::SenderFailed {
                agency: self.agency,
                sender: self.id,
                reason: e.to_string(),
            });
            return Err(e);
        }

        report.notified = true;
        self.events.emit(Event::Notified {
            agency: self.agency,
            sender: self.id,
        });
        Ok(report)
    }

    /// Connect, send every batch and collect every acknowledgement.
    async fn submit(
        &self,
        batches: &mut mpsc::Receiver<Batch>,
    ) -> Result<(OwnedWriteHalf, SenderReport)> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();

        tracing::debug!(agency = self.agency, sender = self.id, "Connected to {}", self.address);

        let (pending_tx, pending_rx) = mpsc::channel(self.max_pending.max(1));
        let mut reader = tokio::spawn(read_acks(
            read_half,
            pending_rx,
            self.agency,
            self.id,
            self.events.clone(),
        ));

        let mut report = SenderReport::default();
        let sent = self
            .send_batches(&mut writer, batches, &pending_tx, &mut report)
            .await;
        // A closed pending channel means the ack reader already returned.
        let reader_gone = pending_tx.is_closed();
        drop(pending_tx);

        if let Err(e) = sent {
            if reader_gone {
                return match reader.await? {
                    Err(cause) => Err(cause),
                    Ok(_) => Err(e),
                };
            }
            reader.abort();
            let _ = (&mut reader).await;
            return Err(e);
        }

        let acks = reader.await??;
        report.acknowledged = acks.acknowledged;
        report.rejected = acks.rejected;
        Ok((writer, report))
    }

    async fn send_batches(
        &self,
        writer: &mut OwnedWriteHalf,
        batches: &mut mpsc::Receiver<Batch>,
        pending: &mpsc::Sender<usize>,
        report: &mut SenderReport,
    ) -> Result<()> {
        while let Some(batch) = batches.recv().await {
            let bets = batch.len();
            let bytes = batch.into_message().encode()?;

            // Bounded: at most `max_pending` batches await an ack.
            pending
                .send(bets)
                .await
                .map_err(|_| LotteryError::Task("ack reader stopped".into()))?;
            send_all(writer, &bytes).await?;

            report.batches_sent += 1;
            report.bets_sent += bets;
            self.events.emit(Event::BatchSent {
                agency: self.agency,
                sender: self.id,
                bets,
            });
        }
        Ok(())
    }

    async fn finish(&self, writer: &mut OwnedWriteHalf, notify: &Message) -> Result<()> {
        write_message(writer, notify).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Match one reply to each pending batch, in send order.
///
/// Returns once the pending channel is closed and drained.
async fn read_acks(
    mut reader: OwnedReadHalf,
    mut pending: mpsc::Receiver<usize>,
    agency: u32,
    sender: usize,
    events: SharedSink,
) -> Result<AckCounts> {
    let mut counts = AckCounts::default();

    while let Some(bets) = pending.recv().await {
        match read_message(&mut reader, DEFAULT_MAX_FRAME_LENGTH).await {
            Ok(Message::Success(SuccessCode::BatchProcessed)) => {
                counts.acknowledged += 1;
                events.emit(Event::BatchAcknowledged {
                    agency,
                    sender,
                    bets,
                });
            }
            Ok(Message::Error(code)) => {
                counts.rejected += 1;
                events.emit(Event::BatchRejected {
                    agency,
                    sender,
                    code: code.as_byte(),
                });
            }
            Ok(other) => {
                counts.rejected += 1;
                tracing::warn!(agency, sender, "Unexpected reply to batch: {}", other.msg_type());
            }
            Err(e) if !e.is_connection_fatal() => {
                counts.rejected += 1;
                tracing::warn!(agency, sender, "Undecodable reply to batch: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(counts)
}
