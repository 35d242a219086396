//! Size-bounded batching of bets.
//!
//! The aggregator keeps a running estimate of the batch frame size, starting
//! at the fixed frame overhead. A bet that would push the estimate past the
//! ceiling flushes the current batch first; the bet is then always appended.
//! A single bet larger than the ceiling therefore travels alone.
//!
//! ```text
//! bet_rx ──► BatchAggregator ──► batch_tx
//!              running = 9 + Σ bet bodies
//! ```

use tokio::sync::mpsc;

use crate::bet::Bet;
use crate::error::Result;
use crate::events::{Event, SharedSink};
use crate::protocol::{batch_encoded_len, Message, BATCH_OVERHEAD};

/// An ordered group of bets sent as one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch(Vec<Bet>);

impl Batch {
    pub fn new(bets: Vec<Bet>) -> Self {
        Self(bets)
    }

    pub fn bets(&self) -> &[Bet] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Full frame size including header and count.
    pub fn encoded_len(&self) -> Result<usize> {
        batch_encoded_len(&self.0)
    }

    pub fn into_message(self) -> Message {
        Message::Batch(self.0)
    }
}

/// Greedy batch builder.
#[derive(Debug)]
pub struct BatchAggregator {
    max_bytes: usize,
    current: Vec<Bet>,
    running: usize,
}

impl BatchAggregator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            current: Vec::new(),
            running: BATCH_OVERHEAD,
        }
    }

    /// Add a bet, returning the batch it displaced if any.
    ///
    /// # Errors
    ///
    /// `Format` if the bet cannot be encoded. The aggregator is left
    /// unchanged in that case.
    pub fn push(&mut self, bet: Bet) -> Result<Option<Batch>> {
        let marginal = bet.encoded_len()?;

        let flushed = if self.running + marginal > self.max_bytes && !self.current.is_empty() {
            self.take()
        } else {
            None
        };

        self.current.push(bet);
        self.running += marginal;
        Ok(flushed)
    }

    /// Emit whatever is left, if anything.
    pub fn finish(&mut self) -> Option<Batch> {
        self.take()
    }

    /// Current size estimate of the pending batch frame.
    pub fn pending_bytes(&self) -> usize {
        self.running
    }

    fn take(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        self.running = BATCH_OVERHEAD;
        Some(Batch(std::mem::take(&mut self.current)))
    }

    /// Drain `bet_rx` into batches on `batch_tx`.
    ///
    /// Returns when the bet channel closes (after flushing the tail) or when
    /// the batch channel is closed by its consumer. Dropping `batch_tx` on
    /// return propagates closure downstream.
    pub async fn run(
        mut self,
        agency: u32,
        mut bet_rx: mpsc::Receiver<Bet>,
        batch_tx: mpsc::Sender<Batch>,
        events: SharedSink,
    ) {
        while let Some(bet) = bet_rx.recv().await {
            let document = bet.document();
            match self.push(bet) {
                Ok(Some(batch)) => {
                    if batch_tx.send(batch).await.is_err() {
                        tracing::debug!("Batch channel closed, aggregator stopping");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => events.emit(Event::BetSkipped {
                    agency,
                    document,
                    reason: e.to_string(),
                }),
            }
        }

        if let Some(batch) = self.finish() {
            let _ = batch_tx.send(batch).await;
        }
    }
}
