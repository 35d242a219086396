//! Client submission pipeline.
//!
//! ```text
//! BetSource ─► producer ─► bets ─► aggregator ─► batches ─► dispatcher ─┬─► lane 0 ─► TCP
//!                                                                       ├─► lane 1 ─► TCP
//!                                                                       └─► lane N ─► TCP
//! ```
//!
//! Every stage is its own task. Stages share nothing but bounded channels;
//! closing a channel is the only shutdown signal. The dispatcher hands each
//! batch to whichever lane has room first, so ordering holds per connection
//! only.

use std::sync::Arc;

use futures::future::select_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Barrier};
use tokio::task::JoinHandle;

use super::sender::{Sender, SenderReport};
use super::source::BetSource;
use crate::batch::{Batch, BatchAggregator};
use crate::bet::Bet;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::events::SharedSink;

/// Totals for one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub bets_read: usize,
    pub batches_sent: usize,
    pub bets_sent: usize,
    pub acknowledged: usize,
    pub rejected: usize,
    pub notifications: usize,
}

impl PipelineReport {
    fn absorb(&mut self, lane: &SenderReport) {
        self.batches_sent += lane.batches_sent;
        self.bets_sent += lane.bets_sent;
        self.acknowledged += lane.acknowledged;
        self.rejected += lane.rejected;
        if lane.notified {
            self.notifications += 1;
        }
    }
}

/// Wires a source, an aggregator and the sender lanes together.
pub struct ConnectionPipeline<S> {
    config: ClientConfig,
    source: S,
    events: SharedSink,
}

impl<S> ConnectionPipeline<S>
where
    S: BetSource + 'static,
{
    pub fn new(config: ClientConfig, source: S, events: SharedSink) -> Self {
        Self {
            config,
            source,
            events,
        }
    }

    /// Run every stage to completion.
    ///
    /// All tasks are joined before returning. The first error in stage order
    /// (producer, dispatcher, then lanes) is returned; the report is only
    /// produced when nothing failed.
    pub async fn run(self) -> Result<PipelineReport> {
        let ConnectionPipeline {
            config,
            source,
            events,
        } = self;
        let capacity = config.channel_capacity.max(1);
        let lanes = config.sender_count.max(1);

        let (bet_tx, bet_rx) = mpsc::channel::<Bet>(capacity);
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(capacity);

        let producer = tokio::spawn(produce(source, bet_tx));
        let aggregator = tokio::spawn(BatchAggregator::new(config.batch_max_bytes).run(
            config.agency_id,
            bet_rx,
            batch_tx,
            events.clone(),
        ));

        let drained = Arc::new(Barrier::new(lanes));
        let mut lane_txs = Vec::with_capacity(lanes);
        let mut senders: Vec<JoinHandle<Result<SenderReport>>> = Vec::with_capacity(lanes);
        for id in 0..lanes {
            // One slot per lane: a batch waits in the lane only while the
            // lane is free to take it.
            let (tx, rx) = mpsc::channel::<Batch>(1);
            lane_txs.push(tx);

            let sender = Sender {
                id,
                agency: config.agency_id,
                address: config.server_address.clone(),
                max_pending: capacity,
                events: events.clone(),
            };
            senders.push(tokio::spawn(sender.run(rx, drained.clone())));
        }

        let dispatcher = tokio::spawn(dispatch(batch_rx, lane_txs));

        let produced = producer.await?;
        aggregator.await?;
        let dispatched = dispatcher.await?;

        let mut report = PipelineReport::default();
        let mut lane_error = None;
        for handle in senders {
            match handle.await? {
                Ok(lane) => report.absorb(&lane),
                Err(e) => {
                    lane_error.get_or_insert(e);
                }
            }
        }

        report.bets_read = produced?;
        dispatched?;
        if let Some(e) = lane_error {
            return Err(e);
        }

        tracing::info!(
            agency = config.agency_id,
            bets = report.bets_sent,
            batches = report.batches_sent,
            "Pipeline finished"
        );
        Ok(report)
    }
}

/// Publish every bet from `source`, then close the channel.
async fn produce<S: BetSource>(mut source: S, bet_tx: mpsc::Sender<Bet>) -> Result<usize> {
    let mut count = 0;
    while let Some(bet) = source.next_bet().await? {
        if bet_tx.send(bet).await.is_err() {
            tracing::debug!("Bet channel closed, producer stopping");
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Hand each batch to the first lane with a free slot.
///
/// Closed lanes are dropped from the rotation. Dropping `lanes` on return
/// closes every lane's batch stream.
async fn dispatch(
    mut batch_rx: mpsc::Receiver<Batch>,
    mut lanes: Vec<mpsc::Sender<Batch>>,
) -> Result<()> {
    while let Some(batch) = batch_rx.recv().await {
        loop {
            if lanes.is_empty() {
                tracing::warn!(bets = batch.len(), "No sender lane left, dropping batch");
                break;
            }

            let (reserved, index, rest) =
                select_all(lanes.iter().map(|lane| lane.reserve().boxed())).await;
            // Every borrow of `lanes` must end before a closed lane is removed.
            let permit = reserved.ok();
            drop(rest);
            match permit {
                Some(permit) => {
                    permit.send(batch);
                    break;
                }
                None => {
                    drop(permit);
                    lanes.swap_remove(index);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::client::source::MemorySource;
    use crate::error::LotteryError;
    use crate::events::{Event, MemorySink};

    fn batch(n: u32) -> Batch {
        Batch::new(vec![Bet::new(
            1,
            "a",
            "b",
            n,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            n,
        )])
    }

    #[tokio::test]
    async fn test_dispatch_skips_closed_lane() {
        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        let (open_tx, mut open_rx) = mpsc::channel(4);
        drop(closed_rx);

        for n in 0..3 {
            batch_tx.send(batch(n)).await.unwrap();
        }
        drop(batch_tx);

        dispatch(batch_rx, vec![closed_tx, open_tx]).await.unwrap();

        let mut received = Vec::new();
        while let Some(b) = open_rx.recv().await {
            received.push(b.bets()[0].number());
        }
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_dispatch_without_lanes_drains() {
        let (batch_tx, batch_rx) = mpsc::channel(2);
        batch_tx.send(batch(1)).await.unwrap();
        drop(batch_tx);

        dispatch(batch_rx, Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_all_lanes_closed() {
        let (batch_tx, batch_rx) = mpsc::channel(16);
        let lanes: Vec<_> = (0..3)
            .map(|_| {
                let (tx, rx) = mpsc::channel::<Batch>(1);
                drop(rx);
                tx
            })
            .collect();

        let feeder = tokio::spawn(async move {
            for n in 0..500 {
                batch_tx.send(batch(n)).await.unwrap();
            }
        });

        tokio::time::timeout(Duration::from_secs(5), dispatch(batch_rx, lanes))
            .await
            .unwrap()
            .unwrap();
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_lanes_fail_without_hanging() {
        let addr = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let config = ClientConfig {
            agency_id: 5,
            server_address: addr.to_string(),
            sender_count: 3,
            batch_max_bytes: 256,
            ..ClientConfig::default()
        };
        let bets = (0..500).map(|n| batch(n).bets()[0].clone());
        let sink = MemorySink::new();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ConnectionPipeline::new(config, MemorySource::new(bets), sink.clone()).run(),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(LotteryError::Io(_))));
        assert_eq!(sink.count(|e| matches!(e, Event::SenderFailed { .. })), 3);
    }

    #[tokio::test]
    async fn test_dispatch_spreads_over_busy_lanes() {
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (a_tx, mut a_rx) = mpsc::channel(1);
        let (b_tx, mut b_rx) = mpsc::channel(1);

        for n in 0..2 {
            batch_tx.send(batch(n)).await.unwrap();
        }
        drop(batch_tx);

        // Neither lane is read until dispatch finishes, so each can hold
        // exactly one batch.
        dispatch(batch_rx, vec![a_tx, b_tx]).await.unwrap();

        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
        assert!(a_rx.recv().await.is_none());
        assert!(b_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_counts_and_closes() {
        let bets = (0..5).map(|n| batch(n).bets()[0].clone());
        let (bet_tx, mut bet_rx) = mpsc::channel(8);

        let count = produce(MemorySource::new(bets), bet_tx).await.unwrap();

        assert_eq!(count, 5);
        let mut seen = 0;
        while bet_rx.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_report_absorb() {
        let mut report = PipelineReport::default();
        report.absorb(&SenderReport {
            batches_sent: 2,
            bets_sent: 7,
            acknowledged: 2,
            rejected: 0,
            notified: true,
        });
        report.absorb(&SenderReport {
            batches_sent: 1,
            bets_sent: 1,
            acknowledged: 0,
            rejected: 1,
            notified: false,
        });

        assert_eq!(report.batches_sent, 3);
        assert_eq!(report.bets_sent, 8);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.notifications, 1);
    }
}
