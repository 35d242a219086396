//! Per-connection request handling.

use std::sync::Arc;

use tokio::net::TcpStream;

use super::barrier::{Arrival, LotteryBarrier};
use super::registry::AgencyRegistry;
use crate::bet::Bet;
use crate::config::ServerConfig;
use crate::error::{LotteryError, Result};
use crate::events::{Event, SharedSink};
use crate::protocol::{ErrorCode, Message, MsgType, SuccessCode};
use crate::transport::{write_message, FrameReader};

/// State shared by every connection.
pub(crate) struct Shared {
    pub config: ServerConfig,
    pub registry: AgencyRegistry,
    pub barrier: LotteryBarrier,
    pub events: SharedSink,
}

impl Shared {
    pub fn new(config: ServerConfig, events: SharedSink) -> Result<Self> {
        let barrier = LotteryBarrier::new(config.expected_agencies)?;
        Ok(Self {
            config,
            registry: AgencyRegistry::new(),
            barrier,
            events,
        })
    }

    /// Handle one decoded message. `None` means no reply is sent.
    pub async fn dispatch(&self, message: Message) -> Option<Message> {
        match message {
            Message::Bet(bet) => Some(self.store(vec![bet], MsgType::Bet)),
            Message::Batch(bets) => Some(self.store(bets, MsgType::Batch)),
            Message::Echo(body) => Some(Message::Echo(body)),
            Message::Notify { agency } => {
                self.notify(agency).await;
                None
            }
            Message::WinnersQuery { agency } => Some(match self.barrier.winners_for(agency) {
                Some(documents) => {
                    tracing::debug!(agency, winners = documents.len(), "Winners served");
                    Message::WinnersList(documents)
                }
                None => Message::Error(ErrorCode::LotteryNotDone),
            }),
            other => {
                tracing::warn!("Unexpected {} from client", other.msg_type());
                Some(Message::Error(ErrorCode::Invalid))
            }
        }
    }

    fn store(&self, bets: Vec<Bet>, kind: MsgType) -> Message {
        let agency = bets.first().map(Bet::agency);
        let (ok, failed) = match kind {
            MsgType::Bet => (SuccessCode::BetProcessed, ErrorCode::BetFailed),
            _ => (SuccessCode::BatchProcessed, ErrorCode::BatchFailed),
        };

        match self.registry.register(bets) {
            Ok(count) => {
                if let Some(agency) = agency {
                    self.events.emit(Event::BetsStored { agency, count });
                }
                Message::Success(ok)
            }
            Err(e) => {
                tracing::warn!(?agency, "Bets refused: {}", e);
                Message::Error(failed)
            }
        }
    }

    async fn notify(&self, agency: u32) {
        if self.registry.mark_notified(agency) {
            let winning_number = self.config.winning_number;
            let arrival = self.barrier.arrive(|| {
                self.registry
                    .close_and_draw(|bet| bet.has_won(winning_number))
            });

            self.events.emit(Event::AgencyNotified {
                agency,
                arrived: self.barrier.arrived(),
                expected: self.barrier.expected(),
            });
            if arrival == Arrival::Drew {
                self.events.emit(Event::LotteryDrawn {
                    agencies: self.barrier.expected(),
                    winners: self.barrier.winner_count(),
                });
            }
        } else {
            tracing::debug!(agency, "Repeated notify");
        }

        if let Err(e) = self.barrier.wait(self.config.rendezvous_timeout()).await {
            tracing::warn!(
                agency,
                arrived = self.barrier.arrived(),
                expected = self.barrier.expected(),
                "{}",
                e
            );
        }
    }
}

/// Error code for a frame whose body failed to decode.
fn rejection_code(error: &LotteryError) -> ErrorCode {
    match error {
        LotteryError::Invalid(_) => ErrorCode::Invalid,
        _ => ErrorCode::Malformed,
    }
}

/// Serve one client until it disconnects.
///
/// Body decode failures are answered and the loop continues. Frame-level
/// violations get a best-effort MALFORMED and end the connection.
pub(crate) async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(read_half, shared.config.max_frame_length);

    loop {
        let frame = match frames.next_frame().await {
            Ok(frame) => frame,
            Err(LotteryError::ConnectionClosed) => {
                tracing::debug!("Client disconnected");
                return Ok(());
            }
            Err(e @ LotteryError::Protocol(_)) => {
                let _ = write_message(&mut writer, &Message::Error(ErrorCode::Malformed)).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let reply = match Message::decode(&frame) {
            Ok(message) => shared.dispatch(message).await,
            Err(e) => {
                tracing::warn!(msg_type = %frame.msg_type(), "Rejected frame: {}", e);
                Some(Message::Error(rejection_code(&e)))
            }
        };

        if let Some(reply) = reply {
            write_message(&mut writer, &reply).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use bytes::Bytes;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn shared(expected: usize) -> Shared {
        let config = ServerConfig {
            expected_agencies: expected,
            rendezvous_timeout_ms: 50,
            ..ServerConfig::default()
        };
        Shared::new(config, MemorySink::new()).unwrap()
    }

    fn bet(agency: u32, document: u32, number: u32) -> Bet {
        Bet::new(
            agency,
            "A",
            "B",
            document,
            NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
            number,
        )
    }

    #[tokio::test]
    async fn test_bet_and_batch_acks() {
        let shared = shared(1);

        assert_eq!(
            shared.dispatch(Message::Bet(bet(1, 1, 1))).await,
            Some(Message::Success(SuccessCode::BetProcessed))
        );
        assert_eq!(
            shared
                .dispatch(Message::Batch(vec![bet(1, 2, 2), bet(1, 3, 3)]))
                .await,
            Some(Message::Success(SuccessCode::BatchProcessed))
        );
        assert_eq!(shared.registry.bet_count(1), 3);
    }

    #[tokio::test]
    async fn test_query_before_and_after_draw() {
        let shared = shared(1);
        shared
            .dispatch(Message::Batch(vec![bet(5, 10, 7574), bet(5, 11, 3)]))
            .await;

        assert_eq!(
            shared.dispatch(Message::WinnersQuery { agency: 5 }).await,
            Some(Message::Error(ErrorCode::LotteryNotDone))
        );

        assert_eq!(shared.dispatch(Message::Notify { agency: 5 }).await, None);

        assert_eq!(
            shared.dispatch(Message::WinnersQuery { agency: 5 }).await,
            Some(Message::WinnersList(vec![10]))
        );
        assert_eq!(
            shared.dispatch(Message::WinnersQuery { agency: 6 }).await,
            Some(Message::WinnersList(Vec::new()))
        );
        assert_eq!(
            shared.dispatch(Message::Bet(bet(5, 12, 7574))).await,
            Some(Message::Error(ErrorCode::BetFailed))
        );
    }

    #[tokio::test]
    async fn test_notify_times_out_without_peers() {
        let shared = shared(2);
        let started = tokio::time::Instant::now();

        assert_eq!(shared.dispatch(Message::Notify { agency: 1 }).await, None);

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(shared.barrier.draws(), 0);
    }

    #[tokio::test]
    async fn test_echo_and_unexpected() {
        let shared = shared(1);
        assert_eq!(
            shared
                .dispatch(Message::Echo(Bytes::from_static(b"ping")))
                .await,
            Some(Message::Echo(Bytes::from_static(b"ping")))
        );
        assert_eq!(
            shared
                .dispatch(Message::Success(SuccessCode::BetProcessed))
                .await,
            Some(Message::Error(ErrorCode::Invalid))
        );
        assert_eq!(
            shared
                .dispatch(Message::Unknown {
                    tag: 0x40,
                    body: Bytes::new()
                })
                .await,
            Some(Message::Error(ErrorCode::Invalid))
        );
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(
            rejection_code(&LotteryError::Invalid("date".into())),
            ErrorCode::Invalid
        );
        assert_eq!(
            rejection_code(&LotteryError::Malformed("short".into())),
            ErrorCode::Malformed
        );
    }
}
