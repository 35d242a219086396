//! Post-submission winners query with bounded retries.
//!
//! ```text
//!             ┌──────── WINNERS_LIST ───────► Completed
//!             │
//! AwaitingResponse ── NOT_DONE / timeout ──► Backoff ── attempts < max ──► AwaitingResponse
//!                                               │                          (query resent)
//!                                               └── attempts == max ──► Failed
//! ```
//!
//! The first query is sent before entering `AwaitingResponse`, so exactly
//! `max_attempts` queries go out before `Failed`.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::WinnersConfig;
use crate::error::{LotteryError, Result};
use crate::events::{Event, SharedSink};
use crate::protocol::{ErrorCode, Message, DEFAULT_MAX_FRAME_LENGTH};
use crate::transport::{write_message, FrameReader};

/// Retry loop state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WinnersState {
    AwaitingResponse,
    Backoff,
    Completed(Vec<u32>),
    Failed,
}

pub struct WinnersRetryLoop {
    agency: u32,
    config: WinnersConfig,
    events: SharedSink,
}

impl WinnersRetryLoop {
    pub fn new(agency: u32, config: WinnersConfig, events: SharedSink) -> Self {
        Self {
            agency,
            config,
            events,
        }
    }

    /// Connect to `address` and resolve this agency's winners.
    pub async fn query(&self, address: &str) -> Result<Vec<u32>> {
        let stream = match TcpStream::connect(address).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = LotteryError::Io(e);
                self.emit_terminal(&Err(&err), 0);
                return Err(err);
            }
        };
        let (reader, mut writer) = stream.into_split();
        self.run(reader, &mut writer).await
    }

    /// Drive the state machine over an established stream.
    ///
    /// Emits exactly one terminal event, whatever the outcome.
    pub async fn run<R, W>(&self, reader: R, writer: &mut W) -> Result<Vec<u32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut attempts = 0;
        let result = self.drive(reader, writer, &mut attempts).await;
        self.emit_terminal(&result.as_ref(), attempts);
        result
    }

    async fn drive<R, W>(&self, reader: R, writer: &mut W, attempts: &mut u32) -> Result<Vec<u32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let query = Message::WinnersQuery {
            agency: self.agency,
        };
        let mut frames = FrameReader::new(reader, DEFAULT_MAX_FRAME_LENGTH);
        let mut schedule = self.schedule();

        write_message(writer, &query).await?;
        *attempts = 1;
        let mut state = WinnersState::AwaitingResponse;

        loop {
            tracing::trace!(agency = self.agency, attempts = *attempts, ?state, "Winners loop");
            state = match state {
                WinnersState::AwaitingResponse => {
                    let waited =
                        tokio::time::timeout(self.config.response_timeout(), frames.next_message())
                            .await;
                    match waited {
                        Ok(Ok(Message::WinnersList(documents))) => {
                            WinnersState::Completed(documents)
                        }
                        Ok(Ok(Message::Error(ErrorCode::LotteryNotDone))) => {
                            tracing::debug!(agency = self.agency, "Lottery not done yet");
                            WinnersState::Backoff
                        }
                        Ok(Ok(Message::Error(code))) => return Err(LotteryError::Rejected(code)),
                        Ok(Ok(other)) => {
                            tracing::warn!(
                                agency = self.agency,
                                "Unexpected reply to winners query: {}",
                                other.msg_type()
                            );
                            WinnersState::Backoff
                        }
                        Ok(Err(e)) if !e.is_connection_fatal() => {
                            tracing::warn!(
                                agency = self.agency,
                                "Undecodable winners reply: {}",
                                e
                            );
                            WinnersState::Backoff
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => {
                            tracing::debug!(agency = self.agency, "Winners query timed out");
                            WinnersState::Backoff
                        }
                    }
                }
                WinnersState::Backoff => {
                    if *attempts >= self.config.max_attempts {
                        WinnersState::Failed
                    } else {
                        let delay = schedule
                            .next_backoff()
                            .unwrap_or_else(|| self.config.max_backoff());
                        tokio::time::sleep(delay).await;

                        write_message(writer, &query).await?;
                        *attempts += 1;
                        WinnersState::AwaitingResponse
                    }
                }
                WinnersState::Completed(documents) => return Ok(documents),
                WinnersState::Failed => {
                    return Err(LotteryError::RetryExhausted {
                        attempts: *attempts,
                    })
                }
            };
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }

    fn emit_terminal(&self, result: &std::result::Result<&Vec<u32>, &LotteryError>, attempts: u32) {
        let event = match result {
            Ok(documents) => Event::WinnersResolved {
                agency: self.agency,
                winners: documents.len(),
                attempts,
            },
            Err(LotteryError::RetryExhausted { attempts }) => Event::WinnersExhausted {
                agency: self.agency,
                attempts: *attempts,
            },
            Err(e) => Event::WinnersFailed {
                agency: self.agency,
                reason: e.to_string(),
            },
        };
        self.events.emit(event);
    }
}
