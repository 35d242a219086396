//! Structured outcome events.
//!
//! Components never log their results through ambient state. Each one is
//! handed a [`SharedSink`] and reports what happened through it; the
//! binaries plug in [`TracingSink`], tests plug in [`MemorySink`].

use std::sync::{Arc, Mutex};

/// A triggering event worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A batch frame was handed to the transport.
    BatchSent { agency: u32, sender: usize, bets: usize },
    /// The server acknowledged a batch.
    BatchAcknowledged { agency: u32, sender: usize, bets: usize },
    /// The server rejected a batch.
    BatchRejected { agency: u32, sender: usize, code: u8 },
    /// A bet could not be encoded and was left out.
    BetSkipped { agency: u32, document: u32, reason: String },
    /// A sender finished with its Notify frame.
    Notified { agency: u32, sender: usize },
    /// A sender stopped on an error.
    SenderFailed { agency: u32, sender: usize, reason: String },
    /// The winners query completed.
    WinnersResolved { agency: u32, winners: usize, attempts: u32 },
    /// Every winners query attempt was used up.
    WinnersExhausted { agency: u32, attempts: u32 },
    /// The winners query hit a transport failure.
    WinnersFailed { agency: u32, reason: String },
    /// Server stored bets for an agency.
    BetsStored { agency: u32, count: usize },
    /// Server saw an agency's first Notify.
    AgencyNotified { agency: u32, arrived: usize, expected: usize },
    /// Server ran the draw.
    LotteryDrawn { agencies: usize, winners: usize },
}

impl Event {
    /// Short action name, stable for log queries.
    pub fn action(&self) -> &'static str {
        match self {
            Event::BatchSent { .. } => "batch_sent",
            Event::BatchAcknowledged { .. } | Event::BatchRejected { .. } => "batch_ack",
            Event::BetSkipped { .. } => "bet_skipped",
            Event::Notified { .. } => "notify",
            Event::SenderFailed { .. } => "sender",
            Event::WinnersResolved { .. }
            | Event::WinnersExhausted { .. }
            | Event::WinnersFailed { .. } => "winners_query",
            Event::BetsStored { .. } => "bets_stored",
            Event::AgencyNotified { .. } => "notify_received",
            Event::LotteryDrawn { .. } => "draw",
        }
    }

    /// Whether the event reports a success.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Event::BatchRejected { .. }
                | Event::BetSkipped { .. }
                | Event::SenderFailed { .. }
                | Event::WinnersExhausted { .. }
                | Event::WinnersFailed { .. }
        )
    }
}

/// Destination for [`Event`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Shared handle passed to every component.
pub type SharedSink = Arc<dyn EventSink>;

/// Renders events as `tracing` events with `action` and `result` fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        let action = event.action();
        let result = if event.is_success() { "success" } else { "fail" };

        match &event {
            Event::BatchSent { agency, sender, bets } => {
                tracing::debug!(action, result, agency, sender, bets, "Batch sent");
            }
            Event::BatchAcknowledged { agency, sender, bets } => {
                tracing::info!(action, result, agency, sender, bets, "Batch acknowledged");
            }
            Event::BatchRejected { agency, sender, code } => {
                tracing::error!(action, result, agency, sender, code, "Batch rejected");
            }
            Event::BetSkipped { agency, document, reason } => {
                tracing::warn!(action, result, agency, document, %reason, "Bet skipped");
            }
            Event::Notified { agency, sender } => {
                tracing::info!(action, result, agency, sender, "Notify sent");
            }
            Event::SenderFailed { agency, sender, reason } => {
                tracing::error!(action, result, agency, sender, %reason, "Sender failed");
            }
            Event::WinnersResolved { agency, winners, attempts } => {
                tracing::info!(action, result, agency, winners, attempts, "Winners resolved");
            }
            Event::WinnersExhausted { agency, attempts } => {
                tracing::error!(
                    action,
                    result,
                    agency,
                    attempts,
                    "Winners query attempts exhausted"
                );
            }
            Event::WinnersFailed { agency, reason } => {
                tracing::error!(action, result, agency, %reason, "Winners query failed");
            }
            Event::BetsStored { agency, count } => {
                tracing::info!(action, result, agency, count, "Bets stored");
            }
            Event::AgencyNotified { agency, arrived, expected } => {
                tracing::info!(action, result, agency, arrived, expected, "Agency notified");
            }
            Event::LotteryDrawn { agencies, winners } => {
                tracing::info!(action, result, agencies, winners, "Lottery drawn");
            }
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Count events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(Event::Notified { agency: 1, sender: 0 });
        sink.emit(Event::WinnersExhausted {
            agency: 1,
            attempts: 3,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Notified { agency: 1, sender: 0 });
        assert_eq!(sink.count(|e| !e.is_success()), 1);
    }

    #[test]
    fn test_shared_sink_coerces() {
        let memory = MemorySink::new();
        let shared: SharedSink = memory.clone();
        shared.emit(Event::LotteryDrawn {
            agencies: 2,
            winners: 0,
        });
        assert_eq!(memory.events().len(), 1);
    }

    #[test]
    fn test_actions() {
        assert_eq!(
            Event::BatchAcknowledged {
                agency: 1,
                sender: 0,
                bets: 3
            }
            .action(),
            "batch_ack"
        );
        assert_eq!(
            Event::WinnersExhausted {
                agency: 1,
                attempts: 3
            }
            .action(),
            "winners_query"
        );
        assert!(!Event::WinnersFailed {
            agency: 1,
            reason: "x".into()
        }
        .is_success());
    }
}
