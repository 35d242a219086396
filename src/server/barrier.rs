//! One-shot rendezvous gating the draw.
//!
//! An atomic counter tracks arrivals. The party that completes the count
//! runs the draw, caches the winners and flips a broadcast-once `watch`
//! signal from `Pending` to `Drawn`; every waiter is released by that single
//! transition. The barrier is not reusable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{LotteryError, Result};

/// Observable lottery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotteryState {
    Pending,
    Drawn,
}

/// What a call to [`LotteryBarrier::arrive`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Counted; more parties are still expected.
    Waiting { arrived: usize },
    /// This party completed the count and ran the draw.
    Drew,
    /// The count was already complete.
    AlreadyDrawn,
}

pub struct LotteryBarrier {
    expected: usize,
    arrived: AtomicUsize,
    winners: OnceLock<HashMap<u32, Vec<u32>>>,
    signal: watch::Sender<LotteryState>,
    draws: AtomicUsize,
}

impl LotteryBarrier {
    /// Barrier for `expected` parties. Zero parties is a configuration error.
    pub fn new(expected: usize) -> Result<Self> {
        if expected == 0 {
            return Err(LotteryError::Config(
                "barrier needs at least one party".into(),
            ));
        }
        let (signal, _) = watch::channel(LotteryState::Pending);
        Ok(Self {
            expected,
            arrived: AtomicUsize::new(0),
            winners: OnceLock::new(),
            signal,
            draws: AtomicUsize::new(0),
        })
    }

    /// Count one party in.
    ///
    /// Callers arrive at most once per party. The last party runs `draw` on
    /// its own stack before anyone is released.
    pub fn arrive<F>(&self, draw: F) -> Arrival
    where
        F: FnOnce() -> HashMap<u32, Vec<u32>>,
    {
        let arrived = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;

        if arrived < self.expected {
            return Arrival::Waiting { arrived };
        }
        if arrived > self.expected {
            return Arrival::AlreadyDrawn;
        }

        let winners = draw();
        self.draws.fetch_add(1, Ordering::Relaxed);
        if self.winners.set(winners).is_err() {
            tracing::error!("Winners cache was already populated");
        }
        self.signal.send_replace(LotteryState::Drawn);
        Arrival::Drew
    }

    /// Wait until the draw, bounded by `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.signal.subscribe();
        let drawn = tokio::time::timeout(timeout, rx.wait_for(|s| *s == LotteryState::Drawn))
            .await
            .map(|r| r.is_ok());
        match drawn {
            Ok(true) => Ok(()),
            // The sender lives in `self`, so a closed channel cannot happen.
            Ok(false) | Err(_) => Err(LotteryError::RendezvousTimeout),
        }
    }

    pub fn state(&self) -> LotteryState {
        *self.signal.borrow()
    }

    /// Cached winners for `agency`, once drawn.
    ///
    /// An agency with no registered bets gets an empty list.
    pub fn winners_for(&self, agency: u32) -> Option<Vec<u32>> {
        self.winners
            .get()
            .map(|all| all.get(&agency).cloned().unwrap_or_default())
    }

    /// Total winning documents across all agencies, once drawn.
    pub fn winner_count(&self) -> usize {
        self.winners
            .get()
            .map_or(0, |all| all.values().map(Vec::len).sum())
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Parties counted so far, capped at `expected`.
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire).min(self.expected)
    }

    /// How many times the draw ran. Never more than one.
    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn draw_one() -> HashMap<u32, Vec<u32>> {
        HashMap::from([(1, vec![100, 200])])
    }

    #[test]
    fn test_zero_parties_rejected() {
        assert!(LotteryBarrier::new(0).is_err());
    }

    #[test]
    fn test_last_party_draws() {
        let barrier = LotteryBarrier::new(2).unwrap();

        assert_eq!(barrier.arrive(draw_one), Arrival::Waiting { arrived: 1 });
        assert_eq!(barrier.state(), LotteryState::Pending);
        assert!(barrier.winners_for(1).is_none());

        assert_eq!(barrier.arrive(draw_one), Arrival::Drew);
        assert_eq!(barrier.state(), LotteryState::Drawn);
        assert_eq!(barrier.winners_for(1), Some(vec![100, 200]));
        assert_eq!(barrier.winners_for(9), Some(Vec::new()));

        assert_eq!(barrier.arrive(draw_one), Arrival::AlreadyDrawn);
        assert_eq!(barrier.draws(), 1);
        assert_eq!(barrier.arrived(), 2);
    }

    #[tokio::test]
    async fn test_waiters_released_together() {
        let barrier = Arc::new(LotteryBarrier::new(3).unwrap());

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            waiters.push(tokio::spawn(async move {
                barrier.arrive(draw_one);
                barrier.wait(Duration::from_secs(5)).await
            }));
        }
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(barrier.draws(), 1);
        assert_eq!(barrier.state(), LotteryState::Drawn);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let barrier = LotteryBarrier::new(2).unwrap();
        barrier.arrive(draw_one);

        let err = barrier.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LotteryError::RendezvousTimeout));
        assert_eq!(barrier.state(), LotteryState::Pending);
    }

    #[tokio::test]
    async fn test_wait_after_draw_returns_immediately() {
        let barrier = LotteryBarrier::new(1).unwrap();
        assert_eq!(barrier.arrive(draw_one), Arrival::Drew);
        barrier.wait(Duration::from_millis(1)).await.unwrap();
    }

    #[test]
    fn test_concurrent_arrivals_draw_once() {
        let barrier = Arc::new(LotteryBarrier::new(16).unwrap());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || barrier.arrive(draw_one))
            })
            .collect();

        let drew = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a == Arrival::Drew)
            .count();

        assert_eq!(drew, 1);
        assert_eq!(barrier.draws(), 1);
    }
}
