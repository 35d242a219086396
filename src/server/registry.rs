//! Per-agency bet storage and notification tracking.
//!
//! One mutex guards every agency's record. Critical sections only append,
//! flip a flag or copy out results; callers never hold the lock across I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::bet::Bet;
use crate::error::{LotteryError, Result};

#[derive(Debug, Default)]
struct AgencyRecord {
    bets: Vec<Bet>,
    notified: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    agencies: HashMap<u32, AgencyRecord>,
    closed: bool,
}

/// Shared bet registry for all connection handlers.
#[derive(Debug, Default)]
pub struct AgencyRegistry {
    state: Mutex<RegistryState>,
}

impl AgencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // State stays consistent across a panicking holder: every mutation
        // is a single push or assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `bets`, each under its own agency.
    ///
    /// All or nothing: fails with `LotteryClosed` once the draw has run.
    pub fn register(&self, bets: Vec<Bet>) -> Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(LotteryError::LotteryClosed);
        }

        let count = bets.len();
        for bet in bets {
            state
                .agencies
                .entry(bet.agency())
                .or_default()
                .bets
                .push(bet);
        }
        Ok(count)
    }

    /// Mark `agency` notified. True only on the first call for that agency.
    pub fn mark_notified(&self, agency: u32) -> bool {
        let mut state = self.lock();
        let record = state.agencies.entry(agency).or_default();
        !std::mem::replace(&mut record.notified, true)
    }

    pub fn is_notified(&self, agency: u32) -> bool {
        self.lock()
            .agencies
            .get(&agency)
            .map_or(false, |record| record.notified)
    }

    pub fn bet_count(&self, agency: u32) -> usize {
        self.lock()
            .agencies
            .get(&agency)
            .map_or(0, |record| record.bets.len())
    }

    /// Close registration and collect winning documents per agency.
    ///
    /// Every known agency gets an entry, possibly empty. Documents keep
    /// their registration order.
    pub fn close_and_draw(&self, has_won: impl Fn(&Bet) -> bool) -> HashMap<u32, Vec<u32>> {
        let mut state = self.lock();
        state.closed = true;
        state
            .agencies
            .iter()
            .map(|(agency, record)| {
                let winners = record
                    .bets
                    .iter()
                    .filter(|bet| has_won(bet))
                    .map(Bet::document)
                    .collect();
                (*agency, winners)
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
