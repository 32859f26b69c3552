//! Bookkeeping for background reloads of linked smart-object content.
//!
//! Every reload of a smart object bumps that object's generation. Jobs carry
//! the generation they were started with and report back over a channel;
//! the owner thread drops any outcome whose generation is no longer the
//! latest, so only the most recent reload of an object ever lands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::entities::ids::LayerId;
use crate::entities::project_io::CompDesc;

/// Handle of a started reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket {
    pub layer: LayerId,
    pub generation: u64,
}

#[derive(Debug)]
pub enum ReloadResult {
    Loaded(CompDesc),
    Failed(anyhow::Error),
    /// Superseded before the job started; nothing was read.
    Skipped,
}

/// What a reload job sends back.
#[derive(Debug)]
pub struct ReloadOutcome {
    pub layer: LayerId,
    pub generation: u64,
    pub path: PathBuf,
    pub result: ReloadResult,
}

#[derive(Debug)]
pub struct ReloadTracker {
    generations: HashMap<LayerId, Arc<AtomicU64>>,
    tx: Sender<ReloadOutcome>,
    rx: Receiver<ReloadOutcome>,
    in_flight: usize,
}

impl Default for ReloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadTracker {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { generations: HashMap::new(), tx, rx, in_flight: 0 }
    }

    /// Start a reload of `layer`. Returns its generation and the shared
    /// counter a job can poll to notice it was superseded.
    pub fn begin(&mut self, layer: LayerId) -> (u64, Arc<AtomicU64>) {
        let counter = self.generations.entry(layer).or_insert_with(|| Arc::new(AtomicU64::new(0)));
        let generation = counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.in_flight += 1;
        (generation, Arc::clone(counter))
    }

    pub fn is_current(&self, layer: LayerId, generation: u64) -> bool {
        self.generations.get(&layer).is_some_and(|g| g.load(Ordering::Acquire) == generation)
    }

    pub fn sender(&self) -> Sender<ReloadOutcome> {
        self.tx.clone()
    }

    pub fn try_recv(&mut self) -> Option<ReloadOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ReloadOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Reloads started but not yet received.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(layer: LayerId, generation: u64) -> ReloadOutcome {
        ReloadOutcome { layer, generation, path: PathBuf::from("x.json"), result: ReloadResult::Skipped }
    }

    #[test]
    fn test_later_begin_supersedes() {
        let mut t = ReloadTracker::new();
        let layer = LayerId::new();
        let (g1, counter) = t.begin(layer);
        let (g2, _) = t.begin(layer);
        assert!(g2 > g1);
        assert!(!t.is_current(layer, g1));
        assert!(t.is_current(layer, g2));
        assert_eq!(counter.load(Ordering::Acquire), g2);
        assert!(!t.is_current(LayerId::new(), g2));
    }

    #[test]
    fn test_in_flight_counts_received_outcomes() {
        let mut t = ReloadTracker::new();
        let layer = LayerId::new();
        let (g, _) = t.begin(layer);
        assert_eq!(t.in_flight(), 1);
        assert!(t.try_recv().is_none());

        let tx = t.sender();
        std::thread::spawn(move || {
            let _ = tx.send(outcome(layer, g));
        });
        let got = t.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.generation, g);
        assert_eq!(t.in_flight(), 0);
        assert!(t.recv_timeout(Duration::from_millis(1)).is_none());
    }
}
