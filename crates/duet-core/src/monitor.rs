//! Whole-system stall detection for linked processors.
//!
//! No processor can see its partner's state, so every processor reports its
//! transitions here. The monitor keeps, per processor, what it is doing and how
//! many values addressed to it have been sent but not yet received. The run is
//! stalled when every processor is either halted or blocked on an inbox with
//! nothing pending. At that point nothing can ever make progress again, so
//! the monitor cancels the run's token and every blocked receive returns.
//!
//! # Invariants
//!
//! - `pending` is incremented before a value is enqueued and decremented only
//!   after it is dequeued, so a value in flight always keeps its receiver live.
//! - All reads and writes of the table happen under one lock, so the stall
//!   check sees a consistent picture of every processor at once.
//! - Once stalled, always stalled.

use crate::cancel::CancellationToken;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Index of a processor within a run.
pub type ProcessorId = usize;

/// What a processor is doing, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Running,
    Blocked,
    Halted,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    activity: Activity,
    pending: usize,
}

impl Slot {
    fn is_stuck(&self) -> bool {
        match self.activity {
            Activity::Running => false,
            Activity::Blocked => self.pending == 0,
            Activity::Halted => true,
        }
    }
}

#[derive(Debug)]
struct Table {
    slots: Vec<Slot>,
    stalled: bool,
}

/// Shared stall detector for one run.
#[derive(Debug)]
pub struct DeadlockMonitor {
    table: Mutex<Table>,
    token: CancellationToken,
}

impl DeadlockMonitor {
    /// Create a monitor for `processors` processors, all initially running.
    /// `token` is cancelled when a stall is detected.
    pub fn new(processors: usize, token: CancellationToken) -> Self {
        let slot = Slot {
            activity: Activity::Running,
            pending: 0,
        };
        Self {
            table: Mutex::new(Table {
                slots: vec![slot; processors],
                stalled: false,
            }),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn processors(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a value about to be enqueued for `to`.
    pub fn note_sent(&self, to: ProcessorId) {
        let mut table = self.lock();
        if let Some(slot) = table.slots.get_mut(to) {
            slot.pending += 1;
        }
    }

    /// Record that `id` dequeued a value and is running again.
    pub fn note_received(&self, id: ProcessorId) {
        let mut table = self.lock();
        if let Some(slot) = table.slots.get_mut(id) {
            slot.pending = slot.pending.saturating_sub(1);
            slot.activity = Activity::Running;
        }
    }

    /// Record that `id` is about to wait on an empty inbox.
    ///
    /// Returns true when this transition stalled the run.
    pub fn block(&self, id: ProcessorId) -> bool {
        self.transition(id, Activity::Blocked)
    }

    /// Record that `id` stopped for good.
    ///
    /// Returns true when this transition stalled the run.
    pub fn halt(&self, id: ProcessorId) -> bool {
        self.transition(id, Activity::Halted)
    }

    fn transition(&self, id: ProcessorId, activity: Activity) -> bool {
        let detected = {
            let mut table = self.lock();
            if let Some(slot) = table.slots.get_mut(id) {
                if slot.activity != Activity::Halted {
                    slot.activity = activity;
                }
            }
            debug!("Processor {} is now {:?}", id, activity);
            Self::evaluate(&mut table)
        };

        if detected {
            info!("All processors are blocked or halted; stopping the run");
            self.token.cancel();
        }
        detected
    }

    /// Mark the table stalled if nothing can make progress and at least one
    /// processor is still waiting. A run where everyone halted is simply done.
    fn evaluate(table: &mut Table) -> bool {
        if table.stalled {
            return false;
        }
        let all_stuck = table.slots.iter().all(Slot::is_stuck);
        let any_blocked = table
            .slots
            .iter()
            .any(|slot| slot.activity == Activity::Blocked);
        if all_stuck && any_blocked {
            table.stalled = true;
            return true;
        }
        false
    }

    /// True once a stall was detected.
    pub fn is_stalled(&self) -> bool {
        self.lock().stalled
    }

    pub fn activity(&self, id: ProcessorId) -> Option<Activity> {
        self.lock().slots.get(id).map(|slot| slot.activity)
    }

    /// Values sent to `id` that it has not yet received.
    pub fn pending(&self, id: ProcessorId) -> Option<usize> {
        self.lock().slots.get(id).map(|slot| slot.pending)
    }
}
