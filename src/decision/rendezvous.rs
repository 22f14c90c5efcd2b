use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::ActionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Handed to a waiter that was already parked.
    Delivered,
    /// Stored until someone awaits the id.
    Buffered,
    /// Duplicate or late result; dropped.
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("waiter for action {id} was abandoned")]
    Abandoned { id: String },
}

#[derive(Debug)]
enum Slot {
    /// Issued, nobody waiting and no result yet.
    Open,
    Waiting(oneshot::Sender<ActionResult>),
    Ready(ActionResult),
}

#[derive(Debug, Default)]
struct RendezvousState {
    slots: HashMap<String, Slot>,
    /// Numeric ids below this mark that have no slot are settled.
    issued_below: u64,
}

impl RendezvousState {
    fn is_settled(&self, id: &str) -> bool {
        !self.slots.contains_key(id) && numeric_id(id).is_some_and(|n| n < self.issued_below)
    }

    fn mark_issued(&mut self, id: &str) {
        if let Some(n) = numeric_id(id) {
            self.issued_below = self.issued_below.max(n.saturating_add(1));
        }
    }
}

/// Only canonical decimal ids take part in the high-water mark.
fn numeric_id(id: &str) -> Option<u64> {
    id.parse::<u64>().ok().filter(|n| n.to_string() == id)
}

enum Wait {
    Settled,
    Ready(ActionResult),
    Parked(oneshot::Receiver<ActionResult>),
}

/// Pairs each dispatched action id with the first result the game reports for it,
/// regardless of which side shows up first.
///
/// Ids are expected to be issued in increasing numeric order. Once a numeric id
/// has been issued and its slot is gone, it counts as settled, so no per-id
/// history is kept.
#[derive(Debug, Default)]
pub struct ResultRendezvous {
    state: Mutex<RendezvousState>,
}

impl ResultRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for a freshly issued id before the action goes out.
    pub fn open(&self, id: &str) {
        let mut state = self.lock_state();
        state.mark_issued(id);
        state.slots.entry(id.to_string()).or_insert(Slot::Open);
    }

    pub fn record_result(&self, result: ActionResult) -> RecordOutcome {
        let mut state = self.lock_state();
        if state.is_settled(&result.id) {
            return RecordOutcome::Ignored;
        }

        match state.slots.remove(&result.id) {
            Some(Slot::Waiting(sender)) => match sender.send(result) {
                Ok(()) => RecordOutcome::Delivered,
                Err(_) => RecordOutcome::Ignored,
            },
            Some(Slot::Ready(buffered)) => {
                state
                    .slots
                    .insert(buffered.id.clone(), Slot::Ready(buffered));
                RecordOutcome::Ignored
            }
            Some(Slot::Open) | None => {
                state.slots.insert(result.id.clone(), Slot::Ready(result));
                RecordOutcome::Buffered
            }
        }
    }

    /// Resolves with the first result recorded for `id`.
    ///
    /// An id that was already consumed never resolves again.
    pub async fn await_result(&self, id: &str) -> Result<ActionResult, RendezvousError> {
        let wait = {
            let mut state = self.lock_state();
            if state.is_settled(id) {
                Wait::Settled
            } else {
                state.mark_issued(id);
                match state.slots.remove(id) {
                    Some(Slot::Ready(result)) => Wait::Ready(result),
                    _ => {
                        let (sender, receiver) = oneshot::channel();
                        state.slots.insert(id.to_string(), Slot::Waiting(sender));
                        Wait::Parked(receiver)
                    }
                }
            }
        };

        match wait {
            Wait::Settled => std::future::pending().await,
            Wait::Ready(result) => Ok(result),
            Wait::Parked(receiver) => receiver.await.map_err(|_| RendezvousError::Abandoned {
                id: id.to_string(),
            }),
        }
    }

    /// Gives up on `id`: any parked waiter fails and later results are ignored.
    pub fn abandon(&self, id: &str) -> bool {
        let mut state = self.lock_state();
        state.mark_issued(id);
        state.slots.remove(id).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().slots.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, RendezvousState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
