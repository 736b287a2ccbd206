//! One-shot readiness promise.
//!
//! Stands in for a process-wide "current connection" value: whoever sets up a
//! link resolves the sender once, and any number of receivers wait for it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{PeerError, Result};

enum Outcome<T> {
    Pending,
    Ready(T),
    Failed(String),
    Abandoned,
}

struct Cell<T> {
    outcome: Mutex<Outcome<T>>,
    cond: Condvar,
}

impl<T> Cell<T> {
    fn lock(&self) -> MutexGuard<'_, Outcome<T>> {
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, outcome: Outcome<T>) {
        let mut current = self.lock();
        if matches!(*current, Outcome::Pending) {
            *current = outcome;
            drop(current);
            self.cond.notify_all();
        }
    }
}

/// Create a linked sender/receiver pair.
pub fn channel<T: Clone>() -> (ReadySender<T>, ReadyReceiver<T>) {
    let cell = Arc::new(Cell {
        outcome: Mutex::new(Outcome::Pending),
        cond: Condvar::new(),
    });
    (
        ReadySender {
            cell: Some(Arc::clone(&cell)),
        },
        ReadyReceiver { cell },
    )
}

/// Resolves the promise exactly once. Dropping it unresolved makes every
/// waiter see [`PeerError::Closed`].
pub struct ReadySender<T> {
    cell: Option<Arc<Cell<T>>>,
}

impl<T> ReadySender<T> {
    pub fn resolve(mut self, result: Result<T>) {
        if let Some(cell) = self.cell.take() {
            cell.settle(match result {
                Ok(value) => Outcome::Ready(value),
                Err(err) => Outcome::Failed(err.to_string()),
            });
        }
    }
}

impl<T> Drop for ReadySender<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.settle(Outcome::Abandoned);
        }
    }
}

impl<T> std::fmt::Debug for ReadySender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySender").finish_non_exhaustive()
    }
}

/// Waits for the promise. Cloneable; every clone sees the same outcome.
pub struct ReadyReceiver<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for ReadyReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> ReadyReceiver<T> {
    /// Block until resolved.
    pub fn wait(&self) -> Result<T> {
        let mut outcome = self.cell.lock();
        while matches!(*outcome, Outcome::Pending) {
            outcome = self
                .cell
                .cond
                .wait(outcome)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Self::read(&outcome)
    }

    /// Block until resolved or `timeout` passes ([`PeerError::Timeout`]).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.cell.lock();
        while matches!(*outcome, Outcome::Pending) {
            let now = Instant::now();
            if now >= deadline {
                return Err(PeerError::Timeout(timeout));
            }
            outcome = self
                .cell
                .cond
                .wait_timeout(outcome, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        Self::read(&outcome)
    }

    /// `None` while unresolved.
    pub fn try_get(&self) -> Option<Result<T>> {
        let outcome = self.cell.lock();
        match *outcome {
            Outcome::Pending => None,
            _ => Some(Self::read(&outcome)),
        }
    }

    fn read(outcome: &Outcome<T>) -> Result<T> {
        match outcome {
            Outcome::Ready(value) => Ok(value.clone()),
            Outcome::Failed(reason) => Err(PeerError::NotReady(reason.clone())),
            Outcome::Abandoned | Outcome::Pending => Err(PeerError::Closed),
        }
    }
}

impl<T> std::fmt::Debug for ReadyReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.cell.lock() {
            Outcome::Pending => "pending",
            Outcome::Ready(_) => "ready",
            Outcome::Failed(_) => "failed",
            Outcome::Abandoned => "abandoned",
        };
        f.debug_struct("ReadyReceiver").field("state", &state).finish()
    }
}
