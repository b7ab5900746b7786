//! Single-flight coordination of token refreshes.
//!
//! The coordinator owns one slot that is either idle or running a refresh.
//! The first request to hit an expired token takes the slot and becomes the
//! leader; everyone arriving while it runs is queued as a waiter. When the
//! leader settles, every waiter receives the same outcome in the order it
//! queued, and the slot returns to idle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::ApiError;

pub type RefreshOutcome = Result<String, ApiError>;

#[derive(Debug)]
enum Slot {
    Idle,
    Running {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

#[derive(Debug)]
pub struct RefreshCoordinator {
    slot: Mutex<Slot>,
}

/// What a caller got from [`RefreshCoordinator::acquire`].
pub enum Ticket<'a> {
    /// The caller must perform the refresh and settle the guard.
    Leader(RefreshGuard<'a>),
    /// A refresh is already running; await its outcome.
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Take the slot if it is idle, otherwise join the queue.
    pub fn acquire(&self) -> Ticket<'_> {
        let mut slot = self.lock();

        if let Slot::Running { waiters } = &mut *slot {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            debug!(queued = waiters.len(), "Refresh in flight, request queued");
            return Ticket::Waiter(rx);
        }

        *slot = Slot::Running {
            waiters: Vec::new(),
        };
        Ticket::Leader(RefreshGuard {
            coordinator: self,
            settled: false,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), Slot::Running { .. })
    }

    /// Number of requests waiting on the running refresh
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            Slot::Running { waiters } => waiters.len(),
            Slot::Idle => 0,
        }
    }

    fn release(&self, outcome: RefreshOutcome) -> usize {
        let waiters = match std::mem::replace(&mut *self.lock(), Slot::Idle) {
            Slot::Running { waiters } => waiters,
            Slot::Idle => Vec::new(),
        };

        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver means that request was cancelled; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by the leader while its refresh runs. Settling (or dropping) it
/// releases the slot exactly once.
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard<'_> {
    /// Hand the outcome to every queued waiter and free the slot.
    /// Returns how many waiters were released.
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.release(outcome)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released = self.coordinator.release(Err(ApiError::refresh_abandoned()));
            debug!(released, "Refresh abandoned, waiters failed");
        }
    }
}
