//! Action queue
//!
//! Unbounded multi-producer/multi-consumer FIFO. Producers push every action
//! and then [`close`](ActionQueue::close) the queue; consumers block in
//! [`pop`](ActionQueue::pop) only while the queue is open and empty, and get
//! `None` once it is closed and drained. Not-ready actions go back to the tail
//! through [`requeue`](ActionQueue::requeue), which is allowed after close.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::action::Action;

/// An action plus the bookkeeping the worker loop needs for requeues
pub struct QueuedAction {
    pub action: Box<dyn Action>,
    /// When the action was first found not ready
    pub deferred_since: Option<Instant>,
}

struct QueueState {
    items: VecDeque<QueuedAction>,
    closed: bool,
}

/// Shared queue of pending actions
pub struct ActionQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new action at the tail
    pub fn push(&self, action: Box<dyn Action>) {
        self.requeue(QueuedAction {
            action,
            deferred_since: None,
        });
    }

    /// Return an action to the tail of the queue
    pub fn requeue(&self, item: QueuedAction) {
        self.lock().items.push_back(item);
        self.condvar.notify_one();
    }

    /// Signal that no new actions will be produced
    pub fn close(&self) {
        self.lock().closed = true;
        self.condvar.notify_all();
    }

    /// Take the action at the head of the queue.
    ///
    /// Blocks while the queue is open and empty. Returns `None` once the
    /// queue is closed and empty.
    pub fn pop(&self) -> Option<QueuedAction> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Number of actions waiting in the queue
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending action (run aborted). Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }
}
