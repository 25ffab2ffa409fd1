//! Lock-guarded holding areas between pipeline stages.
//!
//! A `Registry` is a FIFO protected by its own mutex plus a `Notify`
//! that signals "registry non-empty". Producers `publish`; a single
//! consumer loops on `wait_non_empty` and drains with `pop`.
//!
//! `Notify::notify_one` stores a permit when nobody is waiting, so a
//! publish that lands between a drain and the next wait is never lost.
//! Callers still re-check emptiness in a loop.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::connection::Connection;

/// Newly accepted connections awaiting a reader task.
pub type ConnectionRegistry = Registry<Connection>;

/// Connections flagged for shutdown, awaiting the closer.
pub type ClosureRegistry = Registry<Connection>;

#[derive(Debug)]
pub struct Registry<T> {
    items: Mutex<VecDeque<T>>,
    non_empty: Notify,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            non_empty: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends an item and signals "non-empty".
    pub fn publish(&self, item: T) {
        self.lock().push_back(item);
        self.non_empty.notify_one();
    }

    /// Removes the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Takes every item currently held, oldest first.
    pub fn take_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Suspends the caller until at least one item is held.
    ///
    /// Returns immediately when the registry is already non-empty.
    pub async fn wait_non_empty(&self) {
        loop {
            let notified = self.non_empty.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
