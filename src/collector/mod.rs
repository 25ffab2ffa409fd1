/// Collector module
///
/// This module owns the aggregation state of the service:
/// - The all-time set of unique user ids
/// - One live set per configured rolling window
///
/// All state lives behind a single mutex. `process`, `rollover`
/// and `snapshot` share that critical section, so a snapshot always
/// observes a prefix of `process` calls and a prefix of rollovers,
/// never a partial update of either.
///
/// The lock is never held across an `.await`.
///
/// The background rollover loop lives in `runner`.
pub mod runner;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// One rolling window.
///
/// `live` collects ids seen since the last rollover. `last_exported`
/// is the gauge value visible to exporters and reflects the state as
/// of the previous rollover.
#[derive(Debug)]
struct TimeWindow {
    seconds: u64,
    live: HashSet<String>,
    last_exported: u64,
    next_deadline: Instant,
}

impl TimeWindow {
    fn new(seconds: u64, start: Instant) -> Self {
        Self {
            seconds,
            live: HashSet::new(),
            last_exported: 0,
            next_deadline: start + Duration::from_secs(seconds),
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_deadline <= now
    }

    fn roll(&mut self) {
        self.last_exported = self.live.len() as u64;
        self.live.clear();
        self.next_deadline += Duration::from_secs(self.seconds);
    }
}

#[derive(Debug)]
struct CollectorState {
    unique: HashSet<String>,
    // sorted by duration, durations unique
    windows: Vec<TimeWindow>,
}

/// Immutable view of the collector at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSnapshot {
    /// Number of distinct ids ever processed
    pub unique_count: u64,

    /// Window duration (seconds) -> distinct ids in the last completed window
    pub active_by_window: BTreeMap<u64, u64>,
}

/// Lock-protected owner of the unique set and all windows.
#[derive(Debug)]
pub struct Collector {
    state: Mutex<CollectorState>,
}

impl Collector {
    /// Creates a collector whose windows start now.
    pub fn new(windows: &[u64]) -> Self {
        Self::starting_at(windows, Instant::now())
    }

    /// Creates a collector whose first deadlines are `start + w`.
    ///
    /// Duplicate durations collapse into a single window.
    pub fn starting_at(windows: &[u64], start: Instant) -> Self {
        let mut seconds = windows.to_vec();
        seconds.sort_unstable();
        seconds.dedup();

        let windows = seconds
            .into_iter()
            .map(|w| TimeWindow::new(w, start))
            .collect();

        Self {
            state: Mutex::new(CollectorState {
                unique: HashSet::new(),
                windows,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Configured window durations, ascending.
    pub fn window_durations(&self) -> Vec<u64> {
        self.lock().windows.iter().map(|w| w.seconds).collect()
    }

    /// Records one id in the unique set and in every live window.
    pub fn process(&self, id: &str) {
        let mut state = self.lock();

        if !state.unique.contains(id) {
            state.unique.insert(id.to_owned());
        }
        for window in state.windows.iter_mut() {
            if !window.live.contains(id) {
                window.live.insert(id.to_owned());
            }
        }
    }

    /// Rolls over every window whose deadline has passed.
    pub fn rollover(&self) -> usize {
        self.rollover_at(Instant::now())
    }

    /// Rolls over every window whose deadline is at or before `now`.
    ///
    /// Windows that are not yet due are left untouched. Returns the
    /// number of windows rolled.
    pub fn rollover_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let mut rolled = 0;

        for window in state.windows.iter_mut().filter(|w| w.is_due(now)) {
            window.roll();
            log::debug!(
                "rolled window {}s: active={}",
                window.seconds,
                window.last_exported
            );
            rolled += 1;
        }

        rolled
    }

    /// Consistent view of the unique count and every window gauge.
    pub fn snapshot(&self) -> CollectorSnapshot {
        let state = self.lock();

        CollectorSnapshot {
            unique_count: state.unique.len() as u64,
            active_by_window: state
                .windows
                .iter()
                .map(|w| (w.seconds, w.last_exported))
                .collect(),
        }
    }

    #[cfg(test)]
    fn live_len(&self, seconds: u64) -> Option<usize> {
        self.lock()
            .windows
            .iter()
            .find(|w| w.seconds == seconds)
            .map(|w| w.live.len())
    }
}
