//! Rate-limited, delaying, de-duplicating work queue
//!
//! Semantics:
//! - an item is pending at most once, however often it is added
//! - an item handed out by [`WorkQueue::get`] is not handed out again until
//!   [`WorkQueue::done`]; adds in the meantime are replayed on `done`
//! - delayed adds keep the earliest requested time
//! - failures back off exponentially per item until [`WorkQueue::forget`]

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Unit of work for the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkItem {
    /// Periodic full repair of the allocation record
    RepairTick,
    /// Ensure the named namespace is allocated
    Namespace(String),
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::RepairTick => f.write_str("__internal/periodicRepair"),
            WorkItem::Namespace(name) => f.write_str(name),
        }
    }
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    failures: HashMap<WorkItem, u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        ExponentialBackoff {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before the next retry of `item`; counts as one more failure
    pub fn when(&mut self, item: &WorkItem) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);

        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn forget(&mut self, item: &WorkItem) {
        self.failures.remove(item);
    }

    pub fn num_requeues(&self, item: &WorkItem) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<WorkItem>,
    dirty: HashSet<WorkItem>,
    processing: HashSet<WorkItem>,
    /// Delayed items by (ready time, insertion sequence)
    waiting: BTreeMap<(Instant, u64), WorkItem>,
    waiting_index: HashMap<WorkItem, (Instant, u64)>,
    sequence: u64,
    shutting_down: bool,
}

impl State {
    fn add(&mut self, item: WorkItem) -> bool {
        if self.shutting_down || self.dirty.contains(&item) {
            return false;
        }
        self.dirty.insert(item.clone());
        if self.processing.contains(&item) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    /// Move every delayed item whose time has come into the queue
    fn promote_ready(&mut self, now: Instant) {
        while self.next_ready_at().map_or(false, |at| at <= now) {
            if let Some((_, item)) = self.waiting.pop_first() {
                self.waiting_index.remove(&item);
                self.add(item);
            }
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.waiting.first_key_value().map(|(k, _)| k.0)
    }
}

/// Blocking multi-producer work queue
pub struct WorkQueue {
    state: Mutex<State>,
    cond: Condvar,
    backoff: Mutex<ExponentialBackoff>,
}

impl WorkQueue {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        WorkQueue {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            backoff: Mutex::new(backoff),
        }
    }

    /// Mark `item` as needing processing
    pub fn add(&self, item: WorkItem) {
        let mut state = self.state.lock();
        if state.add(item) {
            self.cond.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(&self, item: WorkItem, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let ready_at = Instant::now() + delay;
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }

        if let Some(&existing) = state.waiting_index.get(&item) {
            if existing.0 <= ready_at {
                return;
            }
            state.waiting.remove(&existing);
        }

        let key = (ready_at, state.sequence);
        state.sequence += 1;
        state.waiting.insert(key, item.clone());
        state.waiting_index.insert(item, key);

        // Wake the consumer so it recomputes its deadline
        self.cond.notify_one();
    }

    /// Re-add `item` after its backoff delay
    pub fn add_rate_limited(&self, item: WorkItem) {
        let delay = self.backoff.lock().when(&item);
        self.add_after(item, delay);
    }

    /// Reset the backoff of `item`
    pub fn forget(&self, item: &WorkItem) {
        self.backoff.lock().forget(item);
    }

    pub fn num_requeues(&self, item: &WorkItem) -> u32 {
        self.backoff.lock().num_requeues(item)
    }

    /// Block until an item is ready; `None` once shut down
    ///
    /// Items still queued at shutdown are not handed out.
    pub fn get(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if state.shutting_down {
                return None;
            }
            state.promote_ready(Instant::now());

            if let Some(item) = state.queue.pop_front() {
                state.dirty.remove(&item);
                state.processing.insert(item.clone());
                return Some(item);
            }

            match state.next_ready_at() {
                Some(deadline) => {
                    self.cond.wait_until(&mut state, deadline);
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    /// Finish processing `item`; replays adds that arrived meanwhile
    pub fn done(&self, item: &WorkItem) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.cond.notify_one();
        }
    }

    /// Stop handing out items and wake every waiter
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        self.cond.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Items ready to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items waiting for their delay to elapse
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Whether `item` is scheduled for later
    pub fn is_waiting(&self, item: &WorkItem) -> bool {
        self.state.lock().waiting_index.contains_key(item)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        WorkQueue::new(ExponentialBackoff::default())
    }
}
