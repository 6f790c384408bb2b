use crate::shutdown::Shutdown;
use crate::types::Sample;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How long a blocked consumer waits before re-checking the shutdown signal.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Latest-value mailbox between one producer and one consumer thread.
///
/// `publish` overwrites whatever is pending. A consumer that falls behind
/// sees only the newest value; anything published in between is dropped.
/// Share it between threads with `Arc`.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    fresh: bool,
    closed: bool,
    published: u64,
    dropped: u64,
}

/// The sampler → transport handoff.
pub type SampleChannel = LatestSlot<Sample>;

impl<T: Clone> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                fresh: false,
                closed: false,
                published: 0,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the slot and wake one waiting consumer.
    pub fn publish(&self, value: T) {
        let mut state = self.lock();
        if state.fresh {
            state.dropped += 1;
        }
        state.value = Some(value);
        state.fresh = true;
        state.published += 1;
        drop(state);
        self.ready.notify_one();
    }

    /// Take the pending value without waiting.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.lock();
        Self::take_fresh(&mut state)
    }

    /// Wait up to `timeout` for a fresh value.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(v) = Self::take_fresh(&mut state) {
                return Some(v);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until a fresh value arrives.
    ///
    /// Returns `None` once the slot is closed or `shutdown` fires; the wait
    /// re-checks the signal at least every 100 ms.
    pub fn take_blocking(&self, shutdown: &Shutdown) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(v) = Self::take_fresh(&mut state) {
                return Some(v);
            }
            if state.closed || shutdown.is_triggered() {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn take_fresh(state: &mut SlotState<T>) -> Option<T> {
        if !state.fresh {
            return None;
        }
        state.fresh = false;
        state.value.clone()
    }

    /// Wake every waiter; subsequent waits return immediately.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Total number of `publish` calls.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Values overwritten before any consumer saw them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl<T: Clone> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
