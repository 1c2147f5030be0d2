//! Cancellable deadline timers.
//!
//! Conversations and the request/response protocol never sleep themselves.
//! They ask an injected [`Scheduler`] to run a callback after a delay and keep
//! the returned [`TimerHandle`]; dropping or cancelling the handle disarms the
//! timer. [`TokioScheduler`] runs on real time, [`ManualScheduler`] on a
//! virtual clock that tests advance explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Work run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a callback once after a delay.
pub trait Scheduler: Send + Sync {
    /// Arm a timer. The callback runs once unless the handle is disarmed first.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Armed timer. Disarms on [`TimerHandle::cancel`] or drop.
pub struct TimerHandle {
    disarm: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Wrap a disarm action.
    pub fn new(disarm: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disarm: Some(Box::new(disarm)),
        }
    }

    /// Disarm the timer. A no-op if it already fired.
    pub fn cancel(mut self) {
        self.disarm_now();
    }

    fn disarm_now(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            disarm();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.disarm_now();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.disarm.is_some())
            .finish()
    }
}

/// Real-time scheduler backed by spawned `tokio::time::sleep` tasks.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Scheduler on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Scheduler on the current runtime, if there is one.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| Self { handle })
    }

    /// Scheduler on an explicit runtime handle.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        let abort = task.abort_handle();
        TimerHandle::new(move || abort.abort())
    }
}

impl Default for TokioScheduler {
    /// Same as [`TokioScheduler::new`].
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual-clock scheduler. Time only moves on [`ManualScheduler::advance`].
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualClock>>,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    timers: BTreeMap<(Duration, u64), TimerCallback>,
}

impl ManualScheduler {
    /// Clock at zero with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timers
            .len()
    }

    /// Move the clock forward, firing every timer that falls due in deadline
    /// order. Timers armed by a callback fire too if they fall inside the window.
    pub fn advance(&self, by: Duration) {
        let target = self.now().saturating_add(by);
        loop {
            let due = {
                let mut clock = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                match clock.timers.keys().next().copied() {
                    Some(key) if key.0 <= target => {
                        clock.now = key.0;
                        clock.timers.remove(&key)
                    }
                    _ => None,
                }
            };
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
        let mut clock = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if clock.now < target {
            clock.now = target;
        }
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let key = {
            let mut clock = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let key = (clock.now.saturating_add(delay), clock.next_seq);
            clock.next_seq += 1;
            clock.timers.insert(key, callback);
            key
        };
        let clock = Arc::downgrade(&self.inner);
        TimerHandle::new(move || {
            if let Some(clock) = clock.upgrade() {
                // Dropped outside the lock; the callback may own disarm handles.
                let removed = clock
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .timers
                    .remove(&key);
                drop(removed);
            }
        })
    }
}
