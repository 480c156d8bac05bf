use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Signals the owning thread that new work is available.
pub trait Wakeup: Send + Sync {
    fn wake(&self);
}

/// Idle/wake primitive for an owning thread that has no platform event loop.
///
/// A wake that arrives while nobody is waiting is remembered, so the next
/// [`IdleSignal::wait`] returns immediately.
#[derive(Debug, Default)]
pub struct IdleSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl IdleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until woken or `timeout` elapses. Returns `true` when woken.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cond
            .wait_timeout_while(pending, timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *pending, false)
    }
}

impl Wakeup for IdleSignal {
    fn wake(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }
}
