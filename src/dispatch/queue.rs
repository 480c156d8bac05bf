use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::task::{run_guarded, TaskFailure, TaskHandle};
use super::wake::Wakeup;
use crate::error::BridgeError;

/// Hooks the owning thread supplies while draining.
pub trait DrainObserver {
    fn before_run(&mut self) {}

    fn after_run(&mut self) {}

    /// A task nobody is waiting on failed. The drain loop keeps going.
    fn on_async_failure(&mut self, failure: &TaskFailure) {
        error!(target = "dispatch", error = %failure, "asynchronous task failed");
    }
}

/// Observer that only logs asynchronous failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailures;

impl DrainObserver for LogFailures {}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<TaskHandle>,
    disposed: bool,
}

/// Ordered, unbounded queue of deferred work executed by one owning thread.
///
/// Producers on any thread append under a single mutex, so handles run in
/// enqueue order and per-thread submission order is preserved. Only the owning
/// thread drains, and it never holds the lock while running a handle.
pub struct DispatchQueue {
    owner: ThreadId,
    state: Mutex<QueueState>,
    sync_thread: Mutex<Option<ThreadId>>,
    waker: Arc<dyn Wakeup>,
}

impl DispatchQueue {
    /// Creates a queue owned by the calling thread.
    pub fn new(waker: Arc<dyn Wakeup>) -> Self {
        Self::with_owner(thread::current().id(), waker)
    }

    pub fn with_owner(owner: ThreadId, waker: Arc<dyn Wakeup>) -> Self {
        Self {
            owner,
            state: Mutex::new(QueueState::default()),
            sync_thread: Mutex::new(None),
            waker,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `work` and returns immediately.
    pub fn submit_async<F>(&self, work: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.add_last(TaskHandle::new(Box::new(work)))
    }

    /// Wakes the owning thread without queueing anything.
    pub fn wake(&self) {
        self.waker.wake();
    }

    /// Runs `work` on the owning thread and waits for it.
    ///
    /// On the owning thread the work runs inline. From any other thread the
    /// caller blocks until the owning thread has drained the handle; a failure
    /// is re-raised here as [`BridgeError::FailedExec`], and disposal while
    /// waiting surfaces as [`BridgeError::DeviceDisposed`].
    ///
    /// Must not be called from inside an async runtime context on a foreign
    /// thread, since it blocks that thread.
    pub fn submit_sync<F>(&self, work: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_disposed() {
            return Err(BridgeError::DeviceDisposed);
        }

        if self.is_owner_thread() {
            return run_guarded(work).map_err(BridgeError::FailedExec);
        }

        let (handle, completion) = TaskHandle::blocking(Box::new(work));
        self.add_last(handle)?;
        match completion.blocking_recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(BridgeError::FailedExec(failure)),
            Err(_) => Err(BridgeError::DeviceDisposed),
        }
    }

    /// [`submit_sync`](Self::submit_sync) for work that produces a value.
    pub fn sync_call<T, F>(&self, work: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let (sender, mut receiver) = oneshot::channel();
        self.submit_sync(move || {
            let value = work()?;
            let _ = sender.send(value);
            Ok(())
        })?;
        receiver
            .try_recv()
            .map_err(|_| BridgeError::DeviceDisposed)
    }

    fn add_last(&self, handle: TaskHandle) -> Result<(), BridgeError> {
        let wake = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(BridgeError::DeviceDisposed);
            }
            let wake = state.messages.is_empty();
            state.messages.push_back(handle);
            wake
        };
        if wake {
            self.waker.wake();
        }
        Ok(())
    }

    fn remove_first(&self) -> Option<TaskHandle> {
        self.lock_state().messages.pop_front()
    }

    /// Runs queued handles on the owning thread, one per call unless `all`.
    /// Returns whether anything ran.
    pub fn drain(&self, all: bool) -> bool {
        self.drain_with(all, &mut LogFailures)
    }

    pub fn drain_with(&self, all: bool, observer: &mut dyn DrainObserver) -> bool {
        if !self.is_owner_thread() {
            warn!(target = "dispatch", "drain requested off the owning thread");
            return false;
        }

        let mut ran = false;
        loop {
            let Some(mut handle) = self.remove_first() else {
                return ran;
            };
            ran = true;

            let waited = handle.has_waiter();
            self.set_sync_thread(handle.origin());
            observer.before_run();
            let outcome = handle.run();
            observer.after_run();
            self.set_sync_thread(None);

            if let Err(failure) = outcome {
                if waited {
                    debug!(target = "dispatch", error = %failure, "synchronous task failed");
                } else {
                    observer.on_async_failure(&failure);
                }
            }

            if !all {
                return ran;
            }
        }
    }

    fn set_sync_thread(&self, thread: Option<ThreadId>) {
        *self
            .sync_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = thread;
    }

    /// Thread whose blocking submission is being run right now, if any.
    pub fn sync_thread(&self) -> Option<ThreadId> {
        *self
            .sync_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves every pending handle to the front of `target`, keeping order.
    ///
    /// Both queues are locked for the whole move, so concurrent submissions
    /// land either entirely before or entirely after it.
    pub fn transfer_queue_to(&self, target: &DispatchQueue) -> Result<usize, BridgeError> {
        if std::ptr::eq(self, target) {
            return Ok(0);
        }

        let moved = {
            let (mut source, mut destination) = self.lock_pair(target);
            if destination.disposed {
                return Err(BridgeError::DeviceDisposed);
            }
            let moved = source.messages.len();
            if moved > 0 {
                let tail = std::mem::take(&mut destination.messages);
                destination.messages = std::mem::take(&mut source.messages);
                destination.messages.extend(tail);
            }
            moved
        };

        if moved > 0 {
            debug!(target = "dispatch", moved, "transferred pending tasks");
            target.waker.wake();
        }
        Ok(moved)
    }

    // Locks are always taken in address order.
    fn lock_pair<'a>(
        &'a self,
        other: &'a DispatchQueue,
    ) -> (MutexGuard<'a, QueueState>, MutexGuard<'a, QueueState>) {
        if (self as *const Self) < (other as *const Self) {
            let mine = self.lock_state();
            let theirs = other.lock_state();
            (mine, theirs)
        } else {
            let theirs = other.lock_state();
            let mine = self.lock_state();
            (mine, theirs)
        }
    }

    /// Marks the queue disposed and drops every unexecuted handle.
    ///
    /// Blocked [`submit_sync`](Self::submit_sync) callers observe their
    /// handle being dropped and return [`BridgeError::DeviceDisposed`].
    pub fn dispose(&self) {
        let abandoned = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.messages)
        };

        if !abandoned.is_empty() {
            debug!(
                target = "dispatch",
                pending = abandoned.len(),
                "dropping unexecuted tasks"
            );
        }
        drop(abandoned);
        self.waker.wake();
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    pub fn len(&self) -> usize {
        self.lock_state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().messages.is_empty()
    }
}
