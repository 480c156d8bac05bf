use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use thiserror::Error;
use tokio::sync::oneshot;

/// A zero-argument unit of work handed to the owning thread.
pub type Work = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// What a blocking submitter receives once its task has run.
pub type Completion = Result<(), TaskFailure>;

/// Failure captured while running a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("task returned an error: {0}")]
    Error(String),
    #[error("task panicked: {0}")]
    Panic(String),
}

impl TaskFailure {
    fn from_error(err: anyhow::Error) -> Self {
        Self::Error(format!("{err:#}"))
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            String::from("non-string panic payload")
        };
        Self::Panic(message)
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Error(message) | Self::Panic(message) => message,
        }
    }
}

/// Runs `work`, turning both returned errors and panics into a [`TaskFailure`].
pub(crate) fn run_guarded<T>(work: impl FnOnce() -> anyhow::Result<T>) -> Result<T, TaskFailure> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::from_error(err)),
        Err(payload) => Err(TaskFailure::from_panic(payload)),
    }
}

/// One queued unit of work together with its completion state.
///
/// Handles created by [`TaskHandle::blocking`] carry the submitting thread and
/// a oneshot responder; dropping such a handle without running it closes the
/// responder, which the waiter observes as a disposed device.
pub struct TaskHandle {
    work: Option<Work>,
    origin: Option<ThreadId>,
    responder: Option<oneshot::Sender<Completion>>,
    failure: Option<TaskFailure>,
    done: bool,
}

impl TaskHandle {
    /// Fire-and-forget handle.
    pub fn new(work: Work) -> Self {
        Self {
            work: Some(work),
            origin: None,
            responder: None,
            failure: None,
            done: false,
        }
    }

    /// Handle for a blocking submission from the current thread.
    pub fn blocking(work: Work) -> (Self, oneshot::Receiver<Completion>) {
        let (responder, receiver) = oneshot::channel();
        let handle = Self {
            work: Some(work),
            origin: Some(thread::current().id()),
            responder: Some(responder),
            failure: None,
            done: false,
        };
        (handle, receiver)
    }

    pub fn origin(&self) -> Option<ThreadId> {
        self.origin
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Whether a blocked submitter is waiting on this handle.
    pub fn has_waiter(&self) -> bool {
        self.responder
            .as_ref()
            .is_some_and(|responder| !responder.is_closed())
    }

    /// Runs the work at most once, records the outcome and wakes the waiter.
    pub fn run(&mut self) -> Completion {
        let Some(work) = self.work.take() else {
            return match &self.failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(()),
            };
        };

        let outcome = run_guarded(work);
        self.failure = outcome.as_ref().err().cloned();
        self.done = true;
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(outcome.clone());
        }
        outcome
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("origin", &self.origin)
            .field("done", &self.done)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn captures_returned_error() {
        let mut handle =
            TaskHandle::new(Box::new(|| -> anyhow::Result<()> { Err(anyhow!("boom")) }));
        let outcome = handle.run();
        assert!(handle.is_done());
        assert_eq!(outcome, Err(TaskFailure::Error("boom".into())));
        assert_eq!(handle.failure().map(TaskFailure::message), Some("boom"));
    }

    #[test]
    fn captures_panic_payload() {
        let mut handle =
            TaskHandle::new(Box::new(|| -> anyhow::Result<()> { panic!("exploded") }));
        let outcome = handle.run();
        assert_eq!(outcome, Err(TaskFailure::Panic("exploded".into())));
    }

    #[test]
    fn blocking_handle_reports_to_waiter() {
        let (mut handle, mut receiver) =
            TaskHandle::blocking(Box::new(|| -> anyhow::Result<()> { Ok(()) }));
        assert_eq!(handle.origin(), Some(thread::current().id()));
        assert!(handle.has_waiter());
        handle.run().expect("run");
        assert_eq!(receiver.try_recv().expect("completion"), Ok(()));
    }

    #[test]
    fn runs_work_only_once() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        let mut handle = TaskHandle::new(Box::new(move || -> anyhow::Result<()> {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }));
        handle.run().expect("first run");
        handle.run().expect("second run is a no-op");
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_handle_closes_waiter() {
        let (handle, receiver) =
            TaskHandle::blocking(Box::new(|| -> anyhow::Result<()> { Ok(()) }));
        drop(handle);
        assert!(receiver.blocking_recv().is_err());
    }
}
