//! Single-writer work dispatch onto the owning thread.
//!
//! ```text
//! any thread ──submit_async / submit_sync──▶ DispatchQueue ──drain──▶ owning thread
//!                                   ▲                            │
//!                                   └──── completion (oneshot) ◀─┘
//! ```

mod queue;
mod task;
mod wake;

pub use queue::{DispatchQueue, DrainObserver, LogFailures};
pub use task::{Completion, TaskFailure, TaskHandle, Work};
pub use wake::{IdleSignal, Wakeup};

pub(crate) use task::run_guarded;
