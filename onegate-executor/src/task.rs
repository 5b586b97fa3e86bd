use std::any::Any;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use onegate_core::Error;

/// Opaque task input and output. Delegates downcast to their own types.
pub type Payload = Box<dyn Any + Send>;

/// Queue priority. Workers drain High first, then Medium, then Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    /// Per-task execution budget; clamped by the pool's
    /// `max_task_timeout`.
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            timeout: None,
        }
    }
}

/// Execution context handed to the delegate. Cooperative: delegates should
/// poll [`is_cancelled`](Self::is_cancelled) and respect
/// [`deadline`](TaskContext::deadline) in long-running work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: u64,
    pub cancel: CancellationToken,
    pub deadline: Instant,
    pub submitted_at: Instant,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Outcome of one task.
#[derive(Debug)]
pub struct TaskResult {
    pub task_id: u64,
    pub data: Option<Payload>,
    pub error: Option<Error>,
    pub duration: Duration,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Downcast the success payload.
    pub fn into_data<T: 'static>(self) -> Option<T> {
        self.data.and_then(|d| d.downcast::<T>().ok()).map(|b| *b)
    }
}

/// Per-worker task processor. Each worker owns one instance for its whole
/// lifetime, on a dedicated OS thread, so delegates may hold thread-local
/// resources (cipher contexts, FFI handles).
pub trait Delegate: Send {
    /// Runs once when the worker starts. An error (or panic) prevents the
    /// worker from starting.
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Runs once per task.
    fn execute(&mut self, ctx: &TaskContext, payload: Payload) -> Result<Payload, Error>;

    /// Polled periodically while the worker idles; `false` retires the
    /// worker (a replacement spawns when the pool would drop below its
    /// minimum).
    fn health_check(&mut self) -> bool {
        true
    }

    /// Runs once at worker teardown.
    fn destroy(&mut self) {}
}

/// Creates one delegate per worker.
pub trait DelegateFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn Delegate>;
}

impl<F> DelegateFactory for F
where
    F: Fn() -> Box<dyn Delegate> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn Delegate> {
        (self)()
    }
}
