//! Elastic worker pool for CPU- and delegate-bound background work.
//!
//! Three priority queues feed a pool of dedicated OS threads. Each worker
//! owns one [`Delegate`] instance through its whole lifecycle (`init` /
//! `execute` / `health_check` / `destroy`). The pool grows at submit time
//! under queue pressure and shrinks when workers idle past the timeout.

mod task;

pub use task::{Delegate, DelegateFactory, Payload, Priority, TaskContext, TaskOptions, TaskResult};

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use onegate_core::Error;

/// Pool sizing and timeout configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Capacity of each priority queue.
    pub task_queue_size: usize,
    /// Idle span after which a worker above the minimum retires.
    pub idle_timeout: Duration,
    /// Default per-task budget.
    pub task_timeout: Duration,
    /// Hard cap on any per-task budget.
    pub max_task_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            task_queue_size: 256,
            idle_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30),
            max_task_timeout: Duration::from_secs(300),
        }
    }
}

/// Pool counters, sampled by [`Executor::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub active: u64,
    pub idle: u64,
    pub total: u64,
    pub queued: u64,
}

struct QueuedTask {
    ctx: TaskContext,
    payload: Payload,
    result_tx: oneshot::Sender<TaskResult>,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<QueuedTask>,
    medium: VecDeque<QueuedTask>,
    low: VecDeque<QueuedTask>,
    closed: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    fn pop_any(&mut self) -> Option<QueuedTask> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

#[derive(Default)]
struct Stats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
}

struct Inner {
    config: ExecutorConfig,
    factory: Arc<dyn DelegateFactory>,
    queue: Mutex<QueueState>,
    available: Condvar,
    stats: Stats,
    worker_ids: RwLock<Vec<u64>>,
    next_task_id: AtomicU64,
    next_worker_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wake idle workers so their Weak upgrade fails and they exit.
        if let Ok(mut state) = self.queue.lock() {
            state.closed = true;
        }
        self.available.notify_all();
    }
}

enum Popped {
    Task(QueuedTask),
    Empty,
    Closed,
}

/// The pool handle. Cheap to clone; all clones share the same workers.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Build the pool and start `min_workers` workers. A delegate whose
    /// `init` fails (or panics) aborts construction.
    pub fn new(
        config: ExecutorConfig,
        factory: impl DelegateFactory,
    ) -> Result<Self, Error> {
        if config.min_workers == 0 || config.max_workers < config.min_workers {
            return Err(Error::validation(
                "executor needs 1 <= min_workers <= max_workers",
            ));
        }

        let inner = Arc::new(Inner {
            config: config.clone(),
            factory: Arc::new(factory),
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            stats: Stats::default(),
            worker_ids: RwLock::new(Vec::new()),
            next_task_id: AtomicU64::new(1),
            next_worker_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        });

        for _ in 0..config.min_workers {
            spawn_worker(&inner)?;
        }

        Ok(Self { inner })
    }

    /// Submit and wait for the result. Cancellation of `cancel` unblocks
    /// the wait; a task cancelled while queued still resolves its result
    /// channel when a worker picks it up.
    pub async fn submit(
        &self,
        cancel: CancellationToken,
        payload: Payload,
        options: TaskOptions,
    ) -> Result<TaskResult, Error> {
        let rx = self.submit_async(cancel.clone(), payload, options)?;
        tokio::select! {
            result = rx => result.map_err(|_| Error::internal("task result channel closed")),
            _ = cancel.cancelled() => Err(Error::internal("task cancelled")),
        }
    }

    /// Submit without waiting; the returned channel resolves with the
    /// result (and closes even for cancelled tasks).
    pub fn submit_async(
        &self,
        cancel: CancellationToken,
        payload: Payload,
        options: TaskOptions,
    ) -> Result<oneshot::Receiver<TaskResult>, Error> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(Error::conflict("executor is shutting down"));
        }

        let budget = options
            .timeout
            .unwrap_or(self.inner.config.task_timeout)
            .min(self.inner.config.max_task_timeout);
        let now = Instant::now();
        let (result_tx, result_rx) = oneshot::channel();
        let task = QueuedTask {
            ctx: TaskContext {
                task_id: self.inner.next_task_id.fetch_add(1, Ordering::Relaxed),
                cancel,
                deadline: now + budget,
                submitted_at: now,
            },
            payload,
            result_tx,
        };

        let queued = {
            let mut state = self
                .inner
                .queue
                .lock()
                .map_err(|_| Error::internal("executor queue poisoned"))?;
            if state.closed {
                return Err(Error::conflict("executor is shutting down"));
            }
            let queue = match options.priority {
                Priority::High => &mut state.high,
                Priority::Medium => &mut state.medium,
                Priority::Low => &mut state.low,
            };
            if queue.len() >= self.inner.config.task_queue_size {
                return Err(Error::internal("task queue is full"));
            }
            queue.push_back(task);
            state.len()
        };

        self.inner.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.available.notify_one();

        // Elastic growth: scale up under queue pressure.
        let workers = self.worker_count();
        if queued > workers * 2 && workers < self.inner.config.max_workers {
            if let Err(err) = spawn_worker(&self.inner) {
                tracing::warn!(error = %err, "failed to grow worker pool");
            }
        }

        Ok(result_rx)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_ids.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> ExecutorStats {
        let queued = self.inner.queue.lock().map(|s| s.len()).unwrap_or(0) as u64;
        let total = self.worker_count() as u64;
        let active = self.inner.stats.active.load(Ordering::Relaxed);
        ExecutorStats {
            submitted: self.inner.stats.submitted.load(Ordering::Relaxed),
            completed: self.inner.stats.completed.load(Ordering::Relaxed),
            failed: self.inner.stats.failed.load(Ordering::Relaxed),
            active,
            idle: total.saturating_sub(active),
            total,
            queued,
        }
    }

    /// Stop accepting work and drain queued plus running tasks, waiting up
    /// to `deadline`. Returns an error if work remains when it elapses.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), Error> {
        self.inner.shutting_down.store(true, Ordering::Release);
        {
            let mut state = self
                .inner
                .queue
                .lock()
                .map_err(|_| Error::internal("executor queue poisoned"))?;
            state.closed = true;
        }
        self.inner.available.notify_all();

        let until = Instant::now() + deadline;
        loop {
            let drained = {
                let state = self
                    .inner
                    .queue
                    .lock()
                    .map_err(|_| Error::internal("executor queue poisoned"))?;
                state.len() == 0
            } && self.inner.stats.active.load(Ordering::Relaxed) == 0;

            if drained {
                return Ok(());
            }
            if Instant::now() >= until {
                return Err(Error::timeout());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ── Workers ─────────────────────────────────────────────────────────────────

/// How long an idle worker waits before it considers the Low queue (and
/// re-checks the higher ones).
const LOW_POLL_WAIT: Duration = Duration::from_millis(50);
/// Idle wakeups between delegate health checks.
const HEALTH_CHECK_EVERY: u64 = 20;

fn spawn_worker(inner: &Arc<Inner>) -> Result<(), Error> {
    let worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let weak = Arc::downgrade(inner);
    let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), Error>>();

    std::thread::Builder::new()
        .name(format!("onegate-worker-{worker_id}"))
        .spawn(move || worker_loop(weak, worker_id, init_tx))
        .map_err(|e| Error::internal("failed to spawn worker thread").with_cause(e))?;

    match init_rx.recv() {
        Ok(Ok(())) => {
            if let Ok(mut workers) = inner.worker_ids.write() {
                workers.push(worker_id);
            }
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(Error::internal("worker exited before init completed")),
    }
}

fn worker_loop(
    weak: Weak<Inner>,
    worker_id: u64,
    init_tx: std::sync::mpsc::Sender<Result<(), Error>>,
) {
    let Some(inner) = weak.upgrade() else {
        let _ = init_tx.send(Err(Error::internal("executor dropped before worker start")));
        return;
    };

    let mut delegate = inner.factory.create();
    let init = std::panic::catch_unwind(AssertUnwindSafe(|| delegate.init()));
    match init {
        Ok(Ok(())) => {
            let _ = init_tx.send(Ok(()));
        }
        Ok(Err(err)) => {
            let _ = init_tx.send(Err(err));
            return;
        }
        Err(_) => {
            let _ = init_tx.send(Err(Error::internal("delegate init panicked")));
            return;
        }
    }
    drop(inner);

    let mut idle_since = Instant::now();
    let mut idle_wakeups = 0u64;
    let mut unhealthy = false;

    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        match pop_task(&inner) {
            Popped::Task(task) => {
                idle_since = Instant::now();
                idle_wakeups = 0;
                run_task(&inner, delegate.as_mut(), task);
            }
            Popped::Closed => break,
            Popped::Empty => {
                idle_wakeups += 1;
                if idle_wakeups % HEALTH_CHECK_EVERY == 0 && !delegate.health_check() {
                    tracing::warn!(worker_id, "delegate health check failed; retiring worker");
                    unhealthy = true;
                    break;
                }
                if idle_since.elapsed() >= inner.config.idle_timeout
                    && try_retire(&inner, worker_id)
                {
                    delegate.destroy();
                    return;
                }
            }
        }
    }

    delegate.destroy();
    if let Some(inner) = weak.upgrade() {
        deregister(&inner, worker_id);
        // Keep the pool at its minimum when a worker retires unexpectedly.
        let below_min = inner.worker_ids.read().map(|w| w.len()).unwrap_or(0)
            < inner.config.min_workers;
        if unhealthy && below_min && !inner.shutting_down.load(Ordering::Acquire) {
            if let Err(err) = spawn_worker(&inner) {
                tracing::error!(error = %err, "failed to replace unhealthy worker");
            }
        }
    }
}

/// Retire only while staying at or above the configured minimum. The check
/// and removal happen under one write lock so concurrent retirements
/// cannot drop the pool below the floor.
fn try_retire(inner: &Arc<Inner>, worker_id: u64) -> bool {
    let Ok(mut workers) = inner.worker_ids.write() else {
        return false;
    };
    if workers.len() <= inner.config.min_workers {
        return false;
    }
    workers.retain(|id| *id != worker_id);
    true
}

fn deregister(inner: &Arc<Inner>, worker_id: u64) {
    if let Ok(mut workers) = inner.worker_ids.write() {
        workers.retain(|id| *id != worker_id);
    }
}

fn pop_task(inner: &Arc<Inner>) -> Popped {
    // `active` rises while the queue lock is still held, so shutdown's
    // drain check never sees a claimed task as neither queued nor active.
    let claim = |task: QueuedTask| {
        inner.stats.active.fetch_add(1, Ordering::Relaxed);
        Popped::Task(task)
    };

    let Ok(mut state) = inner.queue.lock() else {
        return Popped::Closed;
    };

    // High and Medium drain immediately.
    if let Some(task) = state
        .high
        .pop_front()
        .or_else(|| state.medium.pop_front())
    {
        return claim(task);
    }

    if state.closed {
        return match state.low.pop_front() {
            Some(task) => claim(task),
            None => Popped::Closed,
        };
    }

    // Low only runs after a short wait, so bursts on the higher queues get
    // first claim on this worker.
    let Ok((mut state, _)) = inner.available.wait_timeout(state, LOW_POLL_WAIT) else {
        return Popped::Closed;
    };
    match state.pop_any() {
        Some(task) => claim(task),
        None if state.closed => Popped::Closed,
        None => Popped::Empty,
    }
}

/// Execute one claimed task. The caller ([`pop_task`]) already marked it
/// active; this balances the counter on every exit path.
fn run_task(inner: &Arc<Inner>, delegate: &mut dyn Delegate, task: QueuedTask) {
    let started = Instant::now();

    let outcome = if task.ctx.is_cancelled() {
        Err(Error::internal("task cancelled before execution"))
    } else if Instant::now() > task.ctx.deadline {
        Err(Error::timeout())
    } else {
        match std::panic::catch_unwind(AssertUnwindSafe(|| {
            delegate.execute(&task.ctx, task.payload)
        })) {
            Ok(result) => result,
            Err(_) => Err(Error::internal("delegate panicked during execute")),
        }
    };

    let duration = started.elapsed();
    let result = match outcome {
        Ok(data) => {
            inner.stats.completed.fetch_add(1, Ordering::Relaxed);
            TaskResult {
                task_id: task.ctx.task_id,
                data: Some(data),
                error: None,
                duration,
            }
        }
        Err(error) => {
            inner.stats.failed.fetch_add(1, Ordering::Relaxed);
            TaskResult {
                task_id: task.ctx.task_id,
                data: None,
                error: Some(error),
                duration,
            }
        }
    };

    // A dropped receiver is fine; sending (or dropping the sender) is what
    // unblocks waiters either way.
    let _ = task.result_tx.send(result);
    inner.stats.active.fetch_sub(1, Ordering::Relaxed);
}
