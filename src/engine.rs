//! Single-worker background execution engine.
//!
//! Tasks queue in FIFO order and run one at a time on a dedicated worker
//! thread. Cancellation is cooperative: `abort()` raises a flag that tasks
//! check between discrete units of work; completed units are never rolled
//! back. Errors returned by a task are captured into a drainable list and
//! drop the rest of the queued task set rather than propagating.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{RelicError, Result};

type Task = Box<dyn FnOnce(&WorkerContext) -> Result<()> + Send + 'static>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineProgress {
    pub current: u64,
    pub maximum: u64,
    pub status: String,
    /// Accumulated wall-clock time spent running tasks, not waiting.
    pub active: Duration,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Task>,
    running: bool,
    shutdown: bool,
}

#[derive(Default)]
struct ProgressState {
    current: u64,
    maximum: u64,
    status: String,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    work: Condvar,
    idle: Condvar,
    abort: AtomicBool,
    active_nanos: AtomicU64,
    progress: Mutex<ProgressState>,
    errors: Mutex<Vec<RelicError>>,
    on_idle: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

/// Handle passed to running tasks for progress updates and abort checks.
pub struct WorkerContext {
    shared: Arc<Shared>,
}

impl WorkerContext {
    pub fn aborted(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: &str) {
        self.shared.progress.lock().unwrap().status = status.to_string();
    }

    pub fn set_progress(&self, current: u64, maximum: u64) {
        let mut progress = self.shared.progress.lock().unwrap();
        progress.current = current;
        progress.maximum = maximum;
    }

    pub fn bump_progress(&self, by: u64) {
        self.shared.progress.lock().unwrap().current += by;
    }
}

pub struct ExecutionEngine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("relic-worker".into())
            .spawn(move || worker_loop(worker_shared))
            .expect("failed to spawn worker thread");
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Queue a task; it runs after everything queued before it.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&WorkerContext) -> Result<()> + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        state.queue.push_back(Box::new(task));
        self.shared.work.notify_one();
    }

    /// Request cooperative cancellation of the running task set. No-op when
    /// idle, so a stale flag can never poison the next run.
    pub fn abort(&self) {
        let state = self.shared.state.lock().unwrap();
        if state.running || !state.queue.is_empty() {
            self.shared.abort.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.running && state.queue.is_empty()
    }

    /// Block until the worker has no pending or running task.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.running || !state.queue.is_empty() {
            state = self.shared.idle.wait(state).unwrap();
        }
    }

    pub fn progress(&self) -> EngineProgress {
        let progress = self.shared.progress.lock().unwrap();
        EngineProgress {
            current: progress.current,
            maximum: progress.maximum,
            status: progress.status.clone(),
            active: Duration::from_nanos(self.shared.active_nanos.load(Ordering::Relaxed)),
        }
    }

    /// Drain the captured-error list.
    pub fn take_errors(&self) -> Vec<RelicError> {
        std::mem::take(&mut *self.shared.errors.lock().unwrap())
    }

    /// Hook invoked exactly once per completed (or aborted) task set, on the
    /// worker thread, used to release resources held across a run. The hook
    /// runs before waiters wake and must not call back into the engine.
    pub fn set_on_idle<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.shared.on_idle.lock().unwrap() = Some(Box::new(hook));
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.work.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    state.running = true;
                    break task;
                }
                state = shared.work.wait(state).unwrap();
            }
        };

        let started = Instant::now();
        let ctx = WorkerContext {
            shared: Arc::clone(&shared),
        };
        let result = task(&ctx);
        shared
            .active_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        let failed = result.is_err();
        if let Err(e) = result {
            tracing::error!(error = %e, "background task failed");
            shared.errors.lock().unwrap().push(e);
        }

        let mut state = shared.state.lock().unwrap();
        state.running = false;
        // A failed task or a pending abort drops the rest of the set.
        if failed || shared.abort.load(Ordering::SeqCst) {
            state.queue.clear();
        }
        if state.queue.is_empty() {
            shared.abort.store(false, Ordering::SeqCst);
            // Runs under the queue lock so `wait_idle` callers observe the
            // hook's effects; the hook must not call back into the engine.
            if let Some(hook) = shared.on_idle.lock().unwrap().as_mut() {
                hook();
            }
            shared.idle.notify_all();
        }
    }
}
