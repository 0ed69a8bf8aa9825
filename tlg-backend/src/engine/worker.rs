//! Worker pool
//!
//! A fixed set of OS threads created per run. Every worker parks on a shared
//! start gate until the orchestrator has enqueued all actions and closed the
//! queue, then pulls actions until the queue is drained.
//!
//! Per iteration a worker:
//! 1. pops an action (exits when the queue is closed and empty),
//! 2. executes it if ready, posting findings or a fault to the result channel,
//! 3. otherwise requeues it at the tail,
//! 4. closes page connections that have been idle past the timeout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::collaborators::PageSource;
use crate::error::{Fault, Result};

use super::action::{WorkerContext, WorkerOutcome};
use super::connections::ConnectionCache;
use super::queue::{ActionQueue, QueuedAction};

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Page connections unused for longer than this are closed
    pub idle_timeout: Duration,
    /// Fault an action that stays not-ready this long; `None` retries forever
    pub ready_timeout: Option<Duration>,
}

/// One-shot gate released by the orchestrator once the queue is filled
#[derive(Default)]
struct StartGate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl StartGate {
    fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .condvar
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_all();
    }
}

/// Shared state between the pool handle and its threads
struct SharedPoolState {
    queue: Arc<ActionQueue>,
    gate: StartGate,
    /// Workers that have not yet exited
    active: AtomicUsize,
    /// Per-worker "currently processing" label
    labels: Vec<Mutex<String>>,
}

impl SharedPoolState {
    fn set_label(&self, worker_id: usize, label: &str) {
        if let Some(slot) = self.labels.get(worker_id) {
            let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
            current.clear();
            current.push_str(label);
        }
    }
}

/// Decrements the active-worker count when a worker thread ends, even by panic
struct ActiveGuard(Arc<SharedPoolState>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of worker threads for one run
pub struct WorkerPool {
    state: Arc<SharedPoolState>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` threads. They wait at the start gate until
    /// [`release`](Self::release) is called.
    pub fn spawn(
        config: &PoolConfig,
        queue: Arc<ActionQueue>,
        pages: Arc<dyn PageSource>,
        results: Sender<WorkerOutcome>,
    ) -> Result<Self> {
        let workers = config.workers.max(1);
        let state = Arc::new(SharedPoolState {
            queue,
            gate: StartGate::default(),
            active: AtomicUsize::new(0),
            labels: (0..workers).map(|_| Mutex::new(String::new())).collect(),
        });

        let mut pool = Self {
            state,
            threads: Vec::with_capacity(workers),
        };

        for worker_id in 0..workers {
            let state = Arc::clone(&pool.state);
            let context = WorkerContext::new(
                worker_id,
                ConnectionCache::new(Arc::clone(&pages), config.idle_timeout),
            );
            let results = results.clone();
            let ready_timeout = config.ready_timeout;

            state.active.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("tlg-worker-{}", worker_id))
                .spawn({
                    let state = Arc::clone(&state);
                    move || {
                        let _guard = ActiveGuard(Arc::clone(&state));
                        Self::worker_loop(state, context, results, ready_timeout);
                    }
                });

            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    state.active.fetch_sub(1, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }

        debug!("Worker pool started with {} threads", workers);
        Ok(pool)
    }

    /// Open the start gate
    pub fn release(&self) {
        self.state.gate.release();
    }

    /// Number of workers that have not exited yet
    pub fn active_workers(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.state.labels.len()
    }

    /// Label of every worker (empty when idle)
    pub fn current_actions(&self) -> Vec<String> {
        self.state
            .labels
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Wait for every worker thread to exit
    pub fn join(&mut self) {
        for (idx, handle) in self.threads.drain(..).enumerate() {
            if let Err(e) = handle.join() {
                error!("Worker {} join failed: {:?}", idx, e);
            }
        }
    }

    fn worker_loop(
        state: Arc<SharedPoolState>,
        mut context: WorkerContext,
        results: Sender<WorkerOutcome>,
        ready_timeout: Option<Duration>,
    ) {
        let worker_id = context.worker_id();
        state.gate.wait();
        debug!("Worker {} started", worker_id);

        while let Some(item) = state.queue.pop() {
            if item.action.is_ready() {
                let subject = item.action.subject().to_string();
                state.set_label(worker_id, &subject);
                Self::execute(item, &subject, &mut context, &results);
                state.set_label(worker_id, "");
            } else {
                Self::defer(item, worker_id, &state.queue, &results, ready_timeout);
            }

            context.connections_mut().sweep_idle();
        }

        context.connections_mut().close_all();
        debug!("Worker {} exiting", worker_id);
    }

    fn execute(
        item: QueuedAction,
        subject: &str,
        context: &mut WorkerContext,
        results: &Sender<WorkerOutcome>,
    ) {
        let worker_id = context.worker_id();
        let action = item.action;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| action.execute(context)));

        let message = match outcome {
            Ok(Ok(findings)) => {
                trace!("Worker {} produced {} findings for {}", worker_id, findings.len(), subject);
                for finding in findings {
                    // Receiver gone means the run was abandoned; keep draining the queue.
                    let _ = results.send(WorkerOutcome::Finding(finding));
                }
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        warn!("Worker {} action for {} failed: {}", worker_id, subject, message);
        let _ = results.send(WorkerOutcome::Fault(Fault {
            worker_id,
            subject: subject.to_string(),
            message,
        }));
    }

    fn defer(
        mut item: QueuedAction,
        worker_id: usize,
        queue: &ActionQueue,
        results: &Sender<WorkerOutcome>,
        ready_timeout: Option<Duration>,
    ) {
        let now = Instant::now();
        let since = *item.deferred_since.get_or_insert(now);

        if let Some(limit) = ready_timeout {
            if now.saturating_duration_since(since) > limit {
                let subject = item.action.subject().to_string();
                warn!("Worker {} giving up on action for {}: not ready after {:?}", worker_id, subject, limit);
                let _ = results.send(WorkerOutcome::Fault(Fault {
                    worker_id,
                    subject,
                    message: format!("action did not become ready within {:?}", limit),
                }));
                return;
            }
        }

        trace!("re-queueing action from {}, queue len={}", item.action.subject(), queue.len());
        queue.requeue(item);
        thread::yield_now();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Parked workers must be able to leave; running ones finish on their own.
        self.state.queue.close();
        self.state.gate.release();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}
