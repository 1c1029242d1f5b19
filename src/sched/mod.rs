//! Per-resource serialized task scheduler.
//!
//! Each named hardware resource (a stage axis, a camera, a filter wheel)
//! owns one FIFO queue of [`Worker`]s. The worker at the head of a queue is
//! the only one allowed to execute its body; everyone behind it blocks on a
//! gate until the head completes. Because the scheduler enforces that
//! exclusivity, a running body may talk to its hardware resource without any
//! further locking.
//!
//! # Queue lifecycle
//!
//! ```text
//! submit("stage_x", body)          cancel_waiting / terminate / shutdown
//!        │                                        │
//!        ▼                                        ▼
//! "stage_x": [ w1 running │ w2 blocked │ w3 blocked ]
//!               │
//!               └─ completes → pops itself, releases w2
//! ```
//!
//! # Failure policy
//!
//! A panic inside a submitted body is caught at the wrapper boundary,
//! logged, and treated as normal completion so the next queued worker is
//! still released — one bad task must not starve its resource queue. This
//! is the opposite of the routine drivers, which deliberately let step
//! failures propagate.
//!
//! # Cancellation
//!
//! Cancellation of *waiting* work is exact: the worker is unlinked before
//! it ever runs. Termination of *running* work is cooperative and
//! best-effort: the worker's [`CancelToken`] is set, the scheduler polls a
//! bounded number of times for the thread to exit, and a worker that does
//! not exit is re-queued at the tail of its resource queue rather than
//! leaked. Callers must not assume termination completes synchronously.

mod cancel;
mod config;

pub use cancel::CancelToken;
pub use config::SchedulerConfig;

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

type WorkerBody = Box<dyn FnOnce(&CancelToken) + Send>;
type CompletionFn = Box<dyn FnOnce() + Send>;

/// Self-blocking gate a worker parks on until it reaches the queue head.
struct Gate {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Open the gate. Idempotent.
    fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.condvar.wait(&mut released);
        }
    }
}

struct WorkerInner {
    id: u64,
    resource: String,
    gate: Gate,
    cancel: CancelToken,
    /// Set once the body (or its cancellation short-circuit) has run.
    finished: AtomicBool,
}

/// Handle to one unit of work queued against a resource.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Scheduler-unique worker id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Resource this worker is queued against.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// Whether the worker's body has run (or been skipped by cancellation).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// The worker's cancellation token, for callers that want to cancel a
    /// running body cooperatively without involving the scheduler.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("resource", &self.inner.resource)
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct SchedulerInner {
    /// One FIFO queue per resource name, each mutated only under this lock.
    queues: Mutex<HashMap<String, VecDeque<Arc<WorkerInner>>>>,
    /// Waiting workers parked here during shutdown until their forced
    /// termination.
    doomed: Mutex<HashMap<String, Vec<Arc<WorkerInner>>>>,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
    config: SchedulerConfig,
}

/// Named-resource mutual-exclusion task queue.
///
/// Cloning is cheap and shares the same queues.
#[derive(Clone)]
pub struct ResourceScheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for ResourceScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl ResourceScheduler {
    /// Scheduler with the given termination tuning.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queues: Mutex::new(HashMap::new()),
                doomed: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Queue `body` against `resource` and return its handle.
    ///
    /// The body starts immediately if the queue was empty, otherwise it
    /// blocks on its own thread until every earlier worker on the resource
    /// has completed. Submission order is execution order.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] after [`shutdown`](Self::shutdown);
    /// [`SchedulerError::Spawn`] if the worker thread cannot be created.
    pub fn submit<F>(&self, resource: &str, body: F) -> Result<Worker, SchedulerError>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        self.submit_inner(resource, Box::new(body), None)
    }

    /// Like [`submit`](Self::submit), with a callback invoked after the
    /// body completes (on the worker's thread, after the queue advances).
    pub fn submit_with_completion<F, D>(
        &self,
        resource: &str,
        body: F,
        on_complete: D,
    ) -> Result<Worker, SchedulerError>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        self.submit_inner(resource, Box::new(body), Some(Box::new(on_complete)))
    }

    fn submit_inner(
        &self,
        resource: &str,
        body: WorkerBody,
        on_complete: Option<CompletionFn>,
    ) -> Result<Worker, SchedulerError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown {
                resource: resource.to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(WorkerInner {
            id,
            resource: resource.to_string(),
            gate: Gate::new(),
            cancel: CancelToken::new(),
            finished: AtomicBool::new(false),
        });

        // Enqueue on the caller's thread so submission order is queue order.
        let sole_entry = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(resource.to_string()).or_default();
            queue.push_back(Arc::clone(&worker));
            queue.len() == 1
        };
        if sole_entry {
            worker.gate.release();
        }
        debug!(resource, worker = id, sole_entry, "worker queued");

        let sched = Arc::clone(&self.inner);
        let me = Arc::clone(&worker);
        let spawned = thread::Builder::new()
            .name(format!("{resource}-worker-{id}"))
            .spawn(move || run_worker(&sched, &me, body, on_complete));

        if let Err(err) = spawned {
            detach(&self.inner, &worker);
            return Err(SchedulerError::Spawn {
                resource: resource.to_string(),
                message: err.to_string(),
            });
        }

        Ok(Worker { inner: worker })
    }

    /// Remove a queued-but-not-yet-running worker.
    ///
    /// Returns false without side effects if `worker` is currently the
    /// running head of its queue (running work can only be stopped via
    /// [`terminate`](Self::terminate)) or is no longer queued. The rest of
    /// the queue keeps its order.
    pub fn cancel_waiting(&self, resource: &str, worker: &Worker) -> bool {
        let removed = {
            let mut queues = self.inner.queues.lock();
            let Some(queue) = queues.get_mut(resource) else {
                return false;
            };
            if queue.front().is_some_and(|head| head.id == worker.id()) {
                return false;
            }
            let before = queue.len();
            queue.retain(|w| w.id != worker.id());
            queue.len() != before
        };

        if removed {
            // Wake the parked thread so it can observe the token and exit.
            worker.inner.cancel.cancel();
            worker.inner.gate.release();
            debug!(resource, worker = worker.id(), "waiting worker cancelled");
        }
        removed
    }

    /// The worker currently at the head of `resource`'s queue, if any.
    #[must_use]
    pub fn running_worker(&self, resource: &str) -> Option<Worker> {
        let queues = self.inner.queues.lock();
        queues
            .get(resource)
            .and_then(VecDeque::front)
            .map(|inner| Worker {
                inner: Arc::clone(inner),
            })
    }

    /// Best-effort forced termination of a worker, running or waiting.
    ///
    /// Cancels the worker's token, wakes it if it was parked, then polls
    /// `kill_retries` times with `kill_backoff` between attempts for the
    /// thread to exit. A worker that does not exit within the bound is
    /// re-queued at the tail of its resource queue (never leaked) and the
    /// queue is allowed to advance past it; in that case this returns
    /// false.
    pub fn terminate(&self, worker: &Worker) -> bool {
        self.force_terminate(&worker.inner)
    }

    fn force_terminate(&self, target: &Arc<WorkerInner>) -> bool {
        target.cancel.cancel();
        target.gate.release();

        for _ in 0..=self.inner.config.kill_retries {
            if target.finished.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(self.inner.config.kill_backoff);
        }

        warn!(
            resource = %target.resource,
            worker = target.id,
            retries = self.inner.config.kill_retries,
            "worker ignored termination; re-queueing at tail"
        );

        let next = {
            let mut queues = self.inner.queues.lock();
            if target.finished.load(Ordering::SeqCst) {
                // Finished between the last poll and taking the lock; its
                // own wrapper already advanced the queue.
                return true;
            }
            let queue = queues.entry(target.resource.clone()).or_default();
            let was_head = queue.front().is_some_and(|head| head.id == target.id);
            queue.retain(|w| w.id != target.id);
            queue.push_back(Arc::clone(target));
            if was_head {
                queue.front().filter(|w| w.id != target.id).cloned()
            } else {
                None
            }
        };
        if let Some(next) = next {
            next.gate.release();
        }
        false
    }

    /// Tear down every resource queue.
    ///
    /// Waiting workers are moved to a pending-deletion list and the running
    /// head of each queue is forcibly terminated first, then every
    /// pending-deletion worker. Termination failures are logged, not
    /// raised. Subsequent submissions fail with
    /// [`SchedulerError::ShutDown`].
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("resource scheduler shutting down");

        let heads: Vec<Arc<WorkerInner>> = {
            let mut queues = self.inner.queues.lock();
            let mut doomed = self.inner.doomed.lock();
            let mut heads = Vec::new();
            for (resource, queue) in queues.iter_mut() {
                if let Some(head) = queue.front().cloned() {
                    heads.push(head);
                    doomed
                        .entry(resource.clone())
                        .or_default()
                        .extend(queue.drain(1..));
                }
            }
            heads
        };

        for head in heads {
            self.force_terminate(&head);
        }

        let waiting: Vec<Arc<WorkerInner>> = {
            let mut doomed = self.inner.doomed.lock();
            doomed.drain().flat_map(|(_, workers)| workers).collect()
        };
        for worker in waiting {
            self.force_terminate(&worker);
        }
    }
}

/// Worker wrapper: park until released, run the body unless cancelled,
/// advance the queue, fire the completion callback.
fn run_worker(
    sched: &SchedulerInner,
    me: &Arc<WorkerInner>,
    body: WorkerBody,
    on_complete: Option<CompletionFn>,
) {
    me.gate.wait();

    if me.cancel.is_cancelled() {
        debug!(resource = %me.resource, worker = me.id, "worker cancelled before start");
    } else if catch_unwind(AssertUnwindSafe(|| body(&me.cancel))).is_err() {
        // Partial-failure isolation: the queue still advances below.
        warn!(
            resource = %me.resource,
            worker = me.id,
            "worker body panicked; releasing the resource queue"
        );
    }

    // Order matters: `finished` first, so a concurrent force_terminate that
    // still sees false knows the queue has not been advanced yet.
    me.finished.store(true, Ordering::SeqCst);
    detach(sched, me);

    if let Some(callback) = on_complete {
        callback();
    }
}

/// Unlink `me` from its resource queue, releasing the new head if `me` was
/// the head.
fn detach(sched: &SchedulerInner, me: &Arc<WorkerInner>) {
    let next = {
        let mut queues = sched.queues.lock();
        let Some(queue) = queues.get_mut(&me.resource) else {
            return;
        };
        let was_head = queue.front().is_some_and(|head| head.id == me.id);
        queue.retain(|w| w.id != me.id);
        if was_head {
            queue.front().cloned()
        } else {
            None
        }
    };
    if let Some(next) = next {
        next.gate.release();
    }
}
