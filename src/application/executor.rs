//! # Command Executor
//!
//! The single serialization point for every mutation of the card store.
//! Work is wrapped in an [`Executable`], admitted into a bounded priority queue and run
//! one at a time by a single worker task. Callers either fire and forget, or keep the
//! executable around and wait for its completion signal.

use crate::domain::config::ExecutorConfig;
use crate::domain::errors::ExecutorError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;

pub const IDLE: &str = "idle";

/// Boxed zero-argument unit of work.
pub type Action = BoxFuture<'static, anyhow::Result<()>>;

type Outcome = Result<(), ExecutorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    Normal,
    /// Moderation and administrative work that must overtake the routine backlog.
    High,
}

struct ExecutableInner {
    name: String,
    priority: Priority,
    action: Mutex<Option<Action>>,
    enqueued_at: Mutex<Option<Instant>>,
    submitted: AtomicBool,
    done: watch::Sender<Option<Outcome>>,
}

/// A named, prioritized unit of work with a single-fire completion signal.
///
/// Cloning yields another handle to the same executable; the clone is the token
/// used to wait for completion.
#[derive(Clone)]
pub struct Executable {
    inner: Arc<ExecutableInner>,
}

impl Executable {
    pub fn new<F>(name: impl Into<String>, priority: Priority, action: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(ExecutableInner {
                name: name.into(),
                priority,
                action: Mutex::new(Some(action.boxed())),
                enqueued_at: Mutex::new(None),
                submitted: AtomicBool::new(false),
                done,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// When the executable was admitted, if it was.
    pub fn enqueued_at(&self) -> Option<Instant> {
        *lock(&self.inner.enqueued_at)
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.done.borrow().is_some()
    }

    /// The error the action finished with, once it has finished.
    pub fn captured_error(&self) -> Option<ExecutorError> {
        match &*self.inner.done.borrow() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    fn take_action(&self) -> Option<Action> {
        lock(&self.inner.action).take()
    }

    /// Fires the completion signal. Only the first call has an effect.
    fn complete(&self, outcome: Outcome) {
        self.inner.done.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }

    async fn wait(&self) -> Outcome {
        if !self.is_submitted() {
            return Err(ExecutorError::NotSubmitted);
        }
        let mut rx = self.inner.done.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(ExecutorError::WorkerStopped))
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("submitted", &self.is_submitted())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Queue entry. The permit is the executable's slot in the bounded queue.
struct Queued {
    priority: Priority,
    seq: u64,
    exe: Executable,
    permit: OwnedSemaphorePermit,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<Queued>>,
    slots: Arc<Semaphore>,
    notify: Notify,
    seq: AtomicU64,
    running: Mutex<Option<String>>,
    stopped: AtomicBool,
    max_action: Option<Duration>,
}

impl Shared {
    fn pop(&self) -> Option<Executable> {
        let item = lock(&self.queue).pop()?;
        drop(item.permit);
        Some(item.exe)
    }

    fn drain(&self) {
        let pending: Vec<Queued> = lock(&self.queue).drain().collect();
        for item in pending {
            tracing::warn!("Dropping queued `{}`: executor stopped", item.exe.name());
            item.exe.complete(Err(ExecutorError::WorkerStopped));
        }
    }
}

/// Bounded, priority-ordered, single-consumer queue of [`Executable`]s.
pub struct Executor {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    default_admit_timeout: Duration,
}

impl Executor {
    /// Creates the executor and spawns its worker on the current runtime.
    pub fn new(config: &ExecutorConfig) -> Self {
        let mut executor = Self::with_limits(config.capacity, config.max_action_duration());
        executor.default_admit_timeout = config.admit_timeout();
        executor
    }

    /// # Arguments
    /// * `capacity` - Maximum number of admitted, not yet started executables (at least 1)
    /// * `max_action` - Cutoff after which a running action is abandoned and recorded as failed
    pub fn with_limits(capacity: usize, max_action: Option<Duration>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            slots: Arc::new(Semaphore::new(capacity.max(1))),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            running: Mutex::new(None),
            stopped: AtomicBool::new(false),
            max_action,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(shared.clone(), shutdown_rx));

        Self {
            shared,
            shutdown,
            worker: Mutex::new(Some(worker)),
            default_admit_timeout: ExecutorConfig::default().admit_timeout(),
        }
    }

    pub fn default_admit_timeout(&self) -> Duration {
        self.default_admit_timeout
    }

    /// Tries to admit `exe`, waiting up to `admit_timeout` for room in the queue.
    ///
    /// Returns `false` without any side effect when the queue stays full, when the
    /// executable was already submitted, or when the executor is shutting down.
    pub async fn submit(&self, exe: &Executable, admit_timeout: Duration) -> bool {
        if self.shared.stopped.load(Ordering::SeqCst) {
            tracing::warn!("Rejected `{}`: executor stopped", exe.name());
            return false;
        }
        if exe.is_submitted() {
            tracing::warn!("Rejected `{}`: already submitted", exe.name());
            return false;
        }

        // Nothing is marked until a slot is granted, so dropping this future while it
        // waits leaves the executable untouched.
        let acquire = self.shared.slots.clone().acquire_owned();
        let permit = match tokio::time::timeout(admit_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    "Rejected `{}`: queue full for {:?}",
                    exe.name(),
                    admit_timeout
                );
                return false;
            }
        };

        let seq = {
            // `stopped` is re-read under the queue lock: the final drain takes the same
            // lock after setting it, so nothing can be pushed behind the drain.
            let mut queue = lock(&self.shared.queue);
            if self.shared.stopped.load(Ordering::SeqCst) {
                tracing::warn!("Rejected `{}`: executor stopped", exe.name());
                return false;
            }
            if exe
                .inner
                .submitted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::warn!("Rejected `{}`: already submitted", exe.name());
                return false;
            }
            *lock(&exe.inner.enqueued_at) = Some(Instant::now());
            let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst);
            queue.push(Queued {
                priority: exe.priority(),
                seq,
                exe: exe.clone(),
                permit,
            });
            seq
        };
        self.shared.notify.notify_one();
        tracing::debug!("Admitted `{}` ({:?}, #{})", exe.name(), exe.priority(), seq);
        true
    }

    /// Suspends until `exe` has run, returning its result.
    ///
    /// Waiting on an executable that was never admitted is reported as
    /// [`ExecutorError::NotSubmitted`].
    pub async fn await_completion(&self, exe: &Executable) -> Result<(), ExecutorError> {
        exe.wait().await
    }

    /// Like [`Executor::await_completion`], giving up after `timeout`. The executable
    /// itself keeps its place in the queue.
    pub async fn await_completion_timeout(
        &self,
        exe: &Executable,
        timeout: Duration,
    ) -> Result<(), ExecutorError> {
        tokio::time::timeout(timeout, exe.wait())
            .await
            .unwrap_or(Err(ExecutorError::WaitTimeout))
    }

    /// Submits `exe` and blocks until it finished, for callers that must report the
    /// effect of serialized work synchronously.
    pub async fn run_and_wait(
        &self,
        exe: &Executable,
        admit_timeout: Duration,
        wait_timeout: Duration,
    ) -> Result<(), ExecutorError> {
        if !self.submit(exe, admit_timeout).await {
            return Err(ExecutorError::AdmissionRejected);
        }
        self.await_completion_timeout(exe, wait_timeout).await
    }

    /// Name of the executable currently running, or `"idle"`.
    pub fn currently_running(&self) -> String {
        lock(&self.shared.running)
            .clone()
            .unwrap_or_else(|| IDLE.to_string())
    }

    /// Number of admitted executables still waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Stops accepting work, lets the running action finish and fails everything
    /// still queued with [`ExecutorError::WorkerStopped`].
    pub async fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Executor worker ended abnormally: {}", e);
            }
        }
        self.shared.drain();
    }
}

async fn run_worker(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Executor worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match shared.pop() {
            Some(exe) => execute(&shared, exe).await,
            None => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    shared.stopped.store(true, Ordering::SeqCst);
    shared.drain();
    tracing::info!("Executor worker stopped");
}

async fn execute(shared: &Shared, exe: Executable) {
    let Some(action) = exe.take_action() else {
        exe.complete(Err(ExecutorError::ActionFailed(
            "action already consumed".to_string(),
        )));
        return;
    };

    let waited = exe.enqueued_at().map(|t| t.elapsed()).unwrap_or_default();
    tracing::info!("Running `{}` (queued {:?})", exe.name(), waited);
    *lock(&shared.running) = Some(exe.name().to_string());

    let started = Instant::now();
    let outcome = run_guarded(action, shared.max_action).await;
    *lock(&shared.running) = None;

    match &outcome {
        Ok(()) => tracing::debug!("Finished `{}` in {:?}", exe.name(), started.elapsed()),
        Err(e) => tracing::error!("`{}` failed after {:?}: {}", exe.name(), started.elapsed(), e),
    }
    exe.complete(outcome);
}

/// Runs an action to completion, turning errors, panics and overruns into
/// [`ExecutorError::ActionFailed`].
async fn run_guarded(action: Action, limit: Option<Duration>) -> Outcome {
    let guarded = AssertUnwindSafe(action).catch_unwind();
    let caught = match limit {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(caught) => caught,
            Err(_) => {
                return Err(ExecutorError::ActionFailed(format!(
                    "exceeded the {limit:?} limit"
                )));
            }
        },
        None => guarded.await,
    };

    match caught {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExecutorError::ActionFailed(format!("{e:#}"))),
        Err(panic) => Err(ExecutorError::ActionFailed(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
