//! A unit of concurrent work with a one-shot completion signal.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::coord::types::{JobId, JobState};
use crate::core::errors::{CoordError, JobFailure, Result};

/// What a finished job produced
pub type JobOutcome<T> = std::result::Result<T, JobFailure>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

enum SlotValue<T> {
    Empty,
    Ready(JobOutcome<T>),
    Taken,
}

/// Shared between the job handle and its running task
struct Slot<T> {
    state: AtomicU8,
    value: Mutex<SlotValue<T>>,
    completed_at: Mutex<Option<Instant>>,
    done_tx: watch::Sender<bool>,
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Slot<T> {
    fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn complete(&self, outcome: JobOutcome<T>) {
        *lock(&self.value) = SlotValue::Ready(outcome);
        *lock(&self.completed_at) = Some(Instant::now());
        self.state.store(JobState::Completed.as_u8(), Ordering::Release);
        self.done_tx.send_replace(true);
    }
}

/// A job: some work yielding `T` or a [`JobFailure`], exactly once.
///
/// A job does nothing until [`Job::start`] (or a coordinator) spawns it onto
/// the tokio runtime. Once it completes, the outcome can be taken out one time.
pub struct Job<T> {
    id: JobId,
    name: String,
    work: Option<BoxFuture<'static, JobOutcome<T>>>,
    slot: Arc<Slot<T>>,
}

impl<T: Send + 'static> Job<T> {
    /// Wrap a future as a job. An `Err` from the future becomes
    /// [`JobFailure::Failed`].
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_outcome(name, work.map(|r| r.map_err(JobFailure::failed)))
    }

    pub(crate) fn from_outcome<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = JobOutcome<T>> + Send + 'static,
    {
        let (done_tx, _) = watch::channel(false);
        Self {
            id: JobId::new(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            work: Some(work.boxed()),
            slot: Arc::new(Slot {
                state: AtomicU8::new(JobState::Pending.as_u8()),
                value: Mutex::new(SlotValue::Empty),
                completed_at: Mutex::new(None),
                done_tx,
            }),
        }
    }

    /// Spawn the job on the current tokio runtime and return immediately.
    pub fn start(&mut self) -> Result<()> {
        self.start_with(None)
    }

    /// Spawn the job; once it completes its id is sent on `notify`.
    pub(crate) fn start_with(&mut self, notify: Option<mpsc::Sender<JobId>>) -> Result<()> {
        let work = self
            .work
            .take()
            .ok_or(CoordError::AlreadyStarted { job: self.id })?;
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.work = Some(work);
                return Err(CoordError::internal(format!(
                    "cannot start {} outside a tokio runtime: {}",
                    self.id, e
                )));
            }
        };

        self.slot
            .state
            .store(JobState::Running.as_u8(), Ordering::Release);
        debug!(job = %self.id, name = %self.name, "job started");

        let id = self.id;
        let slot = self.slot.clone();
        runtime.spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(JobFailure::from_panic(payload)),
            };
            slot.complete(outcome);
            if let Some(tx) = notify {
                if tx.send(id).await.is_err() {
                    warn!(job = %id, "completion receiver dropped before job finished");
                }
            }
        });
        Ok(())
    }
}

impl<T> Job<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.slot.state()
    }

    /// True once the job has completed; never reverts.
    pub fn is_done(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// When the job completed, on the tokio clock.
    pub fn completed_at(&self) -> Option<Instant> {
        *lock(&self.slot.completed_at)
    }

    /// Suspend until the job completes. Returns immediately if it already has.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.slot.done_tx.subscribe();
        rx.wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|e| CoordError::channel("job_done", e.to_string()))
    }

    /// Move the outcome out of a completed job.
    ///
    /// Fails with `NotReady` before completion and `ResultTaken` on a
    /// second call.
    pub fn take_result(&self) -> Result<JobOutcome<T>> {
        let mut value = lock(&self.slot.value);
        match std::mem::replace(&mut *value, SlotValue::Taken) {
            SlotValue::Ready(outcome) => Ok(outcome),
            SlotValue::Empty => {
                *value = SlotValue::Empty;
                Err(CoordError::NotReady { job: self.id })
            }
            SlotValue::Taken => Err(CoordError::ResultTaken { job: self.id }),
        }
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
