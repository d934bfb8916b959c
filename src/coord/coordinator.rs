//! Coordinator - drains a fixed batch of jobs in completion order
//!
//! Every job reports its id on one fan-in channel when it finishes. The
//! coordinator is the only owner of the pending set and mutates it from the
//! drain loop alone, so the set needs no locking.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::coord::hooks::{EpisodeContext, EpisodeObserver};
use crate::coord::job::{Job, JobOutcome};
use crate::coord::types::{
    CompletionEvent, CompletionRecord, EpisodeOutput, EpisodeReport, EpisodeState, JobId, JobState,
};
use crate::core::config::CoordinatorConfig;
use crate::core::errors::{CoordError, Result};

/// A registered job with its reaction, with the result type erased
trait PendingJob: Send {
    fn id(&self) -> JobId;
    fn name(&self) -> &str;
    fn start(&mut self, notify: mpsc::Sender<JobId>) -> Result<()>;
    fn completed_at(&self) -> Option<Instant>;
    /// Hand the outcome to the reaction; returns the failure text, if any
    fn dispatch(self: Box<Self>) -> Result<Option<String>>;
}

struct Bound<T, F> {
    job: Job<T>,
    reaction: F,
}

impl<T, F> PendingJob for Bound<T, F>
where
    T: Send + 'static,
    F: FnOnce(JobOutcome<T>) + Send + 'static,
{
    fn id(&self) -> JobId {
        self.job.id()
    }

    fn name(&self) -> &str {
        self.job.name()
    }

    fn start(&mut self, notify: mpsc::Sender<JobId>) -> Result<()> {
        self.job.start_with(Some(notify))
    }

    fn completed_at(&self) -> Option<Instant> {
        self.job.completed_at()
    }

    fn dispatch(self: Box<Self>) -> Result<Option<String>> {
        let Bound { job, reaction } = *self;
        let outcome = job.take_result()?;
        let error = outcome.as_ref().err().map(|e| e.to_string());
        reaction(outcome);
        Ok(error)
    }
}

/// Coordinator for one episode: start a batch, drain it, run a final step
pub struct Coordinator {
    config: CoordinatorConfig,
    // Registration order; also start order
    jobs: Vec<Box<dyn PendingJob>>,
    observers: Vec<Arc<dyn EpisodeObserver>>,
    state: EpisodeState,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            jobs: Vec::new(),
            observers: Vec::new(),
            state: EpisodeState::NotStarted,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            jobs: Vec::new(),
            observers: Vec::new(),
            state: EpisodeState::NotStarted,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Where the episode is; `NotStarted` until `run` consumes the coordinator.
    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Register a job and the reaction that receives its outcome.
    ///
    /// The reaction runs on the coordinator's task, once, when the job
    /// completes. A job that failed hands its [`JobFailure`] instead of a value.
    ///
    /// [`JobFailure`]: crate::JobFailure
    pub fn add<T, F>(&mut self, job: Job<T>, reaction: F) -> Result<JobId>
    where
        T: Send + 'static,
        F: FnOnce(JobOutcome<T>) + Send + 'static,
    {
        let id = job.id();
        if job.state() != JobState::Pending {
            return Err(CoordError::AlreadyStarted { job: id });
        }
        tracing::debug!("Registered {} ({})", job.name(), id);
        self.jobs.push(Box::new(Bound { job, reaction }));
        Ok(id)
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EpisodeObserver>) {
        self.observers.push(observer);
    }

    /// Run the episode.
    ///
    /// Starts every job, then loops until the pending set is empty, each pass
    /// consuming one completion and running that job's reaction. Only then is
    /// `final_step` called. Job failures go to their reactions; only a failing
    /// final step fails the episode.
    pub async fn run<R, F, Fut>(mut self, final_step: F) -> Result<EpisodeOutput<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("episode", name = %self.config.name, run_id = %run_id);
        async move {
            let ctx = EpisodeContext {
                run_id,
                name: self.config.name.clone(),
                job_count: self.jobs.len(),
            };
            let started_at = Utc::now();
            let clock = Instant::now();

            let completions = self.drain(&ctx, clock).await?;

            self.transition(&ctx, EpisodeState::Finalizing).await;
            tracing::info!("All {} jobs finished, running final step", ctx.job_count);
            let result = final_step().await;

            let success = result.is_ok();
            let next = if success {
                EpisodeState::Done
            } else {
                EpisodeState::Failed
            };
            self.transition(&ctx, next).await;
            for observer in &self.observers {
                observer.on_finish(&ctx, success).await;
            }

            let value = result.map_err(|e| {
                tracing::error!("Final step failed: {:#}", e);
                CoordError::final_step(e)
            })?;

            let report = EpisodeReport {
                run_id,
                name: ctx.name.clone(),
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
                state: self.state,
                completions,
            };
            Ok(EpisodeOutput { value, report })
        }
        .instrument(span)
        .await
    }

    /// Start all jobs and consume completions until none are pending
    async fn drain(&mut self, ctx: &EpisodeContext, clock: Instant) -> Result<Vec<CompletionRecord>> {
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let mut table: HashMap<JobId, Box<dyn PendingJob>> = HashMap::with_capacity(self.jobs.len());
        let mut pending: HashSet<JobId> = HashSet::with_capacity(self.jobs.len());

        for mut job in self.jobs.drain(..) {
            job.start(tx.clone())?;
            pending.insert(job.id());
            table.insert(job.id(), job);
        }
        // Only running jobs hold senders from here on
        drop(tx);

        self.transition(ctx, EpisodeState::Draining).await;
        tracing::info!("Started {} jobs", pending.len());

        let mut completions = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let id = self.next_completion(ctx, &mut rx, &table).await?;
            if !pending.remove(&id) {
                return Err(CoordError::internal(format!(
                    "completion for {} which is not pending",
                    id
                )));
            }
            let job = table
                .remove(&id)
                .ok_or_else(|| CoordError::internal(format!("no reaction for {}", id)))?;

            let name = job.name().to_string();
            let completed_at = job.completed_at().unwrap_or_else(Instant::now);
            let error = job.dispatch()?;

            let event = CompletionEvent {
                job: id,
                name,
                error,
                completed_at,
                elapsed: completed_at.saturating_duration_since(clock),
                remaining: pending.len(),
            };
            tracing::debug!(
                job = %event.job,
                remaining = event.remaining,
                ok = event.succeeded(),
                "Dispatched completion of {}",
                event.name
            );
            for observer in &self.observers {
                observer.on_completion(ctx, &event).await;
            }
            completions.push(CompletionRecord::from(&event));
        }

        Ok(completions)
    }

    /// Suspend until the next job reports in
    async fn next_completion(
        &self,
        ctx: &EpisodeContext,
        rx: &mut mpsc::Receiver<JobId>,
        table: &HashMap<JobId, Box<dyn PendingJob>>,
    ) -> Result<JobId> {
        let received = match self.config.stall_warning() {
            None => rx.recv().await,
            Some(after) => loop {
                match tokio::time::timeout(after, rx.recv()).await {
                    Ok(received) => break received,
                    Err(_) => {
                        let waiting: Vec<&str> = table.values().map(|j| j.name()).collect();
                        tracing::warn!(
                            "No job completed in {}ms, still waiting on {:?}",
                            after.as_millis(),
                            waiting
                        );
                        for observer in &self.observers {
                            observer.on_stall(ctx, after, waiting.len()).await;
                        }
                    }
                }
            },
        };
        received.ok_or_else(|| {
            CoordError::channel("completions", "all senders dropped while jobs were pending")
        })
    }

    async fn transition(&mut self, ctx: &EpisodeContext, to: EpisodeState) {
        let from = std::mem::replace(&mut self.state, to);
        for observer in &self.observers {
            observer.on_transition(ctx, from, to).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::hooks::EpisodeObserver;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        remaining: Mutex<Vec<usize>>,
        transitions: Mutex<Vec<(EpisodeState, EpisodeState)>>,
        finished: Mutex<Option<bool>>,
        stalls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EpisodeObserver for Recorder {
        async fn on_completion(&self, _ctx: &EpisodeContext, event: &CompletionEvent) {
            self.remaining.lock().unwrap().push(event.remaining);
        }

        async fn on_transition(&self, _ctx: &EpisodeContext, from: EpisodeState, to: EpisodeState) {
            self.transitions.lock().unwrap().push((from, to));
        }

        async fn on_finish(&self, _ctx: &EpisodeContext, success: bool) {
            *self.finished.lock().unwrap() = Some(success);
        }

        async fn on_stall(&self, _ctx: &EpisodeContext, _waited: Duration, pending: usize) {
            self.stalls.lock().unwrap().push(pending);
        }
    }

    fn sleeper(name: &str, ms: u64) -> Job<u64> {
        Job::new(name, async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_set_shrinks_by_one() {
        let recorder = Arc::new(Recorder::default());
        let mut coordinator = Coordinator::with_defaults();
        coordinator.add_observer(recorder.clone());
        for ms in [40, 10, 30, 20] {
            coordinator.add(sleeper(&format!("s{ms}"), ms), |_| {}).unwrap();
        }

        let output = coordinator.run(|| async { Ok(()) }).await.unwrap();
        assert_eq!(*recorder.remaining.lock().unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(output.report.completion_order(), vec!["s10", "s20", "s30", "s40"]);
        assert_eq!(
            *recorder.transitions.lock().unwrap(),
            vec![
                (EpisodeState::NotStarted, EpisodeState::Draining),
                (EpisodeState::Draining, EpisodeState::Finalizing),
                (EpisodeState::Finalizing, EpisodeState::Done),
            ]
        );
        assert_eq!(*recorder.finished.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_final_step_failure_fails_episode() {
        let recorder = Arc::new(Recorder::default());
        let mut coordinator = Coordinator::with_defaults();
        coordinator.add_observer(recorder.clone());
        coordinator.add(sleeper("quick", 1), |_| {}).unwrap();

        let err = coordinator
            .run(|| async { Err::<(), _>(anyhow::anyhow!("juice carton empty")) })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "final_step");
        assert_eq!(
            recorder.transitions.lock().unwrap().last().copied(),
            Some((EpisodeState::Finalizing, EpisodeState::Failed))
        );
        assert_eq!(*recorder.finished.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_empty_batch_goes_straight_to_final_step() {
        let output = Coordinator::with_defaults()
            .run(|| async { Ok("juice") })
            .await
            .unwrap();
        assert_eq!(output.value, "juice");
        assert!(output.report.completions.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_started_job() {
        let mut coordinator = Coordinator::with_defaults();
        let mut started = sleeper("started", 1);
        started.start().unwrap();
        let err = coordinator.add(started, |_| {}).unwrap_err();
        assert_eq!(err.category(), "already_started");
        assert_eq!(coordinator.job_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoordinatorConfig::default().with_channel_capacity(0);
        assert!(Coordinator::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_warning_fires_and_keeps_waiting() {
        let config = CoordinatorConfig::default().with_stall_warning(Duration::from_millis(20));
        let recorder = Arc::new(Recorder::default());
        let mut coordinator = Coordinator::new(config).unwrap();
        coordinator.add_observer(recorder.clone());
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        coordinator
            .add(sleeper("slow", 50), move |outcome| {
                *s.lock().unwrap() = outcome.ok();
            })
            .unwrap();

        coordinator.run(|| async { Ok(()) }).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(50));
        // windows end at 20ms and 40ms; the job lands at 50ms
        assert_eq!(*recorder.stalls.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stall_reported_without_window() {
        let recorder = Arc::new(Recorder::default());
        let mut coordinator = Coordinator::with_defaults();
        coordinator.add_observer(recorder.clone());
        coordinator.add(sleeper("slow", 50), |_| {}).unwrap();

        coordinator.run(|| async { Ok(()) }).await.unwrap();
        assert!(recorder.stalls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_reported_before_and_after_run() {
        let mut coordinator = Coordinator::with_defaults();
        assert_eq!(coordinator.state(), EpisodeState::NotStarted);
        coordinator.add(sleeper("quick", 1), |_| {}).unwrap();
        assert_eq!(coordinator.state(), EpisodeState::NotStarted);

        let output = coordinator.run(|| async { Ok(()) }).await.unwrap();
        assert_eq!(output.report.state, EpisodeState::Done);
    }
}
