//! Episode observers
//!
//! Observers watch an episode from the outside. They never touch the pending
//! set; per-job reactions are the place for job-specific side effects.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::types::{CompletionEvent, EpisodeState};

/// Context provided to observers
#[derive(Clone, Debug)]
pub struct EpisodeContext {
    /// Run ID for this episode
    pub run_id: Uuid,
    /// Configured episode name
    pub name: String,
    /// Number of jobs in the batch
    pub job_count: usize,
}

#[async_trait]
pub trait EpisodeObserver: Send + Sync {
    /// Called after a job's reaction ran and it left the pending set
    async fn on_completion(&self, ctx: &EpisodeContext, event: &CompletionEvent);

    /// Called on every episode state change
    async fn on_transition(&self, _ctx: &EpisodeContext, _from: EpisodeState, _to: EpisodeState) {}

    /// Called once the final step returned
    async fn on_finish(&self, _ctx: &EpisodeContext, _success: bool) {}

    /// Called each time the stall window passes with no completion
    async fn on_stall(&self, _ctx: &EpisodeContext, _waited: Duration, _pending: usize) {}
}

/// Composite observer that fans out to several observers
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn EpisodeObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EpisodeObserver>) {
        self.observers.push(observer);
    }
}

#[async_trait]
impl EpisodeObserver for CompositeObserver {
    async fn on_completion(&self, ctx: &EpisodeContext, event: &CompletionEvent) {
        for observer in &self.observers {
            observer.on_completion(ctx, event).await;
        }
    }

    async fn on_transition(&self, ctx: &EpisodeContext, from: EpisodeState, to: EpisodeState) {
        for observer in &self.observers {
            observer.on_transition(ctx, from, to).await;
        }
    }

    async fn on_finish(&self, ctx: &EpisodeContext, success: bool) {
        for observer in &self.observers {
            observer.on_finish(ctx, success).await;
        }
    }

    async fn on_stall(&self, ctx: &EpisodeContext, waited: Duration, pending: usize) {
        for observer in &self.observers {
            observer.on_stall(ctx, waited, pending).await;
        }
    }
}

/// Logs every episode event through `tracing`
pub struct LoggingObserver;

#[async_trait]
impl EpisodeObserver for LoggingObserver {
    async fn on_completion(&self, ctx: &EpisodeContext, event: &CompletionEvent) {
        match &event.error {
            None => tracing::info!(
                "{}: {} ({}) completed after {}ms, {} pending",
                ctx.name,
                event.name,
                event.job,
                event.elapsed.as_millis(),
                event.remaining
            ),
            Some(error) => tracing::warn!(
                "{}: {} ({}) failed after {}ms, {} pending: {}",
                ctx.name,
                event.name,
                event.job,
                event.elapsed.as_millis(),
                event.remaining,
                error
            ),
        }
    }

    async fn on_transition(&self, ctx: &EpisodeContext, from: EpisodeState, to: EpisodeState) {
        tracing::debug!("{}: {:?} -> {:?}", ctx.name, from, to);
    }

    async fn on_finish(&self, ctx: &EpisodeContext, success: bool) {
        if success {
            tracing::info!("{}: episode {} done", ctx.name, ctx.run_id);
        } else {
            tracing::error!("{}: episode {} failed in final step", ctx.name, ctx.run_id);
        }
    }

    async fn on_stall(&self, ctx: &EpisodeContext, waited: Duration, pending: usize) {
        tracing::debug!(
            "{}: quiet for {}ms with {} jobs pending",
            ctx.name,
            waited.as_millis(),
            pending
        );
    }
}
