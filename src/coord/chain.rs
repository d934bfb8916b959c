//! Ordered sub-stage chains
//!
//! A chain runs its stages strictly one after another inside a single job:
//! each stage receives the previous stage's value and only starts once that
//! value exists. The first failing stage ends the chain.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::debug;

use crate::coord::job::{Job, JobOutcome};
use crate::core::errors::JobFailure;

pub struct Chain<T> {
    stages: Vec<String>,
    work: BoxFuture<'static, JobOutcome<T>>,
}

impl<T: Send + 'static> Chain<T> {
    /// Start a chain with its first stage
    pub fn first<F>(stage: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let stage = stage.into();
        let label = stage.clone();
        let work = async move {
            debug!(stage = %label, index = 0, "chain stage starting");
            work.await.map_err(|e| JobFailure::stage(label, 0, e))
        }
        .boxed();
        Self {
            stages: vec![stage],
            work,
        }
    }

    /// Append an async stage consuming the previous stage's value
    pub fn then<U, F, Fut>(self, stage: impl Into<String>, f: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let Chain { mut stages, work } = self;
        let index = stages.len();
        let stage = stage.into();
        let label = stage.clone();
        stages.push(stage);

        let work = async move {
            let value = work.await?;
            debug!(stage = %label, index, "chain stage starting");
            f(value)
                .await
                .map_err(|e| JobFailure::stage(label, index, e))
        }
        .boxed();
        Chain { stages, work }
    }

    /// Append a synchronous stage
    pub fn then_sync<U, F>(self, stage: impl Into<String>, f: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        self.then(stage, move |value| futures::future::ready(f(value)))
    }

    /// Stage labels in execution order
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Run the chain inline on the current task
    pub async fn run(self) -> JobOutcome<T> {
        self.work.await
    }

    /// Wrap the chain as a job; the job completes when the last stage does.
    pub fn into_job(self, name: impl Into<String>) -> Job<T> {
        Job::from_outcome(name, self.work)
    }
}

impl<T> std::fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("stages", &self.stages).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn record(trace: &Trace, entry: &str) {
        trace.lock().unwrap().push(entry.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_in_sequence() {
        let trace: Trace = Arc::default();
        let (p1, p2, p3) = (trace.clone(), trace.clone(), trace.clone());

        let chain = Chain::first("toast", async move {
            record(&p1, "toast:start");
            tokio::time::sleep(Duration::from_millis(30)).await;
            record(&p1, "toast:end");
            Ok(vec!["bread".to_string()])
        })
        .then("butter", move |mut toast: Vec<String>| async move {
            record(&p2, "butter:start");
            tokio::time::sleep(Duration::from_millis(10)).await;
            toast.push("butter".to_string());
            record(&p2, "butter:end");
            Ok(toast)
        })
        .then_sync("jam", move |mut toast: Vec<String>| {
            record(&p3, "jam");
            toast.push("jam".to_string());
            Ok(toast)
        });

        assert_eq!(chain.stages(), &["toast", "butter", "jam"]);
        let toast = chain.run().await.unwrap();
        assert_eq!(toast, vec!["bread", "butter", "jam"]);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["toast:start", "toast:end", "butter:start", "butter:end", "jam"]
        );
    }

    #[tokio::test]
    async fn test_failing_stage_aborts_remainder() {
        let trace: Trace = Arc::default();
        let p = trace.clone();

        let chain = Chain::first("toast", async { Ok(1u32) })
            .then_sync("butter", |_| -> anyhow::Result<u32> { anyhow::bail!("no butter left") })
            .then_sync("jam", move |n| {
                record(&p, "jam");
                Ok(n + 1)
            });

        let err = chain.run().await.unwrap_err();
        assert!(matches!(err, JobFailure::Stage { index: 1, .. }));
        assert_eq!(err.stage_name(), Some("butter"));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_stage_failure_is_indexed() {
        let chain = Chain::first("toast", async { Err::<u8, _>(anyhow::anyhow!("toaster unplugged")) });
        let err = chain.run().await.unwrap_err();
        assert_eq!(err.to_string(), "stage 0 (toast) failed: toaster unplugged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_job_completes_after_last_stage() {
        let trace: Trace = Arc::default();
        let p = trace.clone();
        let mut job = Chain::first("wait", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(2u32)
        })
        .then_sync("double", move |n| {
            record(&p, "double");
            Ok(n * 2)
        })
        .into_job("doubler");

        job.start().unwrap();
        assert!(!job.is_done());
        job.wait().await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["double"]);
        assert_eq!(job.take_result().unwrap().unwrap(), 4);
    }
}
