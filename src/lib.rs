// Core infrastructure modules
pub mod core {
    pub mod errors;
    pub mod config;
}

pub mod coord;      // Jobs, chains and the completion-order coordinator
pub mod breakfast;  // Demo batch built on the coordinator

// Re-exports for convenience
pub use core::errors::{CoordError, JobFailure, Result};
pub use core::config::CoordinatorConfig;
pub use coord::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_mixed_result_types_in_one_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = Coordinator::with_defaults();

        let c = calls.clone();
        coordinator
            .add(
                Job::new("number", async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(42u64)
                }),
                move |outcome| {
                    assert_eq!(outcome.unwrap(), 42);
                    c.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let c = calls.clone();
        coordinator
            .add(
                Chain::first("text", async { Ok("egg".to_string()) })
                    .then_sync("plural", |s: String| Ok(format!("{s}s")))
                    .into_job("words"),
                move |outcome| {
                    assert_eq!(outcome.unwrap(), "eggs");
                    c.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let output = coordinator.run(|| async { Ok(2) }).await.unwrap();
        assert_eq!(output.value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(output.report.completion_order(), vec!["words", "number"]);
    }
}
