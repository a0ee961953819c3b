//! Bounded parallel execution over a batch of work items.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::EngineError;

/// Concurrency settings for batch operations.
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    /// Maximum number of work items in flight at once.
    pub limit: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { limit: 8 }
    }
}

/// Run `op` over every item with at most `limit` in flight.
///
/// Every item runs to completion regardless of sibling failures. Failures
/// are collected, labelled with the item's display form, and reported as a
/// single [`EngineError::Aggregate`] once the whole batch has finished.
pub async fn parallel_each<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    op: F,
) -> Result<(), EngineError>
where
    T: std::fmt::Display + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    if items.is_empty() {
        return Ok(());
    }

    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let op = Arc::new(op);

    let mut tasks = JoinSet::new();
    for item in items {
        let semaphore = Arc::clone(&semaphore);
        let op = Arc::clone(&op);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("fanout semaphore is never closed");
            let label = item.to_string();
            op(item).await.map_err(|error| format!("{label}: {error}"))
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(message)) => failures.push(message),
            Err(join_error) => failures.push(format!("task panicked: {join_error}")),
        }
    }

    if failures.is_empty() {
        return Ok(());
    }

    failures.sort();
    Err(EngineError::Aggregate(failures.join("\n")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn empty_batch_is_ok() {
        let result = parallel_each(Vec::<String>::new(), 4, |_| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn all_items_run_despite_failures() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_op = Arc::clone(&ran);

        let items: Vec<String> = (0..5).map(|index| format!("item-{index}")).collect();
        let err = parallel_each(items, 2, move |item: String| {
            let ran = Arc::clone(&ran_in_op);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Upstream(format!("boom from {item}")))
            }
        })
        .await
        .expect_err("must aggregate");

        assert_eq!(ran.load(Ordering::SeqCst), 5);
        let EngineError::Aggregate(report) = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(report.lines().count(), 5);
        for index in 0..5 {
            assert!(report.contains(&format!("item-{index}: ")));
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let in_flight_op = Arc::clone(&in_flight);
        let peak_op = Arc::clone(&peak);
        let items: Vec<String> = (0..16).map(|index| format!("item-{index}")).collect();

        parallel_each(items, 3, move |_| {
            let in_flight = Arc::clone(&in_flight_op);
            let peak = Arc::clone(&peak_op);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .expect("must succeed");

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
