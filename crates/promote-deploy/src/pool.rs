//! Bounded fan-out for per-entity utility calls.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// Run `task` over `items` with at most `limit` in flight.
///
/// Items are dispatched in order. After the first failure nothing new is
/// dispatched; calls already running are awaited, never aborted. Returns
/// results in item order, or the error of the lowest failing item.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, task: F) -> DeployResult<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = DeployResult<R>> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let halted = Arc::new(AtomicBool::new(false));
    let mut set = JoinSet::new();

    for (position, item) in items.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DeployError::Task(e.to_string()))?;
        if halted.load(Ordering::SeqCst) {
            debug!(dispatched = position, total, "halting dispatch after failure");
            break;
        }
        let call = task(item);
        let halted = halted.clone();
        set.spawn(async move {
            let result = call.await;
            if result.is_err() {
                halted.store(true, Ordering::SeqCst);
            }
            drop(permit);
            (position, result)
        });
    }

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    let mut failure: Option<(usize, DeployError)> = None;
    while let Some(joined) = set.join_next().await {
        let (position, result) = joined.map_err(|e| DeployError::Task(e.to_string()))?;
        match result {
            Ok(value) => slots[position] = Some(value),
            Err(err) => {
                if failure.as_ref().is_none_or(|(first, _)| position < *first) {
                    failure = Some((position, err));
                }
            }
        }
    }

    if let Some((_, err)) = failure {
        return Err(err);
    }
    Ok(slots.into_iter().flatten().collect())
}
