use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::try_join_all;

// Split `items` into at most `workers` contiguous slices, run `f` over each slice on the
// blocking pool and wait for all of them. Results come back in input order.
pub async fn parallel_map<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Vec<R> + Send + Sync + 'static,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let workers = workers.clamp(1, items.len());
    let slice_len = items.len().div_ceil(workers);
    let f = Arc::new(f);
    let mut items = items.into_iter();
    let mut handles = Vec::with_capacity(workers);
    loop {
        let slice: Vec<T> = items.by_ref().take(slice_len).collect();
        if slice.is_empty() {
            break;
        }
        let f = Arc::clone(&f);
        handles.push(tokio::task::spawn_blocking(move || f(slice)));
    }

    let results = try_join_all(handles).await.context("worker task failed")?;
    Ok(results.into_iter().flatten().collect())
}
