use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Run `work` for every item with at most `limit` in flight. Failures are logged per item
/// and never cancel peers; returns once every worker has finished, with the failure count.
pub async fn bounded_fan_out<T, F, Fut>(items: Vec<T>, limit: usize, scope: &str, work: F) -> usize
where
    T: Display + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let work = Arc::new(work);
    let mut set = JoinSet::new();

    for item in items {
        let semaphore = semaphore.clone();
        let work = work.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let label = item.to_string();
            (label, work(item).await)
        });
    }

    let mut failures = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((label, Err(e))) => {
                failures += 1;
                warn!(scope, item = %label, error = %format!("{:#}", e), "worker failed");
            }
            Err(e) => {
                failures += 1;
                warn!(scope, error = %e, "worker panicked");
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_respects_limit_and_isolates_failures() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let items: Vec<String> = (0..25).map(|i| format!("region-{}", i)).collect();

        let (r, p, d) = (running.clone(), peak.clone(), done.clone());
        let failures = bounded_fan_out(items, 4, "test", move |item: String| {
            let (r, p, d) = (r.clone(), p.clone(), d.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                r.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
                if item.ends_with('3') {
                    anyhow::bail!("{} unavailable", item);
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(done.load(Ordering::SeqCst), 25);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        // region-3, region-13, region-23
        assert_eq!(failures, 3);
    }
}
