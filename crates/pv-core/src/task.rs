//! Task helpers.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::error;

/// First wait before restarting a panicked task
const INITIAL_RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Longest wait between restarts; a run that outlived it resets the backoff
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

/// Spawn `fut` so that a panic inside it is logged instead of lost.
///
/// The work runs in its own task; a second task awaits it and reports a
/// panic or cancellation. Neither outcome affects other tasks.
pub fn spawn_guarded<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        if let Err(e) = inner.await {
            if e.is_panic() {
                error!(task = name, error = %e, "Task panicked");
            } else {
                error!(task = name, error = %e, "Task cancelled");
            }
        }
    })
}

/// Run the future `make` builds in its own task, building and running a
/// fresh one each time it panics.
///
/// Returns the output of the first run that completes, or `None` when
/// `shutdown` flips while a restart is pending.
pub async fn supervise<F, Fut>(
    name: &'static str,
    mut make: F,
    mut shutdown: watch::Receiver<bool>,
) -> Option<Fut::Output>
where
    F: FnMut() -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let mut backoff = INITIAL_RESTART_BACKOFF;

    loop {
        let started = Instant::now();
        match tokio::spawn(make()).await {
            Ok(output) => return Some(output),
            Err(e) if e.is_panic() => {
                if started.elapsed() > MAX_RESTART_BACKOFF {
                    backoff = INITIAL_RESTART_BACKOFF;
                }
                error!(
                    task = name,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Task panicked, restarting"
                );
            }
            Err(e) => {
                error!(task = name, error = %e, "Task cancelled");
                return None;
            }
        }

        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.wait_for(|stop| *stop) => return None,
        }
        backoff = (backoff * 2).min(MAX_RESTART_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_panic_is_contained() {
        let handle = spawn_guarded("test", async {
            panic!("boom");
        });
        // The supervising task completes normally
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_normal_completion() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_guarded("test", async move {
            let _ = tx.send(42);
        })
        .await
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    /// A run that panics on its first `failures` attempts
    async fn flaky(attempt: usize, failures: usize) -> usize {
        if attempt < failures {
            panic!("attempt {}", attempt);
        }
        attempt
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_restarts_after_panic() {
        let (_tx, rx) = watch::channel(false);
        let attempts = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let counter = attempts.clone();
        let output = supervise(
            "test",
            move || flaky(counter.fetch_add(1, Ordering::SeqCst), 2),
            rx,
        )
        .await;

        assert_eq!(output, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Waited 1s, then 2s, between the three runs
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_stops_on_shutdown_during_backoff() {
        let (tx, rx) = watch::channel(false);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let supervisor = tokio::spawn(supervise(
            "test",
            move || flaky(counter.fetch_add(1, Ordering::SeqCst), usize::MAX),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        let output = supervisor.await.unwrap();
        assert!(output.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
