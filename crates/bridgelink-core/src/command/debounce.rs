// ── Command debouncing ──
//
// Each call takes a ticket from a monotonically increasing counter, waits
// the quiet period, and only runs if no newer ticket was issued meanwhile.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of a debounced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Debounced<T> {
    Executed(T),
    /// A newer call on the same debouncer took over.
    Superseded,
}

#[derive(Debug)]
pub struct CommandDebouncer {
    delay: Duration,
    latest: AtomicU64,
}

impl CommandDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: AtomicU64::new(0),
        }
    }

    pub async fn run<F, Fut, T>(&self, f: F) -> Debounced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::time::sleep(self.delay).await;
        if self.latest.load(Ordering::Acquire) != ticket {
            return Debounced::Superseded;
        }
        Debounced::Executed(f().await)
    }

    /// Invalidate every call still waiting out its quiet period.
    pub fn supersede(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn only_the_last_of_a_burst_runs() {
        let debouncer = Arc::new(CommandDebouncer::new(Duration::from_millis(150)));
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for value in [10_u8, 20, 30] {
            let debouncer = Arc::clone(&debouncer);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                debouncer
                    .run(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        value
                    })
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                Debounced::Superseded,
                Debounced::Superseded,
                Debounced::Executed(30)
            ]
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supersede_drops_waiting_calls() {
        let debouncer = Arc::new(CommandDebouncer::new(Duration::from_millis(150)));
        let waiting = {
            let debouncer = Arc::clone(&debouncer);
            tokio::spawn(async move { debouncer.run(|| async { 50 }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        debouncer.supersede();

        assert_eq!(waiting.await.unwrap(), Debounced::Superseded);
        assert_eq!(debouncer.run(|| async { 7 }).await, Debounced::Executed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_all_run() {
        let debouncer = CommandDebouncer::new(Duration::from_millis(150));
        assert_eq!(debouncer.run(|| async { 1 }).await, Debounced::Executed(1));
        assert_eq!(debouncer.run(|| async { 2 }).await, Debounced::Executed(2));
    }
}
