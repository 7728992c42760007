// file: src/coalescer.rs
// description: Debounced refresh propagation keyed by consuming component

use crate::monitoring;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::trace;

type RefreshAction = Box<dyn FnOnce() + Send>;

struct CoalesceWindow {
    generation: u64,
    action: Option<RefreshAction>,
    timer: tokio::task::JoinHandle<()>,
}

struct Inner {
    next_generation: u64,
    windows: HashMap<String, CoalesceWindow>,
}

/// Collapses bursts of "please refresh" signals into at most one refresh
/// execution per debounce window, independently per key.
///
/// A new [`signal`](UpdateCoalescer::signal) for a key that already has a
/// pending window cancels it and starts over with the newly supplied delay
/// and action: the last writer wins, and the action runs exactly once per
/// coalesced burst. Callers wanting independent refresh targets must use
/// distinct keys (or distinct coalescer instances) to avoid coalescing
/// unrelated consumers together.
///
/// A zero delay executes the action immediately, superseding any pending
/// window for that key. This is the defined behavior for "no debounce",
/// matching how a non-positive delay is treated.
pub struct UpdateCoalescer {
    inner: Arc<Mutex<Inner>>,
}

impl Default for UpdateCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateCoalescer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_generation: 0,
                windows: HashMap::new(),
            })),
        }
    }

    /// Schedules `action` to run once `delay` elapses with no further signal
    /// for `key`. Supersedes any window already pending for the key.
    pub fn signal(&self, key: &str, delay: Duration, action: impl FnOnce() + Send + 'static) {
        monitoring::REFRESH_SIGNALS_COUNTER.increment(1);
        let mut inner = self.inner.lock().unwrap();
        if let Some(superseded) = inner.windows.remove(key) {
            superseded.timer.abort();
            trace!(key, "superseded pending refresh window");
        }

        if delay.is_zero() {
            drop(inner);
            monitoring::REFRESH_RUNS_COUNTER.increment(1);
            action();
            return;
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let windows = Arc::clone(&self.inner);
        let owner = key.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The window may have been cancelled, flushed, or superseded
            // while we slept; only the matching generation may fire.
            let action = {
                let mut inner = windows.lock().unwrap();
                let current = inner
                    .windows
                    .get(&owner)
                    .is_some_and(|window| window.generation == generation);
                if current {
                    inner.windows.remove(&owner).and_then(|window| window.action)
                } else {
                    None
                }
            };
            if let Some(action) = action {
                monitoring::REFRESH_RUNS_COUNTER.increment(1);
                action();
            }
        });

        inner.windows.insert(
            key.to_string(),
            CoalesceWindow {
                generation,
                action: Some(Box::new(action)),
                timer,
            },
        );
    }

    /// Cancels any pending window for `key` without running its action.
    /// Synchronous: once this returns the timer cannot fire.
    pub fn cancel(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(window) = inner.windows.remove(key) {
            window.timer.abort();
        }
    }

    /// Runs the pending action for `key` immediately and cancels its timer.
    /// No-op when nothing is pending.
    pub fn flush_now(&self, key: &str) {
        let action = {
            let mut inner = self.inner.lock().unwrap();
            match inner.windows.remove(key) {
                Some(window) => {
                    window.timer.abort();
                    window.action
                }
                None => None,
            }
        };
        if let Some(action) = action {
            monitoring::REFRESH_RUNS_COUNTER.increment(1);
            action();
        }
    }

    pub fn pending(&self, key: &str) -> bool {
        self.inner.lock().unwrap().windows.contains_key(key)
    }
}

impl Drop for UpdateCoalescer {
    fn drop(&mut self) {
        let inner = self.inner.lock().unwrap();
        for window in inner.windows.values() {
            window.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let reader = Arc::clone(&count);
        (count, move || reader.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_the_last_action_once() {
        let coalescer = UpdateCoalescer::new();
        let (first, first_runs) = counter();
        let (second, second_runs) = counter();
        let fired_at: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
        let t0 = Instant::now();

        coalescer.signal("portfolio", ms(1200), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        sleep(ms(500)).await;
        let sink = Arc::clone(&fired_at);
        coalescer.signal("portfolio", ms(1200), move || {
            second.fetch_add(1, Ordering::SeqCst);
            *sink.lock().unwrap() = Some(t0.elapsed());
        });

        sleep(ms(5000)).await;
        assert_eq!(first_runs(), 0);
        assert_eq!(second_runs(), 1);
        assert_eq!(*fired_at.lock().unwrap(), Some(ms(1700)));
        assert!(!coalescer.pending("portfolio"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signals_keep_deferring() {
        let coalescer = UpdateCoalescer::new();
        let (runs, run_count) = counter();

        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            coalescer.signal("market", ms(1000), move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            sleep(ms(400)).await;
        }
        // 2000ms in, nothing has fired yet.
        assert_eq!(run_count(), 0);

        sleep(ms(1100)).await;
        assert_eq!(run_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_execution() {
        let coalescer = UpdateCoalescer::new();
        let (runs, run_count) = counter();

        coalescer.signal("portfolio", ms(1200), move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert!(coalescer.pending("portfolio"));
        coalescer.cancel("portfolio");
        assert!(!coalescer.pending("portfolio"));

        sleep(ms(5000)).await;
        assert_eq!(run_count(), 0);

        // Cancelling an idle key is a no-op.
        coalescer.cancel("portfolio");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_runs_synchronously_and_only_once() {
        let coalescer = UpdateCoalescer::new();
        let (runs, run_count) = counter();

        coalescer.signal("portfolio", ms(1200), move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        coalescer.flush_now("portfolio");
        assert_eq!(run_count(), 1);

        // The original timer must not fire a second time.
        sleep(ms(5000)).await;
        assert_eq!(run_count(), 1);

        // Flushing an idle key is a no-op.
        coalescer.flush_now("portfolio");
        assert_eq!(run_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_executes_immediately() {
        let coalescer = UpdateCoalescer::new();
        let (slow, slow_runs) = counter();
        let (now, now_runs) = counter();

        // An immediate signal supersedes the pending window for its key.
        coalescer.signal("portfolio", ms(1200), move || {
            slow.fetch_add(1, Ordering::SeqCst);
        });
        coalescer.signal("portfolio", Duration::ZERO, move || {
            now.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(now_runs(), 1);
        assert!(!coalescer.pending("portfolio"));

        sleep(ms(5000)).await;
        assert_eq!(slow_runs(), 0);
        assert_eq!(now_runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_keys_do_not_interfere() {
        let coalescer = UpdateCoalescer::new();
        let (portfolio, portfolio_runs) = counter();
        let (market, market_runs) = counter();

        coalescer.signal("portfolio", ms(1200), move || {
            portfolio.fetch_add(1, Ordering::SeqCst);
        });
        coalescer.signal("market", ms(20_000), move || {
            market.fetch_add(1, Ordering::SeqCst);
        });

        sleep(ms(1300)).await;
        assert_eq!(portfolio_runs(), 1);
        assert_eq!(market_runs(), 0);

        sleep(ms(19_000)).await;
        assert_eq!(portfolio_runs(), 1);
        assert_eq!(market_runs(), 1);
    }
}
