//! Bounded concurrency executor.
//!
//! Runs a sequence of async operations under two limits at once: at most
//! `max_at_once` in flight, and at most `max_per_second` started in any
//! one-second window. Results stream back in completion order; one item's
//! failure is just that item's output and never cancels its siblings.

use std::future::Future;
use std::num::NonZeroU32;

use futures_util::stream::{self, Stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Concurrency and start-rate limits for one batch of operations.
pub struct Throttle {
    max_at_once: usize,
    max_per_second: Option<NonZeroU32>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("max_at_once", &self.max_at_once)
            .field("max_per_second", &self.max_per_second)
            .finish_non_exhaustive()
    }
}

impl Throttle {
    /// `max_at_once` is clamped to at least 1; `max_per_second == 0` disables
    /// the start-rate limit.
    pub fn new(max_at_once: usize, max_per_second: u32) -> Self {
        let max_per_second = NonZeroU32::new(max_per_second);
        // Burst of one spaces starts evenly, so no window holds more than the quota.
        let limiter = max_per_second
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)));
        Self {
            max_at_once: max_at_once.max(1),
            max_per_second,
            limiter,
        }
    }

    pub fn max_at_once(&self) -> usize {
        self.max_at_once
    }

    pub fn max_per_second(&self) -> Option<NonZeroU32> {
        self.max_per_second
    }

    /// Run `op` over every item, yielding each output as it completes.
    ///
    /// The returned stream is lazy: nothing starts until it is polled, and
    /// dropping it cancels whatever is still in flight.
    pub fn run<'a, I, F, Fut>(&'a self, items: I, mut op: F) -> impl Stream<Item = Fut::Output> + 'a
    where
        I: IntoIterator,
        I::IntoIter: 'a,
        F: FnMut(I::Item) -> Fut + 'a,
        Fut: Future + 'a,
    {
        stream::iter(items)
            .map(move |item| {
                let fut = op(item);
                async move {
                    if let Some(limiter) = &self.limiter {
                        limiter.until_ready().await;
                    }
                    fut.await
                }
            })
            .buffer_unordered(self.max_at_once)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Tracks how many operations are active at once.
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        async fn observe(&self, hold: Duration) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn peak_for(len: usize) -> (usize, usize) {
        let throttle = Throttle::new(5, 0);
        let gauge = &Gauge::default();
        let outputs: Vec<usize> = throttle
            .run(0..len, |i| async move {
                gauge.observe(Duration::from_millis(1)).await;
                i
            })
            .collect()
            .await;
        assert_eq!(gauge.active.load(Ordering::SeqCst), 0);
        (outputs.len(), gauge.peak.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn concurrency_ceiling_holds_for_all_sizes() {
        for len in [1, 5, 50, 500] {
            let (count, peak) = peak_for(len).await;
            assert_eq!(count, len);
            assert!(peak <= 5, "len {len}: peak {peak} exceeds 5");
            assert!(peak >= 1);
        }
    }

    #[tokio::test]
    async fn ceiling_reached_under_load() {
        let (_, peak) = peak_for(50).await;
        assert_eq!(peak, 5);
    }

    #[tokio::test]
    async fn failures_isolated_per_item() {
        let throttle = Throttle::new(4, 0);
        let results: Vec<Result<usize, String>> = throttle
            .run(0..50usize, |i| async move {
                if i % 2 == 1 {
                    Err(format!("item {i} failed"))
                } else {
                    Ok(i)
                }
            })
            .collect()
            .await;
        assert_eq!(results.len(), 50);
        let mut ok: Vec<usize> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        ok.sort_unstable();
        assert_eq!(ok, (0..50).step_by(2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn results_may_complete_out_of_order() {
        let throttle = Throttle::new(3, 0);
        let order: Vec<u64> = throttle
            .run([30u64, 1, 15], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms
            })
            .collect()
            .await;
        assert_eq!(order, vec![1, 15, 30]);
    }

    #[tokio::test]
    async fn start_rate_limited_per_second() {
        let throttle = Throttle::new(10, 5);
        let starts = &Mutex::new(Vec::new());
        let _: Vec<()> = throttle
            .run(0..8, |_| async move {
                starts.lock().unwrap().push(Instant::now());
            })
            .collect()
            .await;
        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 8);
        // Any six consecutive starts span at least a second
        for window in starts.windows(6) {
            let span = window[5] - window[0];
            assert!(span >= Duration::from_millis(900), "span {span:?}");
        }
    }

    #[test]
    fn zero_concurrency_clamped() {
        let throttle = Throttle::new(0, 0);
        assert_eq!(throttle.max_at_once(), 1);
        assert!(throttle.max_per_second().is_none());
    }
}
