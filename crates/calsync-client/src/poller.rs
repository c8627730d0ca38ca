//! Periodic sync loop for `calsync watch`.
//!
//! Runs a sync immediately, then again after every interval. The interval is
//! stretched by a random jitter so several clients do not poll in lockstep.
//! After a failure the next attempt waits an exponential backoff instead.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Maximum jitter added to the interval, as a fraction of it (0.0-1.0).
    pub jitter_fraction: f64,
    /// Wait after the first failure.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            jitter_fraction: 0.1,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl PollerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Interval plus a random jitter.
    pub fn next_delay(&self) -> Duration {
        let range = self.interval.as_secs_f64() * self.jitter_fraction;
        let jitter = if range > 0.0 {
            rand::rng().random_range(0.0..range)
        } else {
            0.0
        };
        self.interval + Duration::from_secs_f64(jitter)
    }

    /// Wait after `consecutive_failures` failures in a row (at least one).
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub syncs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Runs `sync` until `shutdown` resolves. A sync in progress is finished
    /// before the loop stops.
    pub async fn run<F, Fut, E, S>(&self, mut sync: F, shutdown: S) -> PollerStats
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
        S: Future<Output = ()>,
    {
        let mut stats = PollerStats::default();
        tokio::pin!(shutdown);

        info!(interval_secs = self.config.interval.as_secs(), "poller started");

        loop {
            stats.syncs += 1;
            match sync().await {
                Ok(()) => {
                    debug!(sync = stats.syncs, "sync completed");
                    stats.consecutive_failures = 0;
                }
                Err(e) => {
                    stats.failures += 1;
                    stats.consecutive_failures += 1;
                    warn!(error = %e, failures = stats.consecutive_failures, "sync failed");
                }
            }

            let delay = if stats.consecutive_failures > 0 {
                self.config.backoff_delay(stats.consecutive_failures)
            } else {
                self.config.next_delay()
            };
            debug!(delay_ms = delay.as_millis() as u64, "scheduling next sync");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!(syncs = stats.syncs, failures = stats.failures, "poller stopping");
                    return stats;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn fixed(interval_secs: u64) -> PollerConfig {
        PollerConfig::new(Duration::from_secs(interval_secs))
            .with_jitter(0.0)
            .with_backoff(Duration::from_secs(5), Duration::from_secs(30), 2.0)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = fixed(60);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let config = PollerConfig::new(Duration::from_secs(100)).with_jitter(0.1);
        for _ in 0..100 {
            let delay = config.next_delay();
            assert!(delay >= Duration::from_secs(100));
            assert!(delay < Duration::from_secs(110));
        }
        assert_eq!(fixed(100).next_delay(), Duration::from_secs(100));
    }

    #[test]
    fn jitter_fraction_is_clamped() {
        assert_eq!(PollerConfig::default().with_jitter(3.0).jitter_fraction, 1.0);
        assert_eq!(PollerConfig::default().with_jitter(-1.0).jitter_fraction, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_after_failures_then_resumes_interval() {
        let start = Instant::now();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();

        let stats = Poller::new(fixed(60))
            .run(
                move || {
                    let recorded = recorded.clone();
                    async move {
                        let mut calls = recorded.lock().unwrap();
                        calls.push(start.elapsed().as_secs());
                        if calls.len() <= 2 {
                            Err("relay unavailable")
                        } else {
                            Ok(())
                        }
                    }
                },
                tokio::time::sleep(Duration::from_secs(100)),
            )
            .await;

        assert_eq!(*calls.lock().unwrap(), vec![0, 5, 15, 75]);
        assert_eq!(
            stats,
            PollerStats {
                syncs: 4,
                failures: 2,
                consecutive_failures: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_between_syncs() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut tx = Some(tx);

        let stats = Poller::new(fixed(60))
            .run(
                move || {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(());
                    }
                    async { Ok::<(), String>(()) }
                },
                async {
                    let _ = rx.await;
                },
            )
            .await;

        assert_eq!(stats.syncs, 1);
    }
}
