//! Bounded sample polling.
//!
//! Polls a `MetricsSource` at a fixed interval (no backoff) until a
//! complete sample shows up or the timeout expires.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use fleet_core::WorkerMetrics;
use fleet_core::config::MetricsConfig;

use crate::error::{SampleError, SampleResult};
use crate::source::MetricsSource;

#[derive(Debug, Clone)]
pub struct SamplePoller {
    retry_interval: Duration,
    timeout: Duration,
}

impl SamplePoller {
    pub fn new(retry_interval: Duration, timeout: Duration) -> Self {
        Self {
            retry_interval,
            timeout,
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.retry_interval(), config.sample_timeout())
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a complete sample from `worker_id`.
    ///
    /// The source is polled at least once, even with a zero timeout.
    pub async fn collect<S>(&self, source: &S, worker_id: &str) -> SampleResult<WorkerMetrics>
    where
        S: MetricsSource,
    {
        let started = Instant::now();
        // `None` means the deadline lies beyond what `Instant` can represent.
        let deadline = started.checked_add(self.timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(sample) = source.sample(worker_id).await {
                if attempts > 1 {
                    debug!(worker = %worker_id, attempts, "sample available after retry");
                }
                return Ok(sample);
            }

            let next_poll = Instant::now().checked_add(self.retry_interval);
            let expired = match (next_poll, deadline) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(next), Some(deadline)) => next > deadline,
            };
            if expired {
                return Err(SampleError::Timeout {
                    worker: worker_id.to_string(),
                    attempts,
                    waited: started.elapsed(),
                });
            }

            trace!(worker = %worker_id, attempts, "sample not ready, retrying");
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports nothing for the first `absent_polls` polls.
    struct LateSource {
        absent_polls: u32,
        polls: AtomicU32,
    }

    impl LateSource {
        fn new(absent_polls: u32) -> Self {
            Self {
                absent_polls,
                polls: AtomicU32::new(0),
            }
        }
    }

    impl MetricsSource for LateSource {
        async fn sample(&self, _worker_id: &str) -> Option<WorkerMetrics> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            (n >= self.absent_polls).then_some(WorkerMetrics {
                cpu_percent: 10.0,
                memory_usage_percent: 20.0,
                inbound_traffic: 0.0,
                outbound_traffic: 0.0,
                busy_worker_threads: 2,
                avg_request_processing_ms: 100,
            })
        }
    }

    #[tokio::test]
    async fn returns_immediately_when_ready() {
        let source = LateSource::new(0);
        let poller = SamplePoller::new(Duration::from_millis(5), Duration::from_millis(50));

        let sample = poller.collect(&source, "app1").await.unwrap();
        assert_eq!(sample.busy_worker_threads, 2);
        assert_eq!(source.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_sample_appears() {
        let source = LateSource::new(3);
        let poller = SamplePoller::new(Duration::from_millis(2), Duration::from_secs(5));

        poller.collect(&source, "app1").await.unwrap();
        assert_eq!(source.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unbounded_timeout_does_not_overflow() {
        let source = LateSource::new(2);
        let poller = SamplePoller::new(Duration::from_millis(1), Duration::MAX);

        poller.collect(&source, "app1").await.unwrap();
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_on_silent_worker() {
        let source = LateSource::new(u32::MAX);
        let poller = SamplePoller::new(Duration::from_millis(5), Duration::from_millis(30));

        let err = poller.collect(&source, "app7").await.unwrap_err();
        let SampleError::Timeout {
            worker, attempts, ..
        } = err;
        assert_eq!(worker, "app7");
        assert!(attempts >= 1);
        assert!(attempts <= 7, "polled {attempts} times");
    }

    #[tokio::test]
    async fn zero_timeout_polls_once() {
        let source = LateSource::new(u32::MAX);
        let poller = SamplePoller::new(Duration::from_millis(5), Duration::ZERO);

        assert!(poller.collect(&source, "app1").await.is_err());
        assert_eq!(source.polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_config_reads_durations() {
        let config = MetricsConfig {
            retry_interval: "250ms".to_string(),
            sample_timeout: "3s".to_string(),
            ..MetricsConfig::default()
        };
        let poller = SamplePoller::from_config(&config);
        assert_eq!(poller.retry_interval(), Duration::from_millis(250));
        assert_eq!(poller.timeout(), Duration::from_secs(3));
    }
}
