//! Retry schedule for provider calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use handoff_config::RetryConfig;
use handoff_core::error::ProviderError;
use tracing::warn;

/// Reported to the retry observer after every failed attempt.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Zero-based number of the attempt that failed
    pub tries: usize,

    /// Delay before the next attempt; zero when none will follow
    pub sleep_time: Duration,

    /// Rendered error of the failed attempt
    pub error: String,
}

/// Callback invoked once per failed attempt.
pub type RetryObserver = Arc<dyn Fn(&RetryState) + Send + Sync>;

/// How often and how patiently provider calls are retried.
///
/// `delays[n]` is the pause before attempt `n`, so the schedule's length is
/// also the maximum number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
    pub enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: [0, 5, 10, 30, 60]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            enabled: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            delays: config
                .delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            enabled: config.enabled,
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            enabled: true,
        }
    }

    /// A policy that fails on the first error.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds or the schedule is exhausted.
    pub async fn run<T, F, Fut>(
        &self,
        observer: Option<&RetryObserver>,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut tries = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let retrying = self.enabled && tries + 1 < self.delays.len();
            let sleep_time = if retrying {
                self.delays[tries + 1]
            } else {
                Duration::ZERO
            };

            if let Some(observer) = observer {
                observer(&RetryState {
                    tries,
                    sleep_time,
                    error: error.to_string(),
                });
            }

            if !retrying {
                warn!(tries, %error, "Provider call failed, giving up");
                return Err(error);
            }

            warn!(tries, ?sleep_time, %error, "Provider call failed, retrying");
            tokio::time::sleep(sleep_time).await;
            tries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_observer() -> (RetryObserver, Arc<Mutex<Vec<RetryState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: RetryObserver = Arc::new(move |state: &RetryState| {
            sink.lock().unwrap().push(state.clone());
        });
        (observer, seen)
    }

    fn network_error() -> ProviderError {
        ProviderError::Network("connection reset".into())
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_three_failures() {
        let calls = &AtomicUsize::new(0);
        let (observer, seen) = recording_observer();
        let started = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run(Some(&observer), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(network_error())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let seen = seen.lock().unwrap();
        let tries: Vec<usize> = seen.iter().map(|s| s.tries).collect();
        assert_eq!(tries, vec![0, 1, 2]);
        let sleeps: Vec<u64> = seen.iter().map(|s| s.sleep_time.as_secs()).collect();
        assert_eq!(sleeps, vec![5, 10, 30]);
        assert!(seen[0].error.contains("connection reset"));
        assert!(started.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_schedule_returns_last_error() {
        let calls = &AtomicUsize::new(0);
        let (observer, seen) = recording_observer();

        let result: Result<(), _> = RetryPolicy::default()
            .run(Some(&observer), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Network(format!("attempt {n}")))
            })
            .await;

        assert_eq!(
            result.unwrap_err().to_string(),
            ProviderError::Network("attempt 4".into()).to_string()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[4].sleep_time, Duration::ZERO);
    }

    #[tokio::test]
    async fn disabled_policy_fails_fast() {
        let calls = &AtomicUsize::new(0);
        let (observer, seen) = recording_observer();

        let result: Result<(), _> = RetryPolicy::disabled()
            .run(Some(&observer), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(network_error())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sleep_time, Duration::ZERO);
    }

    #[tokio::test]
    async fn success_skips_observer() {
        let (observer, seen) = recording_observer();
        let value = RetryPolicy::default()
            .run(Some(&observer), move || async move { Ok::<_, ProviderError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            enabled: false,
            delays_secs: vec![0, 2],
        });
        assert!(!policy.enabled);
        assert_eq!(policy.delays, vec![Duration::ZERO, Duration::from_secs(2)]);
    }
}
