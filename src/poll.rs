//! Bounded, fixed-interval polling of an asynchronous remote job.
//!
//! Each attempt is reduced to a [`PollOutcome`] by the caller's query
//! function; [`run_poll_loop`] alone decides whether to stop, sleep or give up.
//! Query faults never escape as errors: they come back as
//! `PollOutcome::TransientError` and are retried like an empty result.

use crate::cancel::CancelToken;
use crate::config::PollSettings;
use crate::error::{PipelineError, Result};
use crate::{logi, logok, logw};
use std::future::Future;
use std::time::Duration;

/// What a single status query observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job finished and its result lives at this URL.
    Ready(String),
    /// The job exists but has no result yet.
    Empty,
    /// The query itself failed; worth another try.
    TransientError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep before the first query. The remote side never answers earlier.
    pub initial_wait: Duration,
    /// Total number of queries. Zero is treated as one.
    pub max_retries: u32,
    /// Fixed sleep between two queries.
    pub wait_time: Duration,
}

impl PollPolicy {
    /// 120 s grace, then up to 10 queries 30 s apart.
    pub fn standard() -> Self {
        Self {
            initial_wait: Duration::from_secs(120),
            max_retries: 10,
            wait_time: Duration::from_secs(30),
        }
    }

    /// 150 s grace, then up to 5 queries 30 s apart.
    pub fn patient() -> Self {
        Self {
            initial_wait: Duration::from_secs(150),
            max_retries: 5,
            wait_time: Duration::from_secs(30),
        }
    }

    pub fn new(initial_wait: Duration, max_retries: u32, wait_time: Duration) -> Self {
        Self {
            initial_wait,
            max_retries,
            wait_time,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Longest time the loop can spend after the grace period.
    pub fn worst_case(&self) -> Duration {
        self.wait_time.saturating_mul(self.attempts() - 1)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(settings: &PollSettings) -> Self {
        Self {
            initial_wait: Duration::from_secs(settings.initial_wait_secs),
            max_retries: settings.max_retries,
            wait_time: Duration::from_secs(settings.wait_secs),
        }
    }
}

/// Query until `Ready`, sleeping `policy.wait_time` after every other outcome.
///
/// `query` receives the 1-based attempt number. The grace period is not part
/// of the loop; callers sleep `policy.initial_wait` themselves when the job was
/// just submitted.
///
/// # Errors
///
/// `RetryExhausted` after `max_retries` unsuccessful queries, `Cancelled` if
/// `cancel` fires between or during attempts.
pub async fn run_poll_loop<F, Fut>(
    job_id: &str,
    policy: &PollPolicy,
    cancel: &CancelToken,
    mut query: F,
) -> Result<String>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollOutcome>,
{
    let attempts = policy.attempts();

    for attempt in 1..=attempts {
        cancel.check()?;

        match query(attempt).await {
            PollOutcome::Ready(url) => {
                logok(format!(
                    "Video {} ready after {} attempt(s): {}",
                    job_id, attempt, url
                ));
                return Ok(url);
            }
            PollOutcome::Empty => {
                logi(format!(
                    "Attempt {}/{}: video still processing",
                    attempt, attempts
                ));
            }
            PollOutcome::TransientError(cause) => {
                logw(format!("Attempt {}/{} failed: {}", attempt, attempts, cause));
            }
        }

        if attempt < attempts {
            logi(format!("Waiting {} seconds...", policy.wait_time.as_secs_f64()));
            cancel.sleep(policy.wait_time).await?;
        }
    }

    logw(format!(
        "Giving up on video {} after {} attempts",
        job_id, attempts
    ));
    Err(PipelineError::RetryExhausted {
        job_id: job_id.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, max_retries, Duration::from_millis(10))
    }

    #[test]
    fn test_presets() {
        let standard = PollPolicy::standard();
        assert_eq!(standard.max_retries, 10);
        assert_eq!(standard.wait_time, Duration::from_secs(30));
        assert_eq!(standard.initial_wait, Duration::from_secs(120));
        assert_eq!(standard.worst_case(), Duration::from_secs(270));

        let patient = PollPolicy::patient();
        assert_eq!(patient.max_retries, 5);
        assert_eq!(patient.initial_wait, Duration::from_secs(150));
    }

    #[test]
    fn test_from_settings() {
        let settings = PollSettings {
            initial_wait_secs: 7,
            max_retries: 3,
            wait_secs: 2,
        };
        let policy = PollPolicy::from(&settings);
        assert_eq!(policy, PollPolicy::new(Duration::from_secs(7), 3, Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_ready_after_k_empty_results() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = fast_policy(10);

        let start = Instant::now();
        let url = run_poll_loop("job", &policy, &CancelToken::new(), |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    PollOutcome::Empty
                } else {
                    PollOutcome::Ready("https://cdn.example/v.mp4".to_string())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(url, "https://cdn.example/v.mp4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_always_empty_exhausts_without_extra_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = fast_policy(5);

        let result = run_poll_loop("job-7", &policy, &CancelToken::new(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { PollOutcome::Empty }
        })
        .await;

        match result {
            Err(PipelineError::RetryExhausted { job_id, attempts }) => {
                assert_eq!(job_id, "job-7");
                assert_eq!(attempts, 5);
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let policy = fast_policy(4);

        let url = run_poll_loop("job", &policy, &CancelToken::new(), |attempt| {
            log.lock().unwrap().push(attempt);
            async move {
                match attempt {
                    1 => PollOutcome::TransientError("connection reset".to_string()),
                    2 => PollOutcome::Empty,
                    _ => PollOutcome::Ready("u".to_string()),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(url, "u");
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_no_sleep_after_last_attempt() {
        let policy = PollPolicy::new(Duration::ZERO, 1, Duration::from_secs(30));
        let start = Instant::now();
        let result = run_poll_loop("job", &policy, &CancelToken::new(), |_| async {
            PollOutcome::Empty
        })
        .await;
        assert!(result.unwrap_err().is_retry_exhausted());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_retries_still_queries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = fast_policy(0);
        let _ = run_poll_loop("job", &policy, &CancelToken::new(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { PollOutcome::Empty }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_before_next_query() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = PollPolicy::new(Duration::ZERO, 10, Duration::from_secs(30));

        let result = run_poll_loop("job", &policy, &token, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            trigger.cancel();
            async { PollOutcome::Empty }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
