use crate::error::{PipelineError, Result};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::time::Instant;

/// Longest uninterrupted stretch a cancellable sleep waits before re-checking.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Shared abort flag for long-running stages. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration`, returning `Cancelled` as soon as the flag is seen.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(SLEEP_SLICE)).await;
            self.check()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let start = std::time::Instant::now();
        token.sleep(Duration::from_millis(20)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_cancel() {
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = token.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_refuses_to_start_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let result = token.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
