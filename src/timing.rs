//! Timeout policy and cooperative cancellation for capture operations.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::model::MediaDuration;

/// Bounds applied to every media-timing wait.
///
/// Media events (metadata loaded, end of stream) are not guaranteed to fire,
/// so each capture is limited to its expected duration plus a slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub metadata_timeout: Duration,
    pub extraction_slack: Duration,
    pub recombination_slack: Duration,
    pub settle: Duration,
    pub refresh_interval: Duration,
    /// Bound on encoding and muxing once recording has stopped
    pub finalize_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(10),
            extraction_slack: Duration::from_secs(1),
            recombination_slack: Duration::from_secs(2),
            settle: Duration::from_millis(500),
            refresh_interval: Duration::from_millis(16),
            finalize_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    /// Deadline for the audio capture of a source of `duration`
    pub fn extraction_limit(&self, duration: MediaDuration) -> Duration {
        duration.as_duration() + self.extraction_slack
    }

    /// Deadline for the recombination capture of a source of `duration`
    pub fn recombination_limit(&self, duration: MediaDuration) -> Duration {
        duration.as_duration() + self.recombination_slack
    }
}

/// Cloneable cancellation flag shared by one run and its stages.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on any clone
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives as long as any token, so this is unreachable in practice
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_add_slack() {
        let policy = TimeoutPolicy::default();
        let duration = MediaDuration::new(10.0).unwrap();

        assert_eq!(policy.extraction_limit(duration), Duration::from_secs(11));
        assert_eq!(policy.recombination_limit(duration), Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters_on_clones() {
        let token = CancelToken::new();
        let waiter = token.clone();
        assert!(!waiter.is_cancelled());

        let task = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }
}
