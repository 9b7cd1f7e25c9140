//! A receiver that keeps receiving across failed iterations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{Error, Result};

use super::{MessageHandler, Receiver};

const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Decides which failed iterations are swallowed.
///
/// Swallowing keeps the worker alive at the cost of visibility: a message
/// whose ack or reject failed may be lost or delivered twice.
#[derive(Clone, Default)]
pub enum RetryPolicy {
    /// Swallow every error.
    #[default]
    Always,
    /// Swallow everything except configuration errors.
    TransientOnly,
    /// Swallow the errors for which the classifier returns `true`.
    Custom(Arc<dyn Fn(&Error) -> bool + Send + Sync>),
}

impl RetryPolicy {
    pub fn should_retry(&self, err: &Error) -> bool {
        match self {
            RetryPolicy::Always => true,
            RetryPolicy::TransientOnly => !matches!(err, Error::Config(_)),
            RetryPolicy::Custom(classify) => classify(err),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::Always => f.write_str("Always"),
            RetryPolicy::TransientOnly => f.write_str("TransientOnly"),
            RetryPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Running,
    Stopped,
}

/// Repeatedly runs the wrapped receiver until stopped or cancelled.
pub struct RetryForeverReceiver {
    inner: Arc<dyn Receiver>,
    policy: RetryPolicy,
    error_backoff: Duration,
    stopped: CancellationToken,
}

impl RetryForeverReceiver {
    pub fn new(inner: Arc<dyn Receiver>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
            error_backoff: DEFAULT_ERROR_BACKOFF,
            stopped: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause after a swallowed error before the next iteration.
    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn state(&self) -> ReceiverState {
        if self.stopped.is_cancelled() {
            ReceiverState::Stopped
        } else {
            ReceiverState::Running
        }
    }
}

#[async_trait]
impl Receiver for RetryForeverReceiver {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while !cancel.is_cancelled() && self.state() == ReceiverState::Running {
            let err = match self.inner.receive(Arc::clone(&handler), cancel).await {
                Ok(()) => continue,
                Err(err) => err,
            };
            if !self.policy.should_retry(&err) {
                error!(error = %err, "receive failed, giving up");
                return Err(err);
            }
            match &err {
                Error::Handler(_) => warn!(error = %err, "message handler failed"),
                _ => warn!(error = %err, "receive iteration failed, retrying"),
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.stopped.cancelled() => {}
                _ = tokio::time::sleep(self.error_backoff) => {}
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.cancel();
        self.inner.stop().await;
    }
}
