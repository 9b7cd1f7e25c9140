//! Backlog-driven worker pool.
//!
//! The autoscaler samples the queue depth at a fixed interval and grows or
//! shrinks a pool of workers, each running the shared receiver. Scaling
//! needs several consecutive samples in the same direction, which damps
//! reactions to a single bursty sample.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ScalingConfig;
use crate::error::Result;
use crate::process::{CreateProcessArgs, ProcessManager, ProcessRef};
use crate::telemetry::metrics;

use super::{MessageHandler, Receiver};

/// Where the autoscaler reads the backlog from.
#[async_trait]
pub trait BacklogSource: Send + Sync {
    /// Number of messages ready for delivery.
    async fn queue_depth(&self) -> Result<u64>;
}

#[async_trait]
impl<T: BacklogSource + ?Sized> BacklogSource for Arc<T> {
    async fn queue_depth(&self) -> Result<u64> {
        (**self).queue_depth().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up,
    Down,
    Hold,
}

/// Streak counters carried between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleState {
    pub empty_streak: u32,
    pub full_streak: u32,
}

impl ScaleState {
    /// Fold one sample into the streaks and decide what to do.
    ///
    /// `velocity` is the change in depth per second since the last sample.
    pub fn observe(
        &mut self,
        depth: u64,
        velocity: f64,
        pool_size: usize,
        threshold: u32,
    ) -> ScaleDecision {
        if depth > 0 {
            let sustained = self.full_streak > threshold;
            self.empty_streak = 0;
            self.full_streak = self.full_streak.saturating_add(1);
            if sustained && velocity >= 0.0 {
                ScaleDecision::Up
            } else {
                ScaleDecision::Hold
            }
        } else if pool_size > 1 && self.empty_streak > threshold {
            self.empty_streak = 1;
            self.full_streak = 0;
            ScaleDecision::Down
        } else {
            self.empty_streak = self.empty_streak.saturating_add(1);
            self.full_streak = 0;
            ScaleDecision::Hold
        }
    }
}

/// Supervises between one and `max_workers` workers on the same queue.
pub struct AutoScalingReceiver {
    receiver: Arc<dyn Receiver>,
    backlog: Arc<dyn BacklogSource>,
    process_manager: ProcessManager,
    config: ScalingConfig,
    pool: Mutex<Vec<ProcessRef>>,
    stopped: CancellationToken,
}

impl AutoScalingReceiver {
    pub fn new(
        receiver: Arc<dyn Receiver>,
        backlog: Arc<dyn BacklogSource>,
        process_manager: ProcessManager,
        config: ScalingConfig,
    ) -> Self {
        Self {
            receiver,
            backlog,
            process_manager,
            config,
            pool: Mutex::new(Vec::new()),
            stopped: CancellationToken::new(),
        }
    }

    pub async fn pool_size(&self) -> usize {
        self.pool.lock().await.len()
    }

    async fn scale_up(&self, handler: &Arc<dyn MessageHandler>) -> Result<()> {
        let mut pool = self.pool.lock().await;
        if pool.len() >= self.config.max_workers {
            return Ok(());
        }
        let args = CreateProcessArgs::new(Arc::clone(&self.receiver), Arc::clone(handler));
        let process = self.process_manager.create_process(args).await?;
        pool.push(process);

        info!(workers = pool.len(), "scaling up");
        record_scale(pool.len(), "up");
        Ok(())
    }

    async fn scale_down(&self) -> Result<()> {
        let mut pool = self.pool.lock().await;
        let Some(process) = pool.pop() else {
            return Ok(());
        };
        let result = self.process_manager.kill_process(process).await;

        info!(workers = pool.len(), "scaling down");
        record_scale(pool.len(), "down");
        result
    }

    /// Kill every worker, newest first.
    async fn drain(&self) {
        while self.pool_size().await > 0 {
            if let Err(e) = self.scale_down().await {
                error!(error = %e, "failed to stop worker");
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.stopped.cancelled() => {}
            _ = tokio::time::sleep(self.config.interval()) => {}
        }
    }

    fn running(&self, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled() && !self.stopped.is_cancelled()
    }
}

fn record_scale(pool_size: usize, direction: &'static str) {
    metrics::worker_pool_size().record(pool_size as u64, &[]);
    metrics::scale_events().add(1, &[KeyValue::new("direction", direction)]);
}

#[async_trait]
impl Receiver for AutoScalingReceiver {
    /// Run the sampling loop until stopped or cancelled, then drain the pool.
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.scale_up(&handler).await?;

        let interval = self.config.interval();
        let mut previous = self.backlog.queue_depth().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to sample backlog");
            0
        });
        self.pause(cancel).await;

        let mut state = ScaleState::default();
        while self.running(cancel) {
            let current = match self.backlog.queue_depth().await {
                Ok(depth) => depth,
                Err(e) => {
                    warn!(error = %e, "failed to sample backlog");
                    self.pause(cancel).await;
                    continue;
                }
            };
            metrics::backlog_depth().record(current, &[]);

            let velocity = (current as f64 - previous as f64) / interval.as_secs_f64();
            let pool_size = self.pool_size().await;
            let decision = state.observe(current, velocity, pool_size, self.config.threshold);
            let outcome = match decision {
                ScaleDecision::Up => self.scale_up(&handler).await,
                ScaleDecision::Down => self.scale_down().await,
                ScaleDecision::Hold => Ok(()),
            };
            if let Err(e) = outcome {
                error!(error = %e, ?decision, "scale action failed");
            }

            previous = current;
            self.pause(cancel).await;
        }

        self.drain().await;
        Ok(())
    }

    /// Stop the shared receiver, then kill workers one at a time.
    async fn stop(&self) {
        self.receiver.stop().await;
        info!("stopping receiver, scaling down");
        self.stopped.cancel();
        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_streak_must_exceed_threshold_before_scaling_up() {
        let mut state = ScaleState::default();
        for _ in 0..=3 {
            assert_eq!(state.observe(10, 0.0, 1, 3), ScaleDecision::Hold);
        }
        assert_eq!(state.full_streak, 4);
        assert_eq!(state.observe(10, 0.0, 1, 3), ScaleDecision::Up);
    }

    #[test]
    fn shrinking_backlog_holds_even_when_full() {
        let mut state = ScaleState {
            empty_streak: 0,
            full_streak: 10,
        };
        assert_eq!(state.observe(5, -2.0, 3, 3), ScaleDecision::Hold);
        assert_eq!(state.full_streak, 11);
    }

    #[test]
    fn scale_down_resets_empty_streak_to_one() {
        let mut state = ScaleState {
            empty_streak: 4,
            full_streak: 0,
        };
        assert_eq!(state.observe(0, 0.0, 2, 3), ScaleDecision::Down);
        assert_eq!(state.empty_streak, 1);
    }

    #[test]
    fn never_scales_below_one_worker() {
        let mut state = ScaleState {
            empty_streak: 100,
            full_streak: 0,
        };
        assert_eq!(state.observe(0, 0.0, 1, 3), ScaleDecision::Hold);
        assert_eq!(state.empty_streak, 101);
    }

    #[test]
    fn nonempty_sample_resets_empty_streak() {
        let mut state = ScaleState {
            empty_streak: 3,
            full_streak: 0,
        };
        state.observe(1, 1.0, 1, 3);
        assert_eq!(state.empty_streak, 0);
        assert_eq!(state.full_streak, 1);
    }

    #[test]
    fn streaks_saturate() {
        let mut state = ScaleState {
            empty_streak: 0,
            full_streak: u32::MAX,
        };
        state.observe(1, 0.0, 1, 3);
        assert_eq!(state.full_streak, u32::MAX);
    }
}
