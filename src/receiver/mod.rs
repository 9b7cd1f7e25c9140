//! Receiving and sending seams, plus the receiver decorators.
//!
//! A [`Receiver`] runs receive iterations against a [`MessageHandler`].
//! Decorators wrap a receiver to add behavior: [`RetryForeverReceiver`]
//! keeps a worker alive across failures, [`AutoScalingReceiver`] supervises
//! a pool of workers, [`LazyCompositeTransport`] defers construction and
//! [`LoggingTransport`] adds debug logging.

pub mod autoscale;
pub mod lazy;
pub mod logging;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::Envelope;

pub use autoscale::{AutoScalingReceiver, BacklogSource, ScaleDecision, ScaleState};
pub use lazy::LazyCompositeTransport;
pub use logging::LoggingTransport;
pub use retry::{ReceiverState, RetryForeverReceiver, RetryPolicy};

/// Application code invoked once per received message.
///
/// `Ok` acks the message; `Err` rejects it back onto the queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Receiver: Send + Sync {
    /// Receive into `handler` until this receiver's unit of work is done.
    ///
    /// For a plain queue receiver that is one message (or one empty wait);
    /// for a looping decorator it is until stopped. `cancel` is checked at
    /// loop boundaries and interrupts idle waits, never an in-flight store
    /// call or handler.
    async fn receive(&self, handler: Arc<dyn MessageHandler>, cancel: &CancellationToken)
    -> Result<()>;

    /// Stop receiving. Takes effect at the next loop boundary.
    async fn stop(&self);
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<Envelope>;
}

#[async_trait]
impl<T: Receiver + ?Sized> Receiver for Arc<T> {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        (**self).receive(handler, cancel).await
    }

    async fn stop(&self) {
        (**self).stop().await
    }
}

#[async_trait]
impl<T: Sender + ?Sized> Sender for Arc<T> {
    async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        (**self).send(envelope).await
    }
}
