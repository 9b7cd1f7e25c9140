//! Deferred construction of a receiver/sender pair.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::model::Envelope;

use super::{MessageHandler, Receiver, Sender};

type ReceiverFactory = Box<dyn Fn() -> Result<Arc<dyn Receiver>> + Send + Sync>;
type SenderFactory = Box<dyn Fn() -> Result<Arc<dyn Sender>> + Send + Sync>;

/// A receiver and a sender, each built on first use and memoized.
///
/// A process that only sends never builds the receiver, and vice versa.
/// A failed construction is not memoized; the next use tries again.
pub struct LazyCompositeTransport {
    make_receiver: ReceiverFactory,
    make_sender: SenderFactory,
    receiver: OnceCell<Arc<dyn Receiver>>,
    sender: OnceCell<Arc<dyn Sender>>,
}

impl LazyCompositeTransport {
    pub fn new<R, S>(make_receiver: R, make_sender: S) -> Self
    where
        R: Fn() -> Result<Arc<dyn Receiver>> + Send + Sync + 'static,
        S: Fn() -> Result<Arc<dyn Sender>> + Send + Sync + 'static,
    {
        Self {
            make_receiver: Box::new(make_receiver),
            make_sender: Box::new(make_sender),
            receiver: OnceCell::new(),
            sender: OnceCell::new(),
        }
    }

    pub async fn receiver(&self) -> Result<&Arc<dyn Receiver>> {
        self.receiver
            .get_or_try_init(|| async {
                debug!("constructing receiver");
                (self.make_receiver)()
            })
            .await
    }

    pub async fn sender(&self) -> Result<&Arc<dyn Sender>> {
        self.sender
            .get_or_try_init(|| async {
                debug!("constructing sender");
                (self.make_sender)()
            })
            .await
    }

    pub fn receiver_initialized(&self) -> bool {
        self.receiver.initialized()
    }

    pub fn sender_initialized(&self) -> bool {
        self.sender.initialized()
    }
}

#[async_trait]
impl Receiver for LazyCompositeTransport {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.receiver().await?.receive(handler, cancel).await
    }

    async fn stop(&self) {
        if let Some(receiver) = self.receiver.get() {
            receiver.stop().await;
        }
    }
}

#[async_trait]
impl Sender for LazyCompositeTransport {
    async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        self.sender().await?.send(envelope).await
    }
}
