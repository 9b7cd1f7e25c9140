//! Debug logging around a receiver and/or sender.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::model::Envelope;

use super::{MessageHandler, Receiver, Sender};

pub struct LoggingTransport<T> {
    inner: T,
}

impl<T> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

struct LoggingHandler {
    inner: Arc<dyn MessageHandler>,
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        debug!(
            body = %String::from_utf8_lossy(envelope.body()),
            headers = ?envelope.headers(),
            stamps = ?envelope.stamps(),
            "received envelope"
        );
        self.inner.handle(envelope).await
    }
}

#[async_trait]
impl<T: Receiver> Receiver for LoggingTransport<T> {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!("receiving");
        let handler: Arc<dyn MessageHandler> = Arc::new(LoggingHandler { inner: handler });
        self.inner.receive(handler, cancel).await
    }

    async fn stop(&self) {
        debug!("stopping receiver");
        self.inner.stop().await;
    }
}

#[async_trait]
impl<T: Sender> Sender for LoggingTransport<T> {
    async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        debug!(
            body = %String::from_utf8_lossy(envelope.body()),
            headers = ?envelope.headers(),
            stamps = ?envelope.stamps(),
            "sending envelope"
        );
        self.inner.send(envelope).await
    }
}
