//! A [`Receiver`] that takes one message from a [`Transport`] per call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::receiver::{MessageHandler, Receiver};
use crate::store::QueueStore;
use crate::telemetry::message::{record_outcome, start_message_span};

use super::Transport;

/// Waits for one message, hands it to the handler, then acks or rejects it.
///
/// A handler failure rejects the message and is returned as
/// [`Error::Handler`], so a retrying decorator can log it and carry on.
pub struct QueueReceiver<S: QueueStore> {
    transport: Arc<Transport<S>>,
    stopped: CancellationToken,
}

impl<S: QueueStore> QueueReceiver<S> {
    pub fn new(transport: Arc<Transport<S>>) -> Self {
        Self {
            transport,
            stopped: CancellationToken::new(),
        }
    }

    pub fn transport(&self) -> &Arc<Transport<S>> {
        &self.transport
    }
}

#[async_trait]
impl<S: QueueStore> Receiver for QueueReceiver<S> {
    async fn receive(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() || self.stopped.is_cancelled() {
            return Ok(());
        }

        let stop = async {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.stopped.cancelled() => {}
            }
        };
        let Some(envelope) = self.transport.wait_for_message(stop).await? else {
            return Ok(());
        };

        let unique_id = envelope.last_unique().and_then(|stamp| stamp.id.as_deref());
        let span = start_message_span(self.transport.keys().queue(), unique_id);
        let outcome = handler.handle(&envelope).instrument(span.clone()).await;

        match outcome {
            Ok(()) => {
                self.transport.ack(&envelope).instrument(span.clone()).await?;
                record_outcome(&span, "ack");
                Ok(())
            }
            Err(e) => {
                self.transport.reject(&envelope).instrument(span.clone()).await?;
                record_outcome(&span, "reject");
                Err(Error::Handler(format!("{e:#}")))
            }
        }
    }

    async fn stop(&self) {
        self.stopped.cancel();
    }
}
