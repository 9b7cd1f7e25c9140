//! The queue transport: send, get, ack, reject, count.
//!
//! Resolves stamps into dedup ids and ready-at times, encodes envelopes into
//! wire messages and drives the atomic store operations. Store failures
//! surface to the caller; nothing here retries.

pub mod receiver;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::{Decoder, EncodedMessage, Encoder, JsonCodec};
use crate::config::{ConnectionConfig, ConnectionOptions};
use crate::error::Result;
use crate::model::wire::{WireMessage, content_hash, peek_unique_id};
use crate::model::{Envelope, TransportMessageIdStamp, UniqueStamp};
use crate::receiver::{BacklogSource, Sender};
use crate::store::{EnqueueRequest, EnqueueStatus, QueueKeys, QueueStats, QueueStore, RedisStore};
use crate::telemetry::metrics::record_queue_operation;

pub use receiver::QueueReceiver;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(30);

/// A queue transport over a [`QueueStore`].
pub struct Transport<S = RedisStore> {
    store: S,
    keys: QueueKeys,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    blocking_timeout: Duration,
    poll_interval: Duration,
}

impl Transport<RedisStore> {
    /// Build a Redis-backed transport from a DSN. No connection is made until first use.
    pub fn from_dsn(dsn: &str, options: ConnectionOptions) -> Result<Self> {
        Self::from_config(&ConnectionConfig::from_dsn(dsn, options)?)
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let store = RedisStore::open(&config.redis_url()?)?;
        Ok(Transport::new(store, &config.queue).blocking_timeout(config.blocking_timeout))
    }
}

impl<S: QueueStore> Transport<S> {
    pub fn new(store: S, queue: &str) -> Self {
        Self {
            store,
            keys: QueueKeys::new(queue),
            encoder: Arc::new(JsonCodec),
            decoder: Arc::new(JsonCodec),
            blocking_timeout: DEFAULT_BLOCKING_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_codec(mut self, encoder: Arc<dyn Encoder>, decoder: Arc<dyn Decoder>) -> Self {
        self.encoder = encoder;
        self.decoder = decoder;
        self
    }

    /// Upper bound on how long [`Transport::wait_for_message`] waits on an empty queue.
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// How often [`Transport::wait_for_message`] re-checks an empty queue.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encode an envelope into its wire form and resolve its dedup id.
    ///
    /// The id is the debounce or unique stamp's id, or the content hash of
    /// the encoded body if the stamp carries none.
    pub fn encode(&self, envelope: &Envelope) -> Result<(String, Option<String>)> {
        let EncodedMessage { body, headers } = self.encoder.encode(envelope)?;
        let unique_id = envelope
            .dedup_id()
            .map(|id| id.map_or_else(|| content_hash(&body), str::to_string));
        let message = WireMessage {
            body,
            headers,
            unique_id: unique_id.clone(),
        }
        .encode()?;
        Ok((message, unique_id))
    }

    /// Send and report what the store did with the message.
    pub async fn enqueue(&self, envelope: &Envelope) -> Result<EnqueueStatus> {
        let (message, unique_id) = self.encode(envelope)?;
        let request = EnqueueRequest {
            message: &message,
            unique_id: unique_id.as_deref(),
            ready_at_ms: ready_at_ms(envelope),
            debounce: envelope.last_debounce().is_some(),
        };

        let status = self.store.enqueue(&self.keys, request).await.inspect_err(|_| {
            record_queue_operation(self.keys.queue(), "send", "error");
        })?;
        record_queue_operation(self.keys.queue(), "send", status.as_str());
        debug!(
            queue = self.keys.queue(),
            unique_id = unique_id.as_deref(),
            ready_at_ms = request.ready_at_ms,
            %status,
            "message enqueued"
        );
        Ok(status)
    }

    pub async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        self.enqueue(&envelope).await?;
        Ok(envelope)
    }

    /// Take the next ready message, if any. Never blocks.
    ///
    /// The returned envelope carries a [`TransportMessageIdStamp`] with the
    /// raw stored value, and a [`UniqueStamp`] if the message was deduplicated.
    pub async fn get(&self) -> Result<Option<Envelope>> {
        let now = Utc::now().timestamp_millis();
        let raw = self.store.dequeue(&self.keys, now).await.inspect_err(|_| {
            record_queue_operation(self.keys.queue(), "get", "error");
        })?;
        let Some(raw) = raw else {
            record_queue_operation(self.keys.queue(), "get", "empty");
            return Ok(None);
        };
        record_queue_operation(self.keys.queue(), "get", "ok");

        let wire = WireMessage::decode(&raw)?;
        let mut envelope = self.decoder.decode(EncodedMessage {
            body: wire.body,
            headers: wire.headers,
        })?;
        if let Some(id) = wire.unique_id {
            envelope = envelope.with(UniqueStamp::new(id));
        }
        Ok(Some(envelope.with(TransportMessageIdStamp { raw })))
    }

    /// Poll for a message until one arrives, the blocking timeout passes or
    /// `stop` resolves. Only the idle sleeps are interrupted by `stop`.
    pub async fn wait_for_message(
        &self,
        stop: impl Future<Output = ()>,
    ) -> Result<Option<Envelope>> {
        tokio::pin!(stop);
        let deadline = Instant::now() + self.blocking_timeout;
        loop {
            if let Some(envelope) = self.get().await? {
                return Ok(Some(envelope));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = &mut stop => return Ok(None),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Delete the message from processing.
    pub async fn ack(&self, envelope: &Envelope) -> Result<()> {
        let raw = self.processing_value(envelope)?;
        let removed = self.store.remove_processing(&self.keys, &raw).await?;
        if removed {
            record_queue_operation(self.keys.queue(), "ack", "ok");
        } else {
            record_queue_operation(self.keys.queue(), "ack", "missing");
            warn!(queue = self.keys.queue(), "acked message was not in processing");
        }
        Ok(())
    }

    /// Remove the message from processing and enqueue it again, atomically.
    ///
    /// The stored value keeps its dedup id. Delay or debounce stamps on the
    /// envelope schedule the retry.
    pub async fn reject(&self, envelope: &Envelope) -> Result<()> {
        let raw = self.processing_value(envelope)?;
        let unique_id = peek_unique_id(&raw);
        let request = EnqueueRequest {
            message: &raw,
            unique_id: unique_id.as_deref(),
            ready_at_ms: ready_at_ms(envelope),
            debounce: envelope.last_debounce().is_some(),
        };
        match self.store.requeue(&self.keys, request).await? {
            Some(status) => {
                record_queue_operation(self.keys.queue(), "reject", status.as_str());
                debug!(queue = self.keys.queue(), %status, "message rejected and re-enqueued");
            }
            None => {
                record_queue_operation(self.keys.queue(), "reject", "missing");
                warn!(queue = self.keys.queue(), "rejected message was not in processing");
            }
        }
        Ok(())
    }

    /// Messages waiting for delivery: ready plus delayed.
    pub async fn message_count(&self) -> Result<u64> {
        Ok(self.stats().await?.pending())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats(&self.keys).await
    }

    /// The stored value to address in processing. Re-encoding is the
    /// fallback and only matches if it is byte-identical to what was sent.
    fn processing_value(&self, envelope: &Envelope) -> Result<String> {
        match envelope.last_transport_id() {
            Some(stamp) => Ok(stamp.raw.clone()),
            None => Ok(self.encode(envelope)?.0),
        }
    }
}

fn ready_at_ms(envelope: &Envelope) -> Option<i64> {
    envelope.scheduling_delay_ms().map(|delay| {
        let delay = i64::try_from(delay).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_add(delay)
    })
}

#[async_trait]
impl<S: QueueStore> Sender for Transport<S> {
    async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        Transport::send(self, envelope).await
    }
}

#[async_trait]
impl<S: QueueStore> BacklogSource for Transport<S> {
    async fn queue_depth(&self) -> Result<u64> {
        self.store.ready_len(&self.keys).await
    }
}
