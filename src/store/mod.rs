//! Queue store adapter.
//!
//! The minimal operation set the transport needs from the shared store.
//! `enqueue`, `dequeue` and `requeue` must each be indivisible from every
//! other caller's point of view; everything else is a single plain command.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// The four physical keys behind one logical queue name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKeys {
    /// Ready list. Producers push left, consumers pop right.
    pub ready: String,
    /// Checked out, not yet acked or rejected.
    pub processing: String,
    /// Sorted set of wire messages scored by ready-at timestamp (ms).
    pub delayed: String,
    /// Active dedup tokens.
    pub unique: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> Self {
        Self {
            ready: queue.to_string(),
            processing: format!("{queue}_processing"),
            delayed: format!("{queue}:delayed"),
            unique: format!("{queue}:unique"),
        }
    }

    pub fn queue(&self) -> &str {
        &self.ready
    }
}

/// Outcome of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// The message was added to the ready list or the delayed set.
    Accepted,
    /// An equivalent message is already pending. Nothing changed.
    Duplicate,
    /// A pending debounced message was rescheduled with the new payload and deadline.
    Debounced,
}

impl EnqueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnqueueStatus::Accepted => "accepted",
            EnqueueStatus::Duplicate => "duplicate",
            EnqueueStatus::Debounced => "debounced",
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EnqueueStatus::Duplicate),
            2 => Some(EnqueueStatus::Accepted),
            3 => Some(EnqueueStatus::Debounced),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnqueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an enqueue needs besides the keys.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueRequest<'a> {
    /// The encoded wire message.
    pub message: &'a str,
    pub unique_id: Option<&'a str>,
    /// Absolute ready-at time in epoch milliseconds. `None` means ready now.
    pub ready_at_ms: Option<i64>,
    pub debounce: bool,
}

/// Sizes of the four physical keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: u64,
    pub processing: u64,
    pub delayed: u64,
    pub unique: u64,
}

impl QueueStats {
    /// Messages still waiting for delivery.
    pub fn pending(&self) -> u64 {
        self.ready + self.delayed
    }
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Dedup check and insert as one step.
    async fn enqueue(&self, keys: &QueueKeys, request: EnqueueRequest<'_>) -> Result<EnqueueStatus>;

    /// Promote due delayed messages, move one ready message to processing and
    /// release its dedup token. Returns the raw stored value.
    async fn dequeue(&self, keys: &QueueKeys, now_ms: i64) -> Result<Option<String>>;

    /// Remove one matching entry from processing. Returns whether one was removed.
    async fn remove_processing(&self, keys: &QueueKeys, raw: &str) -> Result<bool>;

    /// Remove `request.message` from processing and enqueue it again, as one
    /// step. Returns `None` if it was not in processing.
    async fn requeue(
        &self,
        keys: &QueueKeys,
        request: EnqueueRequest<'_>,
    ) -> Result<Option<EnqueueStatus>>;

    /// Push an already-encoded value onto the ready list, bypassing dedup.
    async fn push_raw(&self, keys: &QueueKeys, raw: &str) -> Result<()>;

    async fn ready_len(&self, keys: &QueueKeys) -> Result<u64>;

    async fn stats(&self, keys: &QueueKeys) -> Result<QueueStats>;
}
