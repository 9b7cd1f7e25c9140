//! Core data model.
//!
//! An envelope is a message body plus headers plus an ordered list of stamps.
//! Stamps are typed annotations that change how the transport delivers the
//! message (dedup, delay, debounce). Envelopes are immutable: adding a stamp
//! yields a new envelope.

pub mod wire;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A message on its way through the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    body: Vec<u8>,
    headers: BTreeMap<String, String>,
    stamps: Vec<Stamp>,
}

impl Envelope {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
            stamps: Vec::new(),
        }
    }

    /// Build an envelope from already-decoded parts. Used by decoders.
    pub fn from_parts(body: impl Into<Vec<u8>>, headers: BTreeMap<String, String>) -> Self {
        Self {
            body: body.into(),
            headers,
            stamps: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Return a copy of this envelope with `stamp` appended.
    pub fn with(&self, stamp: impl Into<Stamp>) -> Self {
        let mut next = self.clone();
        next.stamps.push(stamp.into());
        next
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    pub fn last_unique(&self) -> Option<&UniqueStamp> {
        self.stamps.iter().rev().find_map(|s| match s {
            Stamp::Unique(u) => Some(u),
            _ => None,
        })
    }

    pub fn last_debounce(&self) -> Option<&DebounceStamp> {
        self.stamps.iter().rev().find_map(|s| match s {
            Stamp::Debounce(d) => Some(d),
            _ => None,
        })
    }

    pub fn last_delay(&self) -> Option<&DelayStamp> {
        self.stamps.iter().rev().find_map(|s| match s {
            Stamp::Delay(d) => Some(d),
            _ => None,
        })
    }

    pub fn last_transport_id(&self) -> Option<&TransportMessageIdStamp> {
        self.stamps.iter().rev().find_map(|s| match s {
            Stamp::TransportMessageId(t) => Some(t),
            _ => None,
        })
    }

    /// The effective scheduling delay: debounce wins over a plain delay.
    pub fn scheduling_delay_ms(&self) -> Option<u64> {
        self.last_debounce()
            .map(|d| d.delay_ms)
            .or_else(|| self.last_delay().map(|d| d.delay_ms))
    }

    /// The explicit dedup id, if any. Debounce wins over unique.
    ///
    /// Returns `Some(None)` when a dedup stamp is present without an id, in
    /// which case the transport falls back to a content hash.
    pub fn dedup_id(&self) -> Option<Option<&str>> {
        if let Some(d) = self.last_debounce() {
            return Some(d.id.as_deref());
        }
        self.last_unique().map(|u| u.id.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Stamps
// ---------------------------------------------------------------------------

/// A typed annotation on an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stamp {
    Unique(UniqueStamp),
    Debounce(DebounceStamp),
    Delay(DelayStamp),
    TransportMessageId(TransportMessageIdStamp),
}

/// Suppress duplicate pending messages sharing the same id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueStamp {
    pub id: Option<String>,
}

impl UniqueStamp {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }

    /// Dedup by content hash of the body.
    pub fn by_content() -> Self {
        Self { id: None }
    }
}

/// Coalesce repeated sends sharing an id into one delayed delivery.
/// Each repeat pushes the deadline out to `delay_ms` from the latest send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceStamp {
    pub delay_ms: u64,
    pub id: Option<String>,
}

impl DebounceStamp {
    pub fn new(delay_ms: u64, id: impl Into<String>) -> Self {
        Self {
            delay_ms,
            id: Some(id.into()),
        }
    }

    pub fn by_content(delay_ms: u64) -> Self {
        Self { delay_ms, id: None }
    }
}

/// Deliver no earlier than `delay_ms` after sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayStamp {
    pub delay_ms: u64,
}

impl DelayStamp {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

/// The raw stored value a received envelope was decoded from.
///
/// ack and reject use it to address the exact `processing` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessageIdStamp {
    pub raw: String,
}

impl From<UniqueStamp> for Stamp {
    fn from(s: UniqueStamp) -> Self {
        Stamp::Unique(s)
    }
}

impl From<DebounceStamp> for Stamp {
    fn from(s: DebounceStamp) -> Self {
        Stamp::Debounce(s)
    }
}

impl From<DelayStamp> for Stamp {
    fn from(s: DelayStamp) -> Self {
        Stamp::Delay(s)
    }
}

impl From<TransportMessageIdStamp> for Stamp {
    fn from(s: TransportMessageIdStamp) -> Self {
        Stamp::TransportMessageId(s)
    }
}
