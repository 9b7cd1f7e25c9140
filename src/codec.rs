//! Envelope (de)serialization seam.
//!
//! The transport never interprets message bodies. An [`Encoder`] turns an
//! envelope into a string body plus headers; a [`Decoder`] does the reverse.
//! [`JsonCodec`] is the default: it passes the body through as UTF-8 text
//! and copies headers verbatim. Stamps are not carried over the wire.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::Envelope;

/// The encoder's output, before the transport adds its dedup id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

pub trait Encoder: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<EncodedMessage>;
}

pub trait Decoder: Send + Sync {
    fn decode(&self, message: EncodedMessage) -> Result<Envelope>;
}

/// Pass-through codec for text bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Encoder for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<EncodedMessage> {
        let body = std::str::from_utf8(envelope.body())
            .map_err(|e| Error::WireFormat(format!("message body is not valid UTF-8: {e}")))?;
        Ok(EncodedMessage {
            body: body.to_string(),
            headers: envelope.headers().clone(),
        })
    }
}

impl Decoder for JsonCodec {
    fn decode(&self, message: EncodedMessage) -> Result<Envelope> {
        Ok(Envelope::from_parts(message.body, message.headers))
    }
}
