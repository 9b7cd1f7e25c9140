//! On-store representation of an envelope.
//!
//! Current format: `{"body": string, "headers": {..}, "uniqueId": string|null}`.
//! Legacy format (read-only): `[body, headers]`, never deduplicated.
//! Empty headers may be written as `[]` by other producers.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// An encoded message as stored in the queue.
///
/// Field order is the serialization order; headers are a `BTreeMap` so that
/// re-encoding the same envelope is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub body: String,
    #[serde(default, deserialize_with = "headers_or_empty_list")]
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "uniqueId", default)]
    pub unique_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPayload {
    Current(WireMessage),
    Legacy(
        String,
        #[serde(deserialize_with = "headers_or_empty_list")] BTreeMap<String, String>,
    ),
}

fn headers_or_empty_list<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Headers {
        Map(BTreeMap<String, String>),
        List(Vec<serde_json::Value>),
    }

    match Headers::deserialize(deserializer)? {
        Headers::Map(map) => Ok(map),
        Headers::List(list) if list.is_empty() => Ok(BTreeMap::new()),
        Headers::List(_) => Err(serde::de::Error::custom("headers must be an object")),
    }
}

impl WireMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a raw stored value, accepting both the current and legacy formats.
    pub fn decode(raw: &str) -> Result<Self> {
        let payload: StoredPayload = serde_json::from_str(raw)
            .map_err(|e| Error::WireFormat(format!("unrecognized queue payload: {e}")))?;
        Ok(match payload {
            StoredPayload::Current(msg) => msg,
            StoredPayload::Legacy(body, headers) => WireMessage {
                body,
                headers,
                unique_id: None,
            },
        })
    }
}

/// Extract the dedup id from a raw stored value without a full decode.
///
/// Malformed or legacy payloads carry no id.
pub fn peek_unique_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("uniqueId")?.as_str().map(str::to_string)
}

/// Default dedup id for a stamp without an explicit id.
pub fn content_hash(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_in_the_documented_field_order() {
        let msg = WireMessage {
            body: r#"{"id":null}"#.to_string(),
            headers: BTreeMap::from([("type".to_string(), "Ping".to_string())]),
            unique_id: None,
        };
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"body":"{\"id\":null}","headers":{"type":"Ping"},"uniqueId":null}"#
        );
    }

    #[test]
    fn decodes_legacy_array_without_unique_id() {
        let raw = r#"["{\"id\":null}",{"type":"Ping"}]"#;
        let msg = WireMessage::decode(raw).unwrap();
        assert_eq!(msg.body, r#"{"id":null}"#);
        assert_eq!(msg.headers.get("type").map(String::as_str), Some("Ping"));
        assert_eq!(msg.unique_id, None);
    }

    #[test]
    fn empty_header_list_reads_as_no_headers() {
        let legacy = WireMessage::decode(r#"["{}",[]]"#).unwrap();
        assert!(legacy.headers.is_empty());

        let current =
            WireMessage::decode(r#"{"body":"{}","headers":[],"uniqueId":"k"}"#).unwrap();
        assert!(current.headers.is_empty());
        assert_eq!(current.unique_id.as_deref(), Some("k"));

        let err = WireMessage::decode(r#"{"body":"{}","headers":["type"]}"#).unwrap_err();
        assert!(matches!(err, Error::WireFormat(_)));
    }

    #[test]
    fn malformed_payload_is_a_wire_format_error() {
        let err = WireMessage::decode("not json {{{").unwrap_err();
        assert!(matches!(err, Error::WireFormat(_)));
    }

    #[test]
    fn peek_reads_only_string_ids() {
        assert_eq!(
            peek_unique_id(r#"{"body":"","headers":{},"uniqueId":"abc"}"#).as_deref(),
            Some("abc")
        );
        assert_eq!(peek_unique_id(r#"{"body":"","headers":{},"uniqueId":null}"#), None);
        assert_eq!(peek_unique_id(r#"["b",{}]"#), None);
        assert_eq!(peek_unique_id("garbage"), None);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
