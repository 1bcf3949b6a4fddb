//! Wire envelope for mesh messages
//!
//! A message travels between peers as a flat JSON object:
//!
//! ```json
//! {"timestamp":1000,"originDevice":"A","type":"message","infoLevel":"normal","message":"hi"}
//! ```
//!
//! Parsing is permissive: missing fields take empty/zero defaults and unknown fields
//! are ignored, so peers running newer envelope revisions still interoperate. Known
//! fields of the wrong JSON type are coerced rather than rejected: numeric strings
//! become timestamps, scalars become text, anything else falls back to the default.
//! Relays never re-encode a received envelope; they forward the exact bytes they got.

use core::fmt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::types::{DeviceId, Timestamp};

/// Wire tag of the only message kind currently authored
pub const KIND_MESSAGE: &str = "message";

/// Info level used when the author does not pick one
pub const DEFAULT_INFO_LEVEL: &str = "normal";

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Envelope `type` tag
///
/// Kinds this build does not know are preserved as `Unrecognized` so they can still
/// be delivered and relayed unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Plain chat text
    #[default]
    Message,
    Unrecognized(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Message => KIND_MESSAGE,
            MessageKind::Unrecognized(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        if tag == KIND_MESSAGE {
            MessageKind::Message
        } else {
            MessageKind::Unrecognized(tag)
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Message => KIND_MESSAGE.to_string(),
            MessageKind::Unrecognized(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Deduplication key: `(origin device, origin timestamp)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub origin: DeviceId,
    pub timestamp: Timestamp,
}

impl MessageId {
    pub fn new(origin: impl Into<DeviceId>, timestamp: u64) -> Self {
        Self {
            origin: origin.into(),
            timestamp: Timestamp::new(timestamp),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.timestamp)
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A mesh message as carried in the wire envelope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    #[serde(deserialize_with = "lenient::timestamp")]
    pub timestamp: Timestamp,
    #[serde(rename = "originDevice", deserialize_with = "lenient::device")]
    pub origin_device: DeviceId,
    #[serde(rename = "type", deserialize_with = "lenient::kind")]
    pub kind: MessageKind,
    #[serde(rename = "infoLevel", deserialize_with = "lenient::text")]
    pub info_level: String,
    #[serde(rename = "message", deserialize_with = "lenient::text")]
    pub body: String,
}

impl Message {
    /// Author a new chat message
    pub fn new(
        origin_device: DeviceId,
        timestamp: Timestamp,
        info_level: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            origin_device,
            kind: MessageKind::Message,
            info_level: info_level.into(),
            body: body.into(),
        }
    }

    pub fn id(&self) -> MessageId {
        MessageId {
            origin: self.origin_device.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Serialize to envelope bytes
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse envelope bytes
    ///
    /// The payload must be a UTF-8 JSON object; any field may be missing.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = core::str::from_utf8(bytes).map_err(|_| EnvelopeError::InvalidUtf8)?;
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

// ----------------------------------------------------------------------------
// Lenient Field Decoding
// ----------------------------------------------------------------------------

mod lenient {
    use super::*;

    /// Integers as-is, negatives clamp to zero, floats truncate, numeric strings parse
    pub fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let millis = match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
                .or_else(|| n.as_f64().map(|v| v.max(0.0) as u64))
                .unwrap_or_default(),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|v| v.max(0.0) as u64))
                    .unwrap_or_default()
            }
            _ => 0,
        };
        Ok(Timestamp::new(millis))
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
        })
    }

    pub fn device<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DeviceId, D::Error> {
        text(deserializer).map(DeviceId::from)
    }

    pub fn kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MessageKind, D::Error> {
        let tag = text(deserializer)?;
        Ok(if tag.is_empty() {
            MessageKind::default()
        } else {
            MessageKind::from(tag)
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_wire_field_names() {
        let msg = Message::new(DeviceId::from("A"), Timestamp::new(1000), "normal", "hi");
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["timestamp"], 1000);
        assert_eq!(value["originDevice"], "A");
        assert_eq!(value["type"], "message");
        assert_eq!(value["infoLevel"], "normal");
        assert_eq!(value["message"], "hi");
    }

    #[test]
    fn test_decode_missing_fields_default() {
        let msg = Message::decode(br#"{"originDevice":"B"}"#).unwrap();
        assert_eq!(msg.origin_device, DeviceId::from("B"));
        assert_eq!(msg.timestamp, Timestamp::new(0));
        assert_eq!(msg.kind, MessageKind::Message);
        assert!(msg.info_level.is_empty());
        assert!(msg.body.is_empty());
    }

    #[test]
    fn test_decode_ignores_unknown_fields_and_keeps_unknown_kind() {
        let msg = Message::decode(
            br#"{"timestamp":5,"originDevice":"C","type":"ack","hops":3,"message":"x"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Unrecognized("ack".to_string()));
        assert_eq!(msg.id(), MessageId::new("C", 5));
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(matches!(
            Message::decode(b"not json"),
            Err(EnvelopeError::Json(_))
        ));
        assert!(matches!(
            Message::decode(br#"[1000,"A"]"#),
            Err(EnvelopeError::NotAnObject)
        ));
        assert!(matches!(
            Message::decode(&[0xff, 0xfe, 0x00]),
            Err(EnvelopeError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_decode_coerces_wrongly_typed_fields() {
        let msg = Message::decode(
            br#"{"timestamp":"yesterday","originDevice":42,"infoLevel":true,"message":null}"#,
        )
        .unwrap();
        assert_eq!(msg.timestamp, Timestamp::new(0));
        assert_eq!(msg.origin_device, DeviceId::from("42"));
        assert_eq!(msg.info_level, "true");
        assert!(msg.body.is_empty());
        assert_eq!(msg.kind, MessageKind::Message);

        let numeric = Message::decode(br#"{"timestamp":" 1700 ","originDevice":"A"}"#).unwrap();
        assert_eq!(numeric.id(), MessageId::new("A", 1700));
        let float = Message::decode(br#"{"timestamp":12.9,"originDevice":"A"}"#).unwrap();
        assert_eq!(float.timestamp, Timestamp::new(12));
        let negative = Message::decode(br#"{"timestamp":-4,"originDevice":"A"}"#).unwrap();
        assert_eq!(negative.timestamp, Timestamp::new(0));
    }

    #[test]
    fn test_message_id_display_matches_origin_colon_timestamp() {
        assert_eq!(MessageId::new("Pixel 7", 1234).to_string(), "Pixel 7:1234");
    }

    #[test]
    fn test_equal_ids_regardless_of_content() {
        let a = Message::new(DeviceId::from("A"), Timestamp::new(1), "normal", "one");
        let b = Message::new(DeviceId::from("A"), Timestamp::new(1), "urgent", "two");
        assert_eq!(a.id(), b.id());
    }
}
