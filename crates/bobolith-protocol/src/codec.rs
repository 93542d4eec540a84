//! Frame encoding and decoding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, MessageHeader, MessageKind, Ping, Pong};
use crate::registry::Registry;

/// 2^63. JSON integers that fit neither `i64` nor `u64` are parsed as
/// floats of at least this magnitude.
const INTEGER_FLOAT_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Whether a JSON number is an integer, however large.
fn is_integer(n: &Number) -> bool {
    n.is_i64()
        || n.is_u64()
        || n.as_f64()
            .is_some_and(|f| f.is_finite() && f.fract() == 0.0 && f.abs() >= INTEGER_FLOAT_LIMIT)
}

/// Outbound frame: header fields and payload fields flattened into one object.
#[derive(Serialize)]
struct WireFrame<'a, P: Serialize> {
    msg_type: &'a str,
    version: u32,
    #[serde(flatten)]
    payload: &'a P,
}

/// Encodes and decodes frames for one protocol version.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    version: u32,
    registry: Arc<Registry>,
}

impl MessageCodec {
    /// Create a codec over the standard registry.
    pub fn new(version: u32) -> Self {
        Self::with_registry(version, Registry::standard())
    }

    /// Create a codec over a custom registry.
    pub fn with_registry(version: u32, registry: Arc<Registry>) -> Self {
        Self { version, registry }
    }

    /// The protocol version this codec accepts and emits.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Decode one text frame.
    ///
    /// The version is checked before the tag, so a frame from another
    /// protocol version is always reported as such.
    pub fn decode(&self, raw: &str) -> Result<Message, DecodeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(DecodeError::MalformedPayload(
                "frame is not a JSON object".to_string(),
            ));
        }

        let header = MessageHeader::deserialize(&value)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid header: {}", e)))?;

        if !is_integer(&header.version) {
            return Err(DecodeError::MalformedPayload(format!(
                "version must be an integer, found {}",
                header.version
            )));
        }

        if header.version.as_u64() != Some(u64::from(self.version)) {
            return Err(DecodeError::ProtocolVersionMismatch {
                expected: self.version,
                found: header.version,
            });
        }

        let kind = self
            .registry
            .kind(&header.msg_type)
            .ok_or_else(|| DecodeError::UnknownMessageType(header.msg_type.clone()))?;

        let malformed = |e: serde_json::Error| {
            DecodeError::MalformedPayload(format!("invalid '{}' payload: {}", header.msg_type, e))
        };

        match kind {
            MessageKind::Ping => Ping::deserialize(&value).map(Message::Ping).map_err(malformed),
            MessageKind::Pong => Pong::deserialize(&value).map(Message::Pong).map_err(malformed),
        }
    }

    /// Encode one message as a text frame.
    pub fn encode(&self, message: &Message) -> Result<String, EncodeError> {
        let kind = message.kind();
        let msg_type = self
            .registry
            .tag(kind)
            .ok_or(EncodeError::Unregistered(kind))?;

        let json = match message {
            Message::Ping(payload) => serde_json::to_string(&WireFrame {
                msg_type,
                version: self.version,
                payload,
            })?,
            Message::Pong(payload) => serde_json::to_string(&WireFrame {
                msg_type,
                version: self.version,
                payload,
            })?,
        };

        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MessageCodec {
        MessageCodec::new(0)
    }

    #[test]
    fn decode_ping() {
        let msg = codec()
            .decode(r#"{"msg_type":"ping","version":0,"ping":"hello"}"#)
            .unwrap();
        assert_eq!(msg, Message::ping("hello"));
    }

    #[test]
    fn encode_pong_is_flat() {
        let json = codec().encode(&Message::pong("hello")).unwrap();
        assert_eq!(json, r#"{"msg_type":"pong","version":0,"pong":"hello"}"#);
    }

    #[test]
    fn round_trip_every_variant() {
        let codec = MessageCodec::new(3);
        for msg in [
            Message::ping("x"),
            Message::pong("y"),
            Message::ping(""),
            Message::pong("ünïcödé \"quoted\""),
        ] {
            let raw = codec.encode(&msg).unwrap();
            assert_eq!(codec.decode(&raw).unwrap(), msg);
        }
    }

    #[test]
    fn version_mismatch_wins_over_unknown_type() {
        let codec = codec();
        for raw in [
            r#"{"msg_type":"ping","version":99,"ping":"x"}"#,
            r#"{"msg_type":"pong","version":1,"pong":"x"}"#,
            r#"{"msg_type":"nope","version":-1}"#,
            r#"{"msg_type":"ping","version":18446744073709551615,"ping":"x"}"#,
            r#"{"msg_type":"ping","version":-9223372036854775809,"ping":"x"}"#,
            r#"{"msg_type":"ping","version":100000000000000000000000000000,"ping":"x"}"#,
        ] {
            assert!(matches!(
                codec.decode(raw),
                Err(DecodeError::ProtocolVersionMismatch { expected: 0, .. })
            ));
        }
    }

    #[test]
    fn mismatch_reports_the_version_found() {
        let err = codec()
            .decode(r#"{"msg_type":"ping","version":18446744073709551615,"ping":"x"}"#)
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ProtocolVersionMismatch {
                expected: 0,
                found: Number::from(u64::MAX),
            }
        );
    }

    #[test]
    fn unknown_type() {
        let err = codec()
            .decode(r#"{"msg_type":"reboot","version":0}"#)
            .unwrap_err();
        assert_eq!(err, DecodeError::UnknownMessageType("reboot".to_string()));
    }

    #[test]
    fn missing_variant_field_is_malformed() {
        let err = codec()
            .decode(r#"{"msg_type":"ping","version":0}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn wrongly_typed_variant_field_is_malformed() {
        let err = codec()
            .decode(r#"{"msg_type":"ping","version":0,"ping":42}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn broken_header_is_malformed() {
        let codec = codec();
        for raw in [
            "not json",
            "[1, 2, 3]",
            r#"{"version":0,"ping":"x"}"#,
            r#"{"msg_type":"ping","ping":"x"}"#,
            r#"{"msg_type":"ping","version":"0","ping":"x"}"#,
            r#"{"msg_type":"ping","version":0.5,"ping":"x"}"#,
        ] {
            assert!(
                matches!(codec.decode(raw), Err(DecodeError::MalformedPayload(_))),
                "expected malformed for {raw}"
            );
        }
    }

    #[test]
    fn extra_fields_are_ignored() {
        let msg = codec()
            .decode(r#"{"msg_type":"ping","version":0,"ping":"x","seq":7}"#)
            .unwrap();
        assert_eq!(msg, Message::ping("x"));
    }

    #[test]
    fn encode_with_partial_registry_fails() {
        let registry = Arc::new(Registry::build([("ping", MessageKind::Ping)]).unwrap());
        let codec = MessageCodec::with_registry(0, registry);
        assert!(matches!(
            codec.encode(&Message::pong("x")),
            Err(EncodeError::Unregistered(MessageKind::Pong))
        ));
        assert!(matches!(
            codec.decode(r#"{"msg_type":"pong","version":0,"pong":"x"}"#),
            Err(DecodeError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn custom_tags_are_used_on_the_wire() {
        let registry = Arc::new(
            Registry::build([("hb", MessageKind::Ping), ("hb_ack", MessageKind::Pong)]).unwrap(),
        );
        let codec = MessageCodec::with_registry(0, registry);
        let json = codec.encode(&Message::pong("z")).unwrap();
        assert_eq!(json, r#"{"msg_type":"hb_ack","version":0,"pong":"z"}"#);
        assert_eq!(
            codec.decode(r#"{"msg_type":"hb","version":0,"ping":"z"}"#).unwrap(),
            Message::ping("z")
        );
    }
}
