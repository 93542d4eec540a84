use serde_json::Number;
use thiserror::Error;

use crate::message::MessageKind;

/// Errors produced while decoding an inbound frame.
///
/// None of these are fatal to a connection: the frame is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The `msg_type` tag is not in the registry.
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    /// The frame was built for another protocol version.
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    ProtocolVersionMismatch { expected: u32, found: Number },

    /// The frame is not a JSON object, or header/variant fields are
    /// missing or of the wrong shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Errors produced while encoding an outbound message.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The registry in use has no tag for this kind.
    #[error("message kind {0:?} is not registered")]
    Unregistered(MessageKind),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registry configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two kinds share one tag.
    #[error("tag '{0}' is registered more than once")]
    DuplicateTag(&'static str),

    /// One kind is registered under two tags.
    #[error("message kind {0:?} is registered more than once")]
    DuplicateKind(MessageKind),
}
