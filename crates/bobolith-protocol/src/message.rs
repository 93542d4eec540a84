//! Message vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Header fields shared by every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Registry tag of the variant.
    pub msg_type: String,
    /// Protocol version the frame was built for. Kept as a raw JSON number
    /// so that any integer can be reported back in a mismatch.
    pub version: Number,
}

/// Liveness check sent by an appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(rename = "ping")]
    pub text: String,
}

/// Reply to a [`Ping`], echoing its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(rename = "pong")]
    pub text: String,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(Ping),
    Pong(Pong),
}

/// Discriminant of [`Message`], the key side of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Pong,
}

impl MessageKind {
    /// Every kind, paired with its standard tag.
    pub const STANDARD: [(&'static str, MessageKind); 2] =
        [("ping", MessageKind::Ping), ("pong", MessageKind::Pong)];
}

impl Message {
    /// Build a ping.
    pub fn ping(text: impl Into<String>) -> Self {
        Message::Ping(Ping { text: text.into() })
    }

    /// Build a pong.
    pub fn pong(text: impl Into<String>) -> Self {
        Message::Pong(Pong { text: text.into() })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
        }
    }
}
