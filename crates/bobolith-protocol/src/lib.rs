//! Wire protocol spoken between the Bobolith server and its appliances.
//!
//! Every frame is a single flat JSON object carrying the header fields
//! (`msg_type`, `version`) next to the variant's own fields:
//!
//! ```text
//! {"msg_type":"ping","version":0,"ping":"hello"}
//! ```
//!
//! # Usage
//!
//! ```
//! use bobolith_protocol::{Message, MessageCodec};
//!
//! let codec = MessageCodec::new(0);
//! let msg = codec.decode(r#"{"msg_type":"ping","version":0,"ping":"hi"}"#).unwrap();
//! assert_eq!(msg, Message::ping("hi"));
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod registry;

pub use codec::MessageCodec;
pub use error::{DecodeError, EncodeError, RegistryError};
pub use message::{Message, MessageHeader, MessageKind, Ping, Pong};
pub use registry::Registry;

/// Protocol version used when none is configured.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 0;
