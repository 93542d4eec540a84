//! Bidirectional message type registry.
//!
//! Maps wire tags to [`MessageKind`]s and back. A registry is immutable once
//! built; the standard one is built on first use and shared for the life of
//! the process.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use crate::error::RegistryError;
use crate::message::MessageKind;

static STANDARD: LazyLock<Arc<Registry>> = LazyLock::new(|| {
    Arc::new(
        Registry::build(MessageKind::STANDARD)
            .expect("standard message registry has unique tags and kinds"),
    )
});

/// Immutable tag <-> kind mapping.
#[derive(Debug, Clone)]
pub struct Registry {
    by_tag: HashMap<&'static str, MessageKind>,
    by_kind: HashMap<MessageKind, &'static str>,
}

impl Registry {
    /// Build a registry from `(tag, kind)` pairs.
    ///
    /// Each tag and each kind may appear only once.
    pub fn build(
        entries: impl IntoIterator<Item = (&'static str, MessageKind)>,
    ) -> Result<Self, RegistryError> {
        let mut by_tag = HashMap::new();
        let mut by_kind = HashMap::new();

        for (tag, kind) in entries {
            if by_tag.contains_key(tag) {
                return Err(RegistryError::DuplicateTag(tag));
            }
            if by_kind.contains_key(&kind) {
                return Err(RegistryError::DuplicateKind(kind));
            }
            by_tag.insert(tag, kind);
            by_kind.insert(kind, tag);
        }

        Ok(Self { by_tag, by_kind })
    }

    /// The process-wide registry of every standard message kind.
    pub fn standard() -> Arc<Registry> {
        Arc::clone(&STANDARD)
    }

    /// Resolve a wire tag.
    pub fn kind(&self, tag: &str) -> Option<MessageKind> {
        self.by_tag.get(tag).copied()
    }

    /// Resolve the wire tag of a kind.
    pub fn tag(&self, kind: MessageKind) -> Option<&'static str> {
        self.by_kind.get(&kind).copied()
    }
}
