//! Kind tag → decoder mapping used by both endpoints
//!
//! Endpoints never match on raw tags themselves. They hand incoming bytes to
//! a registry and work with the returned [`Message`]. New kinds are added by
//! registering a decoder; peers that do not know a kind report
//! [`NetError::UnknownMessageKind`] and keep going.

use crate::error::NetError;
use crate::message::{Decoder, Message, MessageKind};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MessageRegistry {
    decoders: HashMap<u8, Decoder>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// Registry that understands every built-in message kind
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for kind in MessageKind::ALL {
            registry.register(kind.tag(), kind.decoder());
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Installs a decoder for `tag`, returning the one it replaced
    pub fn register(&mut self, tag: u8, decoder: Decoder) -> Option<Decoder> {
        self.decoders.insert(tag, decoder)
    }

    pub fn unregister(&mut self, tag: u8) -> Option<Decoder> {
        self.decoders.remove(&tag)
    }

    pub fn is_registered(&self, tag: u8) -> bool {
        self.decoders.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn create_from_bytes(&self, bytes: &[u8]) -> Result<Message, NetError> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| NetError::malformed("empty buffer"))?;

        let decoder = self
            .decoders
            .get(&tag)
            .ok_or(NetError::UnknownMessageKind(tag))?;

        decoder(payload)
    }
}
