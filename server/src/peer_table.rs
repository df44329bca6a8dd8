//! Server-side record of connected peers and their last reported position
//!
//! This module tracks which peers the server knows about and where each of
//! them was last seen:
//! - Entry creation when the transport reports a new connection
//! - Position updates from the peer's own messages
//! - Removal when the peer disconnects or times out
//! - Recipient selection for relaying one peer's data to everybody else
//!
//! The table is written only by the server's receive loop; the public
//! diagnostics on [`crate::network::Server`] read it concurrently.

use log::{debug, info};
use shared::{NetError, PeerId, Position, PositionTable};
use std::collections::HashMap;

/// Connected peers indexed by the id the transport assigned to them
///
/// A peer enters the table at the origin and stays there until it sends its
/// first position update. Lookups of a removed peer return `None`.
#[derive(Debug, Default)]
pub struct PeerTable {
    positions: PositionTable,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly connected peer at the zero position
    ///
    /// Returns false if the id was already present, in which case its
    /// position is reset.
    pub fn add_peer(&self, peer: PeerId) -> bool {
        let fresh = self.positions.insert(peer, Position::ZERO).is_none();
        info!("Peer {} joined ({} connected)", peer, self.positions.len());
        fresh
    }

    /// Removes a peer from the table
    ///
    /// Returns true if the peer was found and removed, false if it was
    /// already gone.
    pub fn remove_peer(&self, peer: PeerId) -> bool {
        match self.positions.remove(peer) {
            Some(last) => {
                info!(
                    "Peer {} left at ({:.2}, {:.2}, {:.2})",
                    peer, last.x, last.y, last.z
                );
                true
            }
            None => false,
        }
    }

    /// Stores the latest position of a known peer
    ///
    /// Fails with [`NetError::PeerNotFound`] when the update races the
    /// peer's removal.
    pub fn update_position(&self, peer: PeerId, position: Position) -> Result<(), NetError> {
        self.positions.update(peer, position)?;
        debug!(
            "Peer {} moved to ({:.2}, {:.2}, {:.2})",
            peer, position.x, position.y, position.z
        );
        Ok(())
    }

    pub fn position(&self, peer: PeerId) -> Option<Position> {
        self.positions.get(peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.positions.contains(peer)
    }

    /// Every peer except `origin`, in ascending id order
    pub fn recipients_except(&self, origin: PeerId) -> Vec<PeerId> {
        let mut recipients: Vec<PeerId> = self
            .positions
            .snapshot()
            .into_keys()
            .filter(|&peer| peer != origin)
            .collect();
        recipients.sort_unstable();
        recipients
    }

    pub fn snapshot(&self) -> HashMap<PeerId, Position> {
        self.positions.snapshot()
    }

    pub fn clear(&self) {
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
