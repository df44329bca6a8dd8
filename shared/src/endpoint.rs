//! Pieces common to the client and server endpoints: the lifecycle state
//! machine with its running flag, and the lock-guarded position table.

use crate::error::NetError;
use crate::message::{PeerId, Position};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Bounded wait of the receive loop; also the worst-case latency for a stop
/// request to be noticed
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    /// `start` was called, the loop has not begun its first iteration
    Started,
    Running,
    Stopping,
    Stopped,
}

/// State machine plus the cooperative cancellation flag the loop polls
#[derive(Debug)]
pub struct Lifecycle {
    running: AtomicBool,
    state: Mutex<EndpointState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            state: Mutex::new(EndpointState::Created),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> EndpointState {
        *self.lock_state()
    }

    /// `Created → Started`; any other state is rejected
    pub fn begin_start(&self) -> Result<(), NetError> {
        let mut state = self.lock_state();
        if *state != EndpointState::Created {
            return Err(NetError::InvalidState(*state));
        }
        *state = EndpointState::Started;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Called by the loop on entry. Leaves the state alone if a stop
    /// already raced ahead of it.
    pub fn enter_running(&self) {
        let mut state = self.lock_state();
        if *state == EndpointState::Started {
            *state = EndpointState::Running;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `Started | Running → Stopping`. Returns false when there was nothing
    /// to stop.
    pub fn request_stop(&self) -> bool {
        let mut state = self.lock_state();
        match *state {
            EndpointState::Started | EndpointState::Running => {
                *state = EndpointState::Stopping;
                self.running.store(false, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Clears the running flag from inside the loop, e.g. when the remote
    /// side went away
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        let mut state = self.lock_state();
        if *state != EndpointState::Created {
            *state = EndpointState::Stopped;
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Last-known position per peer behind a single mutex.
///
/// Every accessor holds the lock only for the map operation itself, so it is
/// safe to call from the receive loop and from the caller's thread.
#[derive(Debug, Default)]
pub struct PositionTable {
    positions: Mutex<HashMap<PeerId, Position>>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, Position>> {
        self.positions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, peer: PeerId, position: Position) -> Option<Position> {
        self.lock().insert(peer, position)
    }

    /// Updates an existing entry only
    pub fn update(&self, peer: PeerId, position: Position) -> Result<(), NetError> {
        match self.lock().get_mut(&peer) {
            Some(entry) => {
                *entry = position;
                Ok(())
            }
            None => Err(NetError::PeerNotFound(peer)),
        }
    }

    pub fn remove(&self, peer: PeerId) -> Option<Position> {
        self.lock().remove(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<Position> {
        self.lock().get(&peer).copied()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.lock().contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Point-in-time copy of the whole table
    pub fn snapshot(&self) -> HashMap<PeerId, Position> {
        self.lock().clone()
    }
}
