//! # Shared Networking Library
//!
//! Code used by both the position server and its clients: the wire format of
//! application messages, the registry that turns raw bytes back into
//! messages, the datagram transport both endpoints run on, and the pieces of
//! endpoint plumbing they have in common.
//!
//! ## Module Organization
//!
//! ### Message Module (`message`)
//! Tagged message format. Every message starts with a one-byte kind followed
//! by a kind-specific payload; all numbers are little-endian.
//!
//! ### Registry Module (`registry`)
//! Maps kind tags to decoders. Endpoints never inspect tags directly, so a new
//! message kind only needs an encoder arm and a registered decoder.
//!
//! ### Transport Module (`transport`)
//! Connection-oriented host over UDP with a handshake, per-peer reliable and
//! unreliable channels, acknowledgements, retransmission, keep-alives and
//! timeout detection.
//!
//! ### Endpoint Module (`endpoint`)
//! Lifecycle state machine with the running flag polled by each background
//! loop, and the mutex-guarded position table.
//!
//! ## Usage Example
//!
//! ```rust
//! use shared::{Message, MessageRegistry, Position};
//!
//! let registry = MessageRegistry::new();
//! let bytes = Message::relayed_position(7, Position::new(1.0, 2.0, 3.0)).encode();
//!
//! match registry.create_from_bytes(&bytes) {
//!     Ok(Message::PositionUpdate { origin, position }) => {
//!         assert_eq!(origin, Some(7));
//!         assert_eq!(position, Position::new(1.0, 2.0, 3.0));
//!     }
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

pub mod endpoint;
pub mod error;
pub mod message;
pub mod registry;
pub mod transport;

pub use endpoint::{EndpointState, Lifecycle, PositionTable, POLL_INTERVAL};
pub use error::NetError;
pub use message::{Message, MessageKind, PeerId, Position};
pub use registry::MessageRegistry;
pub use transport::{Host, LossSimulation, TransportConfig, TransportEvent, SERVER_PEER};

/// UDP port the server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 1234;
