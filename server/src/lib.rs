//! # Position Relay Server Library
//!
//! This library provides the server side of the position synchronization
//! protocol. Clients report where their player is; the server remembers the
//! last position of every connected peer and relays each update to all other
//! peers so everybody sees everybody else move.
//!
//! ## Core Responsibilities
//!
//! ### Peer Tracking
//! Handles the lifecycle of every peer the transport reports:
//! - A new connection gets an entry at the origin
//! - Position updates overwrite the entry
//! - Disconnects and timeouts remove it, and the remaining peers are told so
//!   they can forget it too
//!
//! ### Fan-Out
//! An update from one peer is re-encoded with the sender's id and sent on the
//! reliable channel to every other peer, never back to the sender. The
//! sender's identity always comes from the transport connection, not from
//! anything inside the payload.
//!
//! ### Auxiliary Messages
//! Chat lines are stamped and forwarded like positions, pings are answered
//! with pongs, and identity requests are answered with the id the server
//! knows the requester by.
//!
//! ## Architecture Design
//!
//! ### Background Loop
//! [`network::Server::start`] moves the transport host into a tokio task.
//! That task waits on the socket in short slices so it notices a stop
//! request quickly, and handles every queued event before waiting again.
//! Dropping the server handle also asks the loop to stop.
//!
//! ### Shared State
//! The only state the handle and the loop share is the peer table behind a
//! single mutex, plus the lifecycle flag. Sends never happen while the table
//! lock is held.
//!
//! ### Fault Containment
//! A malformed or unknown message costs one log line. Nothing a peer sends
//! can stop the loop.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Bind address, peer limit, departure announcements and transport tuning.
//!
//! ### Peer Table Module (`peer_table`)
//! Last-known position per connected peer and recipient selection for
//! relaying.
//!
//! ### Network Module (`network`)
//! The [`network::Server`] handle and its relay loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     server.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod peer_table;
