//! # Position Sync Client Library
//!
//! This library provides the client side of the position synchronization
//! protocol: it reports the local player's position to a relay server and
//! keeps track of where every other player was last reported.
//!
//! ## Architecture Overview
//!
//! The client is split between the caller's frame loop and one background
//! task that owns the connection.
//!
//! ### Caller Side
//! The frame loop decides when a position is worth sending and hands it to
//! [`network::Client::submit_position`]. That call only queues the message,
//! so it never stalls a frame on network I/O. Reading
//! [`network::Client::snapshot`] copies the remote positions under a short
//! lock.
//!
//! ### Background Side
//! The receive loop sends whatever the caller queued, then waits briefly on
//! the socket and handles every message that arrived. Stamped position
//! updates from the server land in the remote table; the client's own id is
//! never stored there. Departure notices remove entries, and losing the
//! server clears the table and ends the loop.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Transport tuning for the connection.
//!
//! ### Network Module (`network`)
//! The [`network::Client`] handle, its command queue and the receive loop.
//!
//! ### Movement Module (`movement`)
//! Threshold filter for outgoing updates and the circle walker the headless
//! demo binary uses in place of real player input.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::movement::MovementFilter;
//! use client::network::Client;
//! use shared::Position;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1", 1234, ClientConfig::default()).await?;
//!     client.start()?;
//!
//!     let mut filter = MovementFilter::default();
//!     let position = Position::new(1.0, 2.0, 3.0);
//!     if filter.should_send(position) {
//!         client.submit_position(position)?;
//!     }
//!
//!     for (id, pos) in client.snapshot() {
//!         println!("player {} at {:?}", id, pos);
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod movement;
pub mod network;
