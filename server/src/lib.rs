//! # Tile Relay Library
//!
//! This library provides the authoritative relay for the shared tile grid. It
//! owns the canonical grid, hands every newcomer a full snapshot, and fans
//! each incoming toggle out to all other connected peers.
//!
//! ## Core Responsibilities
//!
//! ### Canonical State
//! The relay holds the only authoritative copy of the grid. Every delta a
//! peer publishes is applied here before it is rebroadcast, so a peer that
//! joins later receives the result of everything applied so far.
//!
//! ### Connection Management
//! Handles the complete lifecycle of peer connections:
//! - Registration and id assignment on accept
//! - Initial snapshot, queued ahead of any delta
//! - Eviction when a connection's stream closes or fails
//!
//! ### Fan-out
//! A delta received from one connection is sent to every other registered
//! connection and never echoed back to its sender.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! One relay task owns both the canonical grid and the connection registry.
//! The accept task and the per-connection tasks only send messages to it.
//! Apply-then-broadcast therefore runs as one uninterrupted step, and
//! registry mutations can never race a broadcast.
//!
//! ### TCP Transport
//! Each connection is a TCP stream wrapped in a `shared::transport::Pipe`,
//! giving per-connection FIFO delivery in both directions. Ordering across
//! connections is whatever order the relay loop receives their messages in:
//! the last delta applied for a tile wins.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connection bookkeeping:
//! - Id assignment and lifecycle phase tracking
//! - Direct sends and broadcast with origin exclusion
//! - Eviction and bulk close on shutdown
//!
//! ### Autosave Module (`autosave`)
//! Periodic saves of the canonical grid and the final save on shutdown.
//!
//! ### Relay Module (`relay`)
//! The accept loop, the relay event loop and the `RelayHandle` used to query
//! and stop a running relay.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::relay::Relay;
//! use shared::Snapshot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::bind("0.0.0.0:51234", Snapshot::default()).await?;
//!     let handle = relay.spawn();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Handling
//!
//! Every per-connection failure (I/O error, reset, malformed frame) is
//! contained to that connection: it is torn down and evicted, and the accept
//! loop and all other connections carry on.

pub mod autosave;
pub mod registry;
pub mod relay;
