//! # Tile Peer Library
//!
//! This library provides the peer side of the shared tile grid. A peer keeps
//! a local replica of the relay's grid, applies the user's edits to it
//! immediately, and publishes each edit as a delta for the relay to fan out.
//!
//! ## Architecture Overview
//!
//! ### Snapshot Then Deltas
//! The first envelope a peer receives after connecting is a full snapshot of
//! the relay's grid, which replaces the local replica wholesale. Every
//! envelope after that is a delta applied on top. A delta arriving before
//! the snapshot is a protocol violation and ends the session.
//!
//! ### Local-First Edits
//! Toggling a tile updates the replica before anything is sent, so the
//! user sees the change at once. The relay never echoes a peer's own deltas
//! back, and applying a delta is idempotent, so nothing has to be
//! reconciled afterwards.
//!
//! ### Offline Fallback
//! If the relay cannot be reached the peer keeps working on a local grid
//! seeded from the save file. It does not try to reconnect later.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! One connection to the relay:
//! - Connection state tracking (syncing, connected, disconnected)
//! - The inbound task that applies snapshots and deltas
//! - Bounded connect retry with exponential backoff
//!
//! ### Peer Module (`peer`)
//! Chooses between an online session and an offline grid and exposes the
//! same editing surface for both.
//!
//! ### Command Module (`command`)
//! Parses the line commands typed at the peer shell.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::peer::Peer;
//! use client::session::ReconnectPolicy;
//! use shared::persistence::FileSnapshotStore;
//! use shared::Position;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileSnapshotStore::new("level.dat");
//!     let mut peer = Peer::start("127.0.0.1:51234", &store, &ReconnectPolicy::none()).await;
//!
//!     peer.toggle(Position::new(2, 3)).await?;
//!     peer.save(&store).await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod error;
pub mod peer;
pub mod session;

pub use error::{CommandError, SessionError};
