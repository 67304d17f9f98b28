//! Protocol types and plumbing shared by the relay and its peers.
//!
//! The wire vocabulary is deliberately tiny: a peer either receives the whole
//! grid at once (`Snapshot`) or a single tile toggle (`Delta`). Both travel
//! inside an `Envelope` so a decoder can dispatch on the variant tag alone.

pub mod codec;
pub mod error;
pub mod grid;
pub mod persistence;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use error::{CodecError, PersistenceError, TransportError};
pub use grid::GridState;

/// TCP port the relay listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 51234;

/// Identity the relay assigns to each accepted connection.
pub type ConnectionId = u32;

/// A tile coordinate on the unbounded grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Tile at `position` should exist (`enabled`) or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    pub position: Position,
    pub enabled: bool,
}

impl Delta {
    pub fn new(position: impl Into<Position>, enabled: bool) -> Self {
        Self {
            position: position.into(),
            enabled,
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.enabled)
    }
}

/// The complete set of occupied tiles.
///
/// Stored ordered so two snapshots of the same grid compare and encode
/// identically; on the wire it is a plain list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub positions: BTreeSet<Position>,
}

impl Snapshot {
    pub fn new<I, P>(positions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Position>,
    {
        Self {
            positions: positions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, position: Position) -> bool {
        self.positions.contains(&position)
    }
}

/// Every message that crosses the wire.
///
/// Variant order is part of the wire format: `Delta` is tag 0 and
/// `Snapshot` is tag 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Delta(Delta),
    Snapshot(Snapshot),
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Delta(_) => "delta",
            Envelope::Snapshot(_) => "snapshot",
        }
    }
}

impl From<Delta> for Envelope {
    fn from(delta: Delta) -> Self {
        Envelope::Delta(delta)
    }
}

impl From<Snapshot> for Envelope {
    fn from(snapshot: Snapshot) -> Self {
        Envelope::Snapshot(snapshot)
    }
}
