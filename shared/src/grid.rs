use crate::{Delta, Envelope, Position, Snapshot};
use std::collections::HashSet;

/// The set of occupied tiles.
///
/// A position is present iff the most recently applied change for it (a
/// `Delta`, or the latest `Snapshot`) said it should be.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridState {
    tiles: HashSet<Position>,
}

impl GridState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut grid = Self::new();
        grid.load_snapshot(snapshot);
        grid
    }

    /// Applies a toggle event. Returns whether membership changed; enabling
    /// a present tile or disabling an absent one is a no-op.
    pub fn apply_delta(&mut self, delta: Delta) -> bool {
        if delta.enabled {
            self.tiles.insert(delta.position)
        } else {
            self.tiles.remove(&delta.position)
        }
    }

    /// Replaces the whole grid.
    pub fn load_snapshot(&mut self, snapshot: Snapshot) {
        self.tiles = snapshot.positions.into_iter().collect();
    }

    pub fn apply_envelope(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::Delta(delta) => {
                self.apply_delta(*delta);
            }
            Envelope::Snapshot(snapshot) => self.load_snapshot(snapshot.clone()),
        }
    }

    /// Flips one tile and returns the delta describing its new state.
    pub fn toggle(&mut self, position: Position) -> Delta {
        let delta = Delta {
            position,
            enabled: !self.contains(position),
        };
        self.apply_delta(delta);
        delta
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            positions: self.tiles.iter().copied().collect(),
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        self.tiles.contains(&position)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_enable_and_disable() {
        let mut grid = GridState::new();
        let position = Position::new(2, 3);

        assert!(grid.apply_delta(Delta::new(position, true)));
        assert!(grid.contains(position));

        assert!(grid.apply_delta(Delta::new(position, false)));
        assert!(!grid.contains(position));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_noop_combinations() {
        let mut grid = GridState::new();
        assert!(!grid.apply_delta(Delta::new((1, 1), false)));
        assert!(grid.is_empty());

        grid.apply_delta(Delta::new((1, 1), true));
        assert!(!grid.apply_delta(Delta::new((1, 1), true)));
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let deltas = [
            Delta::new((5, 5), true),
            Delta::new((5, 5), false),
            Delta::new((-1, 0), true),
            Delta::new((9, 9), false),
        ];
        let base = GridState::from_snapshot(Snapshot::new([(-1, 0), (9, 9), (3, 3)]));

        for delta in deltas {
            let mut once = base.clone();
            once.apply_delta(delta);

            let mut twice = once.clone();
            twice.apply_delta(delta);

            assert_eq!(once, twice, "applying {} twice diverged", delta);
        }
    }

    #[test]
    fn test_duplicate_enable_keeps_single_entry() {
        let mut grid = GridState::new();
        grid.apply_delta(Delta::new((5, 5), true));
        grid.apply_delta(Delta::new((5, 5), true));

        assert_eq!(grid.len(), 1);
        assert_eq!(grid.to_snapshot(), Snapshot::new([(5, 5)]));
    }

    #[test]
    fn test_snapshot_replaces_prior_state() {
        let mut grid = GridState::from_snapshot(Snapshot::new([(0, 0), (1, 1)]));
        let incoming = Snapshot::new([(1, 1), (7, -2)]);

        grid.load_snapshot(incoming.clone());

        assert_eq!(grid.to_snapshot(), incoming);
        assert!(!grid.contains(Position::new(0, 0)));
    }

    #[test]
    fn test_empty_snapshot_clears_grid() {
        let mut grid = GridState::from_snapshot(Snapshot::new([(4, 4)]));
        grid.apply_envelope(&Envelope::Snapshot(Snapshot::default()));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_apply_envelope_dispatch() {
        let mut grid = GridState::new();
        grid.apply_envelope(&Envelope::Delta(Delta::new((2, 2), true)));
        assert!(grid.contains(Position::new(2, 2)));
    }

    #[test]
    fn test_toggle_returns_new_state() {
        let mut grid = GridState::new();
        let position = Position::new(-3, 8);

        assert_eq!(grid.toggle(position), Delta::new(position, true));
        assert!(grid.contains(position));

        assert_eq!(grid.toggle(position), Delta::new(position, false));
        assert!(!grid.contains(position));
    }
}
