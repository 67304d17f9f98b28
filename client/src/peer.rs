//! A peer that is either synced with a relay or editing offline

use crate::error::SessionError;
use crate::session::{connect_with_retry, ConnectionState, PeerSession, ReconnectPolicy};
use log::{info, warn};
use shared::persistence::SnapshotStore;
use shared::{Delta, GridState, PersistenceError, Position, Snapshot};

/// The grid a user edits.
///
/// When the relay cannot be reached the peer falls back to a purely local
/// grid seeded from the save file, and never talks to the network again.
pub enum Peer {
    Online(PeerSession),
    Offline(GridState),
}

impl Peer {
    /// Connects to the relay at `addr` and waits for the initial snapshot,
    /// falling back to offline mode if either step fails.
    pub async fn start(addr: &str, store: &dyn SnapshotStore, policy: &ReconnectPolicy) -> Self {
        let session = match connect_with_retry(addr, policy).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{}; continuing offline", e);
                return Self::offline(store);
            }
        };

        match session.wait_synced().await {
            Ok(()) => Peer::Online(session),
            Err(e) => {
                warn!("Relay closed before sending its grid: {}; continuing offline", e);
                Self::offline(store)
            }
        }
    }

    /// A local-only peer loaded from `store`. A missing or unreadable save
    /// gives an empty grid.
    pub fn offline(store: &dyn SnapshotStore) -> Self {
        let grid = match store.load() {
            Ok(Some(snapshot)) => {
                info!("Loaded {} tiles from save", snapshot.len());
                GridState::from_snapshot(snapshot)
            }
            Ok(None) => GridState::new(),
            Err(e) => {
                warn!("Ignoring unreadable save: {}", e);
                GridState::new()
            }
        };
        Peer::Offline(grid)
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Peer::Online(session) => session.state(),
            Peer::Offline(_) => ConnectionState::Offline,
        }
    }

    /// Flips a tile. Returns whether it is now present.
    pub async fn toggle(&mut self, position: Position) -> Result<bool, SessionError> {
        match self {
            Peer::Online(session) => session.toggle(position).await,
            Peer::Offline(grid) => Ok(grid.toggle(position).enabled),
        }
    }

    /// Sets a tile. Returns whether the local grid changed.
    pub async fn set_tile(&mut self, position: Position, enabled: bool) -> Result<bool, SessionError> {
        match self {
            Peer::Online(session) => session.set_tile(position, enabled).await,
            Peer::Offline(grid) => Ok(grid.apply_delta(Delta { position, enabled })),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        match self {
            Peer::Online(session) => session.snapshot().await,
            Peer::Offline(grid) => grid.to_snapshot(),
        }
    }

    /// Writes the current grid to `store`.
    pub async fn save(&self, store: &dyn SnapshotStore) -> Result<(), PersistenceError> {
        let snapshot = self.snapshot().await;
        store.save(&snapshot)?;
        info!("Saved {} tiles", snapshot.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<Snapshot>>,
    }

    impl SnapshotStore for MemoryStore {
        fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
            *self.saved.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    async fn unreachable_addr() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_falls_back_offline_with_saved_grid() {
        let store = MemoryStore::default();
        store.save(&Snapshot::new([(3, 4)])).unwrap();

        let peer = Peer::start(&unreachable_addr().await, &store, &ReconnectPolicy::none()).await;

        assert_eq!(peer.state(), ConnectionState::Offline);
        assert_eq!(peer.snapshot().await, Snapshot::new([(3, 4)]));
    }

    #[tokio::test]
    async fn test_offline_edits_and_save() {
        let store = MemoryStore::default();
        let mut peer = Peer::offline(&store);
        assert!(peer.snapshot().await.is_empty());

        assert!(peer.toggle(Position::new(1, 2)).await.unwrap());
        assert!(peer.set_tile(Position::new(9, 9), true).await.unwrap());
        assert!(!peer.set_tile(Position::new(9, 9), true).await.unwrap());
        assert!(!peer.toggle(Position::new(1, 2)).await.unwrap());

        peer.save(&store).await.unwrap();
        assert_eq!(store.load().unwrap(), Some(Snapshot::new([(9, 9)])));
    }
}
