//! Connection bookkeeping for the relay
//!
//! This module tracks every live peer connection, including:
//! - Connection identity and lifecycle phase (accepted, synced, active)
//! - The outbound half of each connection's pipe
//! - Fan-out of envelopes to all connections except an optional originator
//!
//! The registry itself is not synchronized. The relay task owns it
//! exclusively, which serializes registration, eviction and broadcast
//! iteration.

use log::{debug, info};
use shared::transport::PipeSender;
use shared::{ConnectionId, Envelope, TransportError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Where a connection is in its lifecycle.
///
/// `Accepted → SnapshotSent → Active → Closed`. Only `Active` connections
/// have their inbound deltas applied and rebroadcast. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Accepted,
    SnapshotSent,
    Active,
    Closed,
}

/// A registered peer connection
#[derive(Debug)]
pub struct Connection {
    /// Identity assigned by the registry
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub phase: ConnectionPhase,
    /// When the connection was accepted
    pub connected_at: Instant,
    sender: PipeSender,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: PipeSender) -> Self {
        Self {
            id,
            addr,
            phase: ConnectionPhase::Accepted,
            connected_at: Instant::now(),
            sender,
        }
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.sender.send(envelope)
    }

    fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
        self.sender.close();
    }
}

/// Maps connection ids to their outbound pipes.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    /// Next id handed out by `register`
    next_connection_id: ConnectionId,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Ids start from 1.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
        }
    }

    /// Adds a freshly accepted connection in the `Accepted` phase.
    pub fn register(&mut self, addr: SocketAddr, sender: PipeSender) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} registered from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, sender));
        id
    }

    /// Closes and forgets a connection. Returns false if it was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        if let Some(mut connection) = self.connections.remove(&id) {
            connection.close();
            info!(
                "Connection {} from {} removed after {:.1}s",
                id,
                connection.addr,
                connection.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn set_phase(&mut self, id: ConnectionId, phase: ConnectionPhase) -> bool {
        if let Some(connection) = self.connections.get_mut(&id) {
            debug!(
                "Connection {}: {:?} -> {:?}",
                id, connection.phase, phase
            );
            connection.phase = phase;
            true
        } else {
            false
        }
    }

    pub fn phase(&self, id: ConnectionId) -> Option<ConnectionPhase> {
        self.connections.get(&id).map(|connection| connection.phase)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.phase(id) == Some(ConnectionPhase::Active)
    }

    pub fn send_to(&self, id: ConnectionId, envelope: Envelope) -> Result<(), TransportError> {
        match self.connections.get(&id) {
            Some(connection) => connection.send(envelope),
            None => Err(TransportError::Closed),
        }
    }

    /// Enqueues `envelope` on every connection except `exclude`.
    ///
    /// Returns the ids whose pipe was already torn down; the caller is
    /// expected to evict them.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        let mut failed = Vec::new();

        for (id, connection) in &self.connections {
            if Some(*id) == exclude {
                continue;
            }
            if connection.send(envelope.clone()).is_err() {
                failed.push(*id);
            }
        }

        failed
    }

    /// Closes every connection.
    pub fn close_all(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.close();
        }
    }

    /// Returns the number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::transport::{Pipe, PipeReceiver};
    use shared::Delta;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:51234".parse().unwrap()
    }

    /// Returns the relay's end and the remote peer's end of one connection.
    fn connected_pair() -> (Pipe, Pipe) {
        let (relay_end, peer_end) = duplex(16 * 1024);
        (Pipe::from_stream(relay_end), Pipe::from_stream(peer_end))
    }

    async fn next(receiver: &mut PipeReceiver) -> Option<Envelope> {
        timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timed out waiting for envelope")
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let mut registry = ConnectionRegistry::new();
        let (relay_a, _peer_a) = connected_pair();
        let (relay_b, _peer_b) = connected_pair();

        assert_eq!(registry.register(test_addr(), relay_a.sender.clone()), 1);
        assert_eq!(registry.register(test_addr(), relay_b.sender.clone()), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.phase(1), Some(ConnectionPhase::Accepted));
    }

    #[tokio::test]
    async fn test_phase_transitions() {
        let mut registry = ConnectionRegistry::new();
        let (relay, _peer) = connected_pair();
        let id = registry.register(test_addr(), relay.sender.clone());

        assert!(!registry.is_active(id));
        assert!(registry.set_phase(id, ConnectionPhase::SnapshotSent));
        assert!(registry.set_phase(id, ConnectionPhase::Active));
        assert!(registry.is_active(id));

        assert!(!registry.set_phase(999, ConnectionPhase::Active));
    }

    #[tokio::test]
    async fn test_remove_closes_pipe() {
        let mut registry = ConnectionRegistry::new();
        let (relay, mut peer) = connected_pair();
        let id = registry.register(test_addr(), relay.sender.clone());

        assert!(registry.remove(id));
        assert!(registry.is_empty());
        assert!(relay.sender.is_closed());
        assert_eq!(next(&mut peer.receiver).await, None);

        assert!(!registry.remove(id));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_origin() {
        let mut registry = ConnectionRegistry::new();
        let (relay_a, mut peer_a) = connected_pair();
        let (relay_b, mut peer_b) = connected_pair();
        let (relay_c, mut peer_c) = connected_pair();

        let id_a = registry.register(test_addr(), relay_a.sender.clone());
        registry.register(test_addr(), relay_b.sender.clone());
        registry.register(test_addr(), relay_c.sender.clone());

        let delta = Envelope::Delta(Delta::new((2, 3), true));
        let failed = registry.broadcast(&delta, Some(id_a));
        assert!(failed.is_empty());

        assert_eq!(next(&mut peer_b.receiver).await, Some(delta.clone()));
        assert_eq!(next(&mut peer_c.receiver).await, Some(delta));

        // A marker sent directly to A must be the first thing it sees.
        let marker = Envelope::Delta(Delta::new((0, 0), false));
        registry.send_to(id_a, marker.clone()).unwrap();
        assert_eq!(next(&mut peer_a.receiver).await, Some(marker));
    }

    #[tokio::test]
    async fn test_broadcast_reports_dead_connections() {
        let mut registry = ConnectionRegistry::new();
        let (alive, _alive_peer) = connected_pair();
        let (dead, _dead_peer) = connected_pair();

        registry.register(test_addr(), alive.sender.clone());
        let dead_id = registry.register(test_addr(), dead.sender.clone());
        dead.sender.close();

        let failed = registry.broadcast(&Envelope::Delta(Delta::new((1, 1), true)), None);
        assert_eq!(failed, vec![dead_id]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.send_to(42, Envelope::Delta(Delta::new((1, 1), true))),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut registry = ConnectionRegistry::new();
        let (relay_a, _peer_a) = connected_pair();
        let (relay_b, _peer_b) = connected_pair();
        registry.register(test_addr(), relay_a.sender.clone());
        registry.register(test_addr(), relay_b.sender.clone());

        registry.close_all();

        assert!(registry.is_empty());
        assert!(relay_a.sender.is_closed());
        assert!(relay_b.sender.is_closed());
    }
}
