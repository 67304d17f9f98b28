//! Relay event loop: accepts peers, owns the canonical grid, fans out deltas

use crate::registry::{ConnectionPhase, ConnectionRegistry};
use log::{debug, error, info, warn};
use shared::transport::{CloseReason, Pipe, PipeReceiver};
use shared::{ConnectionId, Delta, Envelope, GridState, Snapshot};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Messages sent from the accept task, connection tasks and handles to the
/// relay loop
enum RelayMessage {
    Accepted {
        pipe: Pipe,
        addr: SocketAddr,
    },
    EnvelopeReceived {
        id: ConnectionId,
        envelope: Envelope,
    },
    Disconnected {
        id: ConnectionId,
    },
    QuerySnapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    QueryConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// The authoritative relay.
///
/// The canonical grid and the registry live inside the relay loop and are
/// touched by nothing else, so each apply-then-broadcast pair and every
/// register/evict runs to completion before the next message is handled.
pub struct Relay {
    listener: Option<TcpListener>,
    grid: GridState,
    registry: ConnectionRegistry,

    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Relay {
    /// Creates a relay without a listener. Connections can still be handed
    /// to it through `RelayHandle::attach`.
    pub fn new(initial: Snapshot) -> Self {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        Relay {
            listener: None,
            grid: GridState::from_snapshot(initial),
            registry: ConnectionRegistry::new(),
            relay_tx,
            relay_rx,
        }
    }

    pub async fn bind(addr: &str, initial: Snapshot) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        let mut relay = Self::new(initial);
        relay.listener = Some(listener);
        Ok(relay)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Runs the relay on its own task.
    pub fn spawn(self) -> RelayHandle {
        let local_addr = self.local_addr();
        let relay_tx = self.relay_tx.clone();
        let task = tokio::spawn(self.run());

        RelayHandle {
            relay_tx,
            local_addr,
            task,
        }
    }

    /// Main relay loop. Runs until a `Shutdown` message arrives.
    pub async fn run(mut self) {
        let accept_task = self
            .listener
            .take()
            .map(|listener| tokio::spawn(accept_loop(listener, self.relay_tx.clone())));

        info!("Relay started with {} tiles", self.grid.len());

        while let Some(message) = self.relay_rx.recv().await {
            if !self.handle_message(message) {
                break;
            }
        }

        if let Some(task) = accept_task {
            task.abort();
        }
        self.registry.close_all();
        info!("Relay stopped");
    }

    /// Returns false when the loop should stop.
    fn handle_message(&mut self, message: RelayMessage) -> bool {
        match message {
            RelayMessage::Accepted { pipe, addr } => self.handle_accepted(pipe, addr),
            RelayMessage::EnvelopeReceived { id, envelope } => match envelope {
                Envelope::Delta(delta) => self.apply_and_broadcast(id, delta),
                Envelope::Snapshot(snapshot) => {
                    warn!(
                        "Ignoring snapshot of {} tiles sent by connection {}",
                        snapshot.len(),
                        id
                    );
                }
            },
            RelayMessage::Disconnected { id } => {
                self.registry.remove(id);
            }
            RelayMessage::QuerySnapshot { reply } => {
                let _ = reply.send(self.grid.to_snapshot());
            }
            RelayMessage::QueryConnectionCount { reply } => {
                let _ = reply.send(self.registry.len());
            }
            RelayMessage::Shutdown => {
                info!("Relay shutting down");
                return false;
            }
        }
        true
    }

    /// Registers a connection, queues the snapshot ahead of anything else,
    /// then starts forwarding its inbound envelopes.
    fn handle_accepted(&mut self, pipe: Pipe, addr: SocketAddr) {
        let (sender, receiver) = pipe.into_split();
        let id = self.registry.register(addr, sender);

        let snapshot = self.grid.to_snapshot();
        let tiles = snapshot.len();
        if self.registry.send_to(id, Envelope::Snapshot(snapshot)).is_err() {
            warn!("Connection {} closed before its snapshot was queued", id);
            self.registry.remove(id);
            return;
        }
        self.registry.set_phase(id, ConnectionPhase::SnapshotSent);
        debug!("Queued snapshot of {} tiles for connection {}", tiles, id);

        self.registry.set_phase(id, ConnectionPhase::Active);
        tokio::spawn(forward_inbound(id, receiver, self.relay_tx.clone()));
    }

    fn apply_and_broadcast(&mut self, origin: ConnectionId, delta: Delta) {
        if !self.registry.is_active(origin) {
            debug!("Dropping {} from inactive connection {}", delta, origin);
            return;
        }

        let changed = self.grid.apply_delta(delta);
        debug!(
            "Connection {} sent {} ({})",
            origin,
            delta,
            if changed { "applied" } else { "no-op" }
        );

        let failed = self.registry.broadcast(&Envelope::Delta(delta), Some(origin));
        for id in failed {
            debug!("Evicting connection {} after failed send", id);
            self.registry.remove(id);
        }
    }
}

/// Handle to a relay running on its own task.
pub struct RelayHandle {
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Hands an already-open connection to the relay as if it had been
    /// accepted from the listener.
    pub fn attach(&self, pipe: Pipe, addr: SocketAddr) -> bool {
        self.relay_tx
            .send(RelayMessage::Accepted { pipe, addr })
            .is_ok()
    }

    /// Current canonical grid, or `None` if the relay has stopped.
    pub async fn snapshot(&self) -> Option<Snapshot> {
        let (reply, response) = oneshot::channel();
        self.relay_tx
            .send(RelayMessage::QuerySnapshot { reply })
            .ok()?;
        response.await.ok()
    }

    pub async fn connection_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self
            .relay_tx
            .send(RelayMessage::QueryConnectionCount { reply })
            .is_err()
        {
            return 0;
        }
        response.await.unwrap_or(0)
    }

    /// Stops accepting, closes every connection and waits for the loop to end.
    pub async fn shutdown(self) {
        let _ = self.relay_tx.send(RelayMessage::Shutdown);
        if let Err(e) = self.task.await {
            error!("Relay task panicked: {}", e);
        }
    }
}

async fn accept_loop(listener: TcpListener, relay_tx: mpsc::UnboundedSender<RelayMessage>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                let pipe = Pipe::from_tcp(stream);
                if relay_tx.send(RelayMessage::Accepted { pipe, addr }).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Feeds one connection's inbound envelopes into the relay loop, then
/// reports the teardown.
async fn forward_inbound(
    id: ConnectionId,
    mut receiver: PipeReceiver,
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
) {
    while let Some(envelope) = receiver.recv().await {
        if relay_tx
            .send(RelayMessage::EnvelopeReceived { id, envelope })
            .is_err()
        {
            return;
        }
    }

    match receiver.close_reason() {
        Some(CloseReason::Failed(e)) => info!("Connection {} failed: {}", id, e),
        _ => debug!("Connection {} closed", id),
    }
    let _ = relay_tx.send(RelayMessage::Disconnected { id });
}
