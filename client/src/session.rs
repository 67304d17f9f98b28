//! Peer-side connection to the relay with a local grid replica

use crate::error::SessionError;
use log::{debug, info, warn};
use rand::Rng;
use shared::transport::{CloseReason, Pipe, PipeReceiver, PipeSender};
use shared::{Delta, Envelope, GridState, Position, Snapshot};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// What a caller should show as the connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No relay; the grid is local only
    Offline,
    /// Connected, waiting for the relay's snapshot
    Syncing,
    Connected,
    /// The connection ended. Terminal for a session.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// One connection to the relay plus the grid replica it keeps in sync.
///
/// The first envelope from the relay must be a snapshot, which replaces the
/// replica wholesale; every later delta is applied on top. Local edits are
/// applied to the replica and published as deltas.
pub struct PeerSession {
    sender: PipeSender,
    grid: Arc<RwLock<GridState>>,
    state: watch::Receiver<ConnectionState>,
    inbound_task: JoinHandle<()>,
}

impl PeerSession {
    pub async fn connect(addr: &str) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SessionError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        info!("Connected to relay at {}", addr);
        Ok(Self::from_pipe(Pipe::from_tcp(stream)))
    }

    /// Starts a session over an already-open pipe.
    pub fn from_pipe(pipe: Pipe) -> Self {
        let (sender, receiver) = pipe.into_split();
        let grid = Arc::new(RwLock::new(GridState::new()));
        let (state_tx, state) = watch::channel(ConnectionState::Syncing);

        let inbound_task = tokio::spawn(run_inbound(
            receiver,
            sender.clone(),
            Arc::clone(&grid),
            state_tx,
        ));

        PeerSession {
            sender,
            grid,
            state,
            inbound_task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the initial snapshot has been applied, or fails if the
    /// connection ends first.
    pub async fn wait_synced(&self) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Syncing => {}
                ConnectionState::Offline | ConnectionState::Disconnected => {
                    return Err(SessionError::Disconnected)
                }
            }
            if state.changed().await.is_err() {
                return Err(SessionError::Disconnected);
            }
        }
    }

    /// Resolves once the session has reached `Disconnected`.
    pub async fn wait_disconnected(&self) {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Disconnected {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Flips a tile locally and publishes the change. Returns whether the
    /// tile is now present.
    pub async fn toggle(&self, position: Position) -> Result<bool, SessionError> {
        self.ensure_synced()?;

        let mut grid = self.grid.write().await;
        let delta = grid.toggle(position);
        if let Err(e) = self.publish(delta) {
            grid.toggle(position);
            return Err(e);
        }
        Ok(delta.enabled)
    }

    /// Sets a tile locally and publishes the change. Returns whether the
    /// local replica changed; the delta is published either way.
    pub async fn set_tile(&self, position: Position, enabled: bool) -> Result<bool, SessionError> {
        self.ensure_synced()?;

        let mut grid = self.grid.write().await;
        let was_present = grid.contains(position);
        let changed = grid.apply_delta(Delta { position, enabled });
        if let Err(e) = self.publish(Delta { position, enabled }) {
            grid.apply_delta(Delta {
                position,
                enabled: was_present,
            });
            return Err(e);
        }
        Ok(changed)
    }

    pub async fn contains(&self, position: Position) -> bool {
        self.grid.read().await.contains(position)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.grid.read().await.to_snapshot()
    }

    pub async fn tile_count(&self) -> usize {
        self.grid.read().await.len()
    }

    /// Closes the connection. The session ends up `Disconnected`.
    pub fn disconnect(&self) {
        self.sender.close();
    }

    fn ensure_synced(&self) -> Result<(), SessionError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Syncing => Err(SessionError::NotSynced),
            ConnectionState::Offline | ConnectionState::Disconnected => {
                Err(SessionError::Disconnected)
            }
        }
    }

    fn publish(&self, delta: Delta) -> Result<(), SessionError> {
        debug!("Publishing {}", delta);
        self.sender
            .send(Envelope::Delta(delta))
            .map_err(|_| SessionError::Disconnected)
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.sender.close();
        self.inbound_task.abort();
    }
}

async fn run_inbound(
    mut receiver: PipeReceiver,
    sender: PipeSender,
    grid: Arc<RwLock<GridState>>,
    state: watch::Sender<ConnectionState>,
) {
    while let Some(envelope) = receiver.recv().await {
        let mut grid = grid.write().await;
        match envelope {
            Envelope::Snapshot(snapshot) => {
                let tiles = snapshot.len();
                grid.load_snapshot(snapshot);
                if *state.borrow() == ConnectionState::Syncing {
                    info!("Synced {} tiles from relay", tiles);
                    state.send_replace(ConnectionState::Connected);
                } else {
                    debug!("Replaced grid with snapshot of {} tiles", tiles);
                }
            }
            Envelope::Delta(delta) => {
                if *state.borrow() == ConnectionState::Syncing {
                    warn!("Relay sent {} before its snapshot, disconnecting", delta);
                    sender.close();
                    break;
                }
                grid.apply_delta(delta);
            }
        }
    }

    match receiver.close_reason() {
        Some(CloseReason::Failed(e)) => warn!("Connection to relay failed: {}", e),
        _ => info!("Disconnected from relay"),
    }
    state.send_replace(ConnectionState::Disconnected);
}

/// Bounded retry for the initial connect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Total connection attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), capped at
    /// `max_delay`, plus up to a quarter of that again as jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ms = delay.as_millis() as u64 / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Connects, retrying per `policy`. Returns the last connect error once the
/// attempts are used up.
pub async fn connect_with_retry(
    addr: &str,
    policy: &ReconnectPolicy,
) -> Result<PeerSession, SessionError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match PeerSession::connect(addr).await {
            Ok(session) => return Ok(session),
            Err(e) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Connect attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
