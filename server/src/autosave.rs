//! Periodic and final saves of the relay's canonical grid

use crate::relay::RelayHandle;
use log::{error, info, warn};
use shared::persistence::SnapshotStore;
use std::future::Future;
use tokio::time::{interval_at, Duration, Instant};

/// Saves the relay's current grid. Returns false if nothing was written.
pub async fn persist(handle: &RelayHandle, store: &dyn SnapshotStore) -> bool {
    let Some(snapshot) = handle.snapshot().await else {
        warn!("Relay stopped before the grid could be saved");
        return false;
    };

    match store.save(&snapshot) {
        Ok(()) => {
            info!("Saved {} tiles", snapshot.len());
            true
        }
        Err(e) => {
            error!("Failed to save grid: {}", e);
            false
        }
    }
}

/// Saves every `save_interval` until `shutdown` resolves, then saves once
/// more and stops the relay.
///
/// `shutdown` is polled as a single future for the whole run, so a signal
/// that fires while a save is in progress is still seen on the next turn.
pub async fn run_until<F>(
    handle: RelayHandle,
    store: &dyn SnapshotStore,
    save_interval: Option<Duration>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut save_timer =
        save_interval.map(|period| interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = async {
                match save_timer.as_mut() {
                    Some(timer) => {
                        timer.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                persist(&handle, store).await;
            }
        }
    }

    persist(&handle, store).await;
    handle.shutdown().await;
}
