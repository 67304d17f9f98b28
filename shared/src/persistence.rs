//! Snapshot storage used by the binaries to persist the grid on demand.
//!
//! Nothing in the sync core decides when to load or save; callers own that.

use crate::error::PersistenceError;
use crate::Snapshot;
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File name used when no save path is configured.
pub const DEFAULT_SAVE_FILE: &str = "level.dat";

pub trait SnapshotStore: Send + Sync {
    /// Reads a previously persisted grid, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
}

/// Stores the bincode encoding of a snapshot in a single file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = bincode::deserialize(&data)?;
        debug!(
            "Loaded {} tiles from {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let data = bincode::serialize(snapshot)?;

        // Write beside the target and rename so a crash never leaves a
        // half-written save behind.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Saved {} tiles to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}
