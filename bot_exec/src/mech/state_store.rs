//! # Axis state store
//!
//! Persists each axis's last committed position and homed flag as a JSON
//! document, so a process restart recovers the last known position. Documents
//! live under `$HERBOT_SW_ROOT/state/` and are written synchronously after
//! every committed move.
//!
//! Loading is forgiving: a missing or unreadable document yields the axis's
//! default state (zero, unhomed) with a warning, never an error.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Store of persisted axis state documents.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

/// Persisted state of the Z axis. Position is kept in raw motor steps, the
/// same unit the controller counts in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ZAxisState {
    pub current_step: i64,
    pub is_homed: bool,
}

/// Persisted state of the R axis. Position is a time-integrated estimate in
/// mm, there is no sensor on this axis.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RAxisState {
    pub current_position_mm: f64,
    pub is_homed: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised by the state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("The software root environment variable (HERBOT_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot create the state directory {0:?}: {1}")]
    CannotCreateDir(PathBuf, std::io::Error),

    #[error("Cannot write the state file {0:?}: {1}")]
    WriteError(PathBuf, std::io::Error),

    #[error("Cannot serialise the state: {0}")]
    SerializeError(serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StateStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir).map_err(|e| StoreError::CannotCreateDir(dir.clone(), e))?;
        Ok(Self { dir })
    }

    /// Open the store at `$HERBOT_SW_ROOT/state`.
    pub fn from_sw_root() -> Result<Self, StoreError> {
        let mut dir = util::host::get_herbot_sw_root().map_err(|_| StoreError::SwRootNotSet)?;
        dir.push("state");
        Self::new(dir)
    }

    /// Load the named state document, falling back to the default state if
    /// the document is missing or unreadable.
    pub fn load<S: DeserializeOwned + Default>(&self, name: &str) -> S {
        let path = self.path(name);

        if !path.exists() {
            debug!("No state file at {:?}, using defaults", path);
            return S::default();
        }

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Could not parse state file {:?}: {}", path, e);
                    S::default()
                }
            },
            Err(e) => {
                warn!("Could not read state file {:?}: {}", path, e);
                S::default()
            }
        }
    }

    /// Write the named state document.
    pub fn save<S: Serialize>(&self, name: &str, state: &S) -> Result<(), StoreError> {
        let path = self.path(name);
        let raw = serde_json::to_string(state).map_err(StoreError::SerializeError)?;
        fs::write(&path, raw).map_err(|e| StoreError::WriteError(path, e))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();

        let state = ZAxisState {
            current_step: 2135,
            is_homed: true,
        };
        store.save("z_axis", &state).unwrap();

        // Reopen the store as a fresh process would
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();
        let loaded: ZAxisState = store.load("z_axis");

        assert_eq!(loaded.current_step, 2135);
        assert!(loaded.is_homed);
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();

        let loaded: RAxisState = store.load("r_axis");

        assert_eq!(loaded.current_position_mm, 0.0);
        assert!(!loaded.is_homed);
    }

    #[test]
    fn test_corrupt_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf()).unwrap();

        std::fs::write(dir.path().join("z_axis.json"), "{not json").unwrap();
        let loaded: ZAxisState = store.load("z_axis");

        assert_eq!(loaded.current_step, 0);
        assert!(!loaded.is_homed);
    }
}
