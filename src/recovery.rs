//! Recovery snapshot persistence for Elektra
//!
//! A single JSON slot per charger instance holds an at-most-slightly-stale
//! copy of the active session so a host-process restart does not lose a
//! session in flight. The engine writes it on a timer while a session is
//! active and clears it when the session finalizes; on startup the slot is
//! read once and checked for continuity against the first reading.

use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use crate::session::Session;
use crate::validation::CrossValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted copy of the active session plus the context needed to judge
/// continuity after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    /// The active session as of the snapshot
    pub session: Session,

    /// RFID indicator value that was active when the session started
    pub rfid: Option<u32>,

    /// Lifetime counter at session start, so cross-validation survives
    /// the restart
    pub counter_start_kwh: Option<f64>,

    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
}

impl RecoverySnapshot {
    /// Capture the engine's active session state
    pub fn capture(session: &Session, cross: &CrossValidator) -> Self {
        Self {
            session: session.clone(),
            rfid: session.rfid,
            counter_start_kwh: cross.counter_start_kwh(),
            saved_at: Utc::now(),
        }
    }
}

/// Single-slot snapshot store backed by a JSON file
#[derive(Clone)]
pub struct RecoveryStore {
    path: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl RecoveryStore {
    /// Create a store for the given slot path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            logger: get_logger("recovery"),
        }
    }

    /// Read the slot. Returns `None` when no snapshot exists.
    pub fn load(&self) -> Result<Option<RecoverySnapshot>> {
        if !self.path.exists() {
            self.logger.debug("No recovery snapshot found");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| ElektraError::recovery(format!("read failed: {}", e)))?;
        let snapshot: RecoverySnapshot = serde_json::from_str(&contents)
            .map_err(|e| ElektraError::recovery(format!("decode failed: {}", e)))?;
        self.logger.info(&format!(
            "Loaded recovery snapshot for session {} (saved {})",
            snapshot.session.id, snapshot.saved_at
        ));
        Ok(Some(snapshot))
    }

    /// Overwrite the slot with a new snapshot
    pub fn save(&self, snapshot: &RecoverySnapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| ElektraError::recovery(format!("create dir failed: {}", e)))?;
        }
        std::fs::write(&self.path, contents)
            .map_err(|e| ElektraError::recovery(format!("write failed: {}", e)))?;
        self.logger.debug("Saved recovery snapshot");
        Ok(())
    }

    /// Clear the slot; a missing file is not an error
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                self.logger.debug("Cleared recovery snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ElektraError::recovery(format!("clear failed: {}", e))),
        }
    }
}
