// demographics.rs
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::PollError;
use crate::models::{AgeRange, Demographics, Gender};

/// Fixed name of the locally persisted demographics entry.
pub const STORAGE_KEY: &str = "userDemographics";

/// Device-local persistence for the demographics answer, asked once per device.
#[derive(Debug, Clone)]
pub struct DemographicsStore {
    path: PathBuf,
}

impl DemographicsStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{STORAGE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable entry counts as "not captured yet".
    pub fn load(&self) -> Option<Demographics> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {e}", self.path.display());
                return None;
            }
        };

        serde_json::from_str(&raw)
            .map_err(|e| warn!("Ignoring malformed {STORAGE_KEY} entry: {e}"))
            .ok()
    }

    pub fn submit(&self, age_range: AgeRange, gender: Gender) -> Result<Demographics, PollError> {
        let demographics = Demographics { age_range, gender };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string(&demographics)
            .map_err(|e| PollError::Validation(e.to_string()))?;
        fs::write(&self.path, json)?;

        info!("Captured demographics {age_range}/{gender}");
        Ok(demographics)
    }

    pub fn clear(&self) -> Result<(), PollError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
