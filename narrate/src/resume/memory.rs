//! In-memory completion markers, for tests and one-shot runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{MarkerStatus, MarkerStore};
use crate::error::{PipelineError, Result};

#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    entries: Mutex<HashMap<PathBuf, MarkerStatus>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, MarkerStatus>>> {
        self.entries
            .lock()
            .map_err(|_| PipelineError::Marker("marker store lock poisoned".into()))
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn status(&self, document: &Path) -> Result<MarkerStatus> {
        Ok(self
            .entries()?
            .get(document)
            .copied()
            .unwrap_or(MarkerStatus::Pending))
    }

    fn claim(&self, document: &Path) -> Result<()> {
        let mut entries = self.entries()?;
        match entries.get(document) {
            Some(MarkerStatus::InProgress) => Err(PipelineError::AlreadyClaimed(
                document.display().to_string(),
            )),
            _ => {
                entries.insert(document.to_path_buf(), MarkerStatus::InProgress);
                Ok(())
            }
        }
    }

    fn complete(&self, document: &Path) -> Result<PathBuf> {
        self.entries()?
            .insert(document.to_path_buf(), MarkerStatus::Completed);
        Ok(document.to_path_buf())
    }

    fn release(&self, document: &Path) -> Result<()> {
        let mut entries = self.entries()?;
        if entries.get(document) == Some(&MarkerStatus::InProgress) {
            entries.remove(document);
        }
        Ok(())
    }

    fn break_lock(&self, document: &Path) -> Result<bool> {
        let mut entries = self.entries()?;
        if entries.get(document) == Some(&MarkerStatus::InProgress) {
            entries.remove(document);
            return Ok(true);
        }
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
