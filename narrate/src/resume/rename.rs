//! Completion by renaming the source to `<stem>_success.<ext>`.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{MarkerStatus, MarkerStore};
use crate::error::{PipelineError, Result};

pub const SUCCESS_SUFFIX: &str = "_success";

/// Marks finished documents by renaming them; claims are sibling lock files.
#[derive(Debug, Clone, Default)]
pub struct RenameMarker;

impl RenameMarker {
    pub fn new() -> Self {
        Self
    }

    /// `<dir>/<stem>_success.<ext>`
    pub fn completed_path(document: &Path) -> PathBuf {
        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = match document.extension() {
            Some(ext) => format!("{}{}.{}", stem, SUCCESS_SUFFIX, ext.to_string_lossy()),
            None => format!("{}{}", stem, SUCCESS_SUFFIX),
        };
        document.with_file_name(name)
    }

    /// Whether a file name already carries the success marker
    pub fn is_marked(document: &Path) -> bool {
        document
            .file_stem()
            .is_some_and(|s| s.to_string_lossy().ends_with(SUCCESS_SUFFIX))
    }

    fn lock_path(document: &Path) -> PathBuf {
        let name = document
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        document.with_file_name(format!(".{}.lock", name))
    }
}

impl MarkerStore for RenameMarker {
    fn status(&self, document: &Path) -> Result<MarkerStatus> {
        if Self::is_marked(document) || Self::completed_path(document).exists() {
            return Ok(MarkerStatus::Completed);
        }
        if Self::lock_path(document).exists() {
            return Ok(MarkerStatus::InProgress);
        }
        Ok(MarkerStatus::Pending)
    }

    fn claim(&self, document: &Path) -> Result<()> {
        let lock = Self::lock_path(document);
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PipelineError::AlreadyClaimed(
                document.display().to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn complete(&self, document: &Path) -> Result<PathBuf> {
        if Self::is_marked(document) {
            self.release(document)?;
            return Ok(document.to_path_buf());
        }

        let target = Self::completed_path(document);
        if target.exists() {
            return Err(PipelineError::Marker(format!(
                "cannot rename {}: {} already exists",
                document.display(),
                target.display()
            )));
        }

        fs::rename(document, &target)?;
        self.release(document)?;
        log::info!("Marked {} as done", target.display());
        Ok(target)
    }

    fn release(&self, document: &Path) -> Result<()> {
        match fs::remove_file(Self::lock_path(document)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn break_lock(&self, document: &Path) -> Result<bool> {
        let lock = Self::lock_path(document);
        if !lock.exists() {
            return Ok(false);
        }
        fs::remove_file(lock)?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "rename"
    }
}
