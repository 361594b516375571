//! Remembering finished documents between runs.
//!
//! A [`MarkerStore`] answers whether a document is done, hands out an
//! exclusive claim while it is being processed, and records completion.

mod manifest;
mod marker_file;
mod memory;
mod rename;

pub use manifest::{ArtifactManifest, path_tag};
pub use marker_file::MarkerFileStore;
pub use memory::MemoryMarkerStore;
pub use rename::{RenameMarker, SUCCESS_SUFFIX};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{MarkerKind, OutputConfig};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerStatus {
    Pending,
    /// Claimed by a run that has not finished (or crashed)
    InProgress,
    Completed,
}

/// Pluggable done-marker for documents.
pub trait MarkerStore: Send + Sync {
    fn status(&self, document: &Path) -> Result<MarkerStatus>;

    /// Take the exclusive claim on a document.
    ///
    /// Fails with `AlreadyClaimed` when another run holds it.
    fn claim(&self, document: &Path) -> Result<()>;

    /// Record completion and drop the claim. Returns where the document now
    /// lives, which differs from `document` when completion renames it.
    fn complete(&self, document: &Path) -> Result<PathBuf>;

    /// Drop the claim without recording completion.
    fn release(&self, document: &Path) -> Result<()>;

    /// Remove a claim left by a crashed run. Returns whether one existed.
    fn break_lock(&self, document: &Path) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// The store selected by the output settings.
pub fn store_for(output: &OutputConfig) -> anyhow::Result<Box<dyn MarkerStore>> {
    Ok(match output.marker {
        MarkerKind::Rename => Box::new(RenameMarker::new()),
        MarkerKind::MarkerFile => Box::new(MarkerFileStore::new(output.state_dir()?)),
    })
}
