//! Completion markers kept as JSON files in a state directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::{MarkerStatus, MarkerStore};
use crate::error::{PipelineError, Result};

/// Contents of a completion marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Marker {
    document: PathBuf,
    /// SHA256 of the first 1MB when the document finished
    content_hash: String,
    completed_at: DateTime<Utc>,
}

/// Leaves source files untouched; an edited document counts as new.
#[derive(Debug, Clone)]
pub struct MarkerFileStore {
    state_dir: PathBuf,
}

impl MarkerFileStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Stable key for a document path.
    fn key(document: &Path) -> String {
        let absolute = fs::canonicalize(document).unwrap_or_else(|_| document.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(absolute.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    fn marker_path(&self, document: &Path) -> PathBuf {
        self.state_dir.join(format!("{}.json", Self::key(document)))
    }

    fn lock_path(&self, document: &Path) -> PathBuf {
        self.state_dir.join(format!("{}.lock", Self::key(document)))
    }

    fn read_marker(&self, document: &Path) -> Option<Marker> {
        let file = File::open(self.marker_path(document)).ok()?;
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(marker) => Some(marker),
            Err(e) => {
                log::warn!("Ignoring unreadable marker for {}: {}", document.display(), e);
                None
            }
        }
    }
}

/// Hash of the first 1MB of a file.
fn content_hash(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = vec![0u8; 1024 * 1024];
    let mut filled = 0;
    loop {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 || filled + n == buffer.len() {
            filled += n;
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);

    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    Ok(format!("{:x}", hasher.finalize()))
}

impl MarkerStore for MarkerFileStore {
    fn status(&self, document: &Path) -> Result<MarkerStatus> {
        if let Some(marker) = self.read_marker(document) {
            let unchanged = match content_hash(document) {
                Ok(hash) => hash == marker.content_hash,
                // Source moved away after finishing
                Err(_) => true,
            };
            if unchanged {
                return Ok(MarkerStatus::Completed);
            }
            log::info!(
                "{} changed since {}; processing again",
                document.display(),
                marker.completed_at.format("%Y-%m-%d %H:%M")
            );
        }
        if self.lock_path(document).exists() {
            return Ok(MarkerStatus::InProgress);
        }
        Ok(MarkerStatus::Pending)
    }

    fn claim(&self, document: &Path) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(document))
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PipelineError::AlreadyClaimed(
                document.display().to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn complete(&self, document: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.state_dir)?;
        let marker = Marker {
            document: document.to_path_buf(),
            content_hash: content_hash(document)?,
            completed_at: Utc::now(),
        };

        let mut temp = tempfile::NamedTempFile::new_in(&self.state_dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &marker)?;
            writer.flush()?;
        }
        temp.persist(self.marker_path(document))
            .map_err(|e| PipelineError::Io(e.error))?;

        self.release(document)?;
        Ok(document.to_path_buf())
    }

    fn release(&self, document: &Path) -> Result<()> {
        match fs::remove_file(self.lock_path(document)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn break_lock(&self, document: &Path) -> Result<bool> {
        let lock = self.lock_path(document);
        if !lock.exists() {
            return Ok(false);
        }
        fs::remove_file(lock)?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "marker-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_complete_writes_marker_and_keeps_source() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("book.txt");
        fs::write(&doc, "第一章").unwrap();
        let store = MarkerFileStore::new(dir.path().join("state"));

        store.claim(&doc).unwrap();
        assert_eq!(store.complete(&doc).unwrap(), doc);
        assert!(doc.exists());
        assert_eq!(store.status(&doc).unwrap(), MarkerStatus::Completed);

        let marker = store.read_marker(&doc).unwrap();
        assert_eq!(marker.document, doc);
    }

    #[test]
    fn test_edited_document_is_pending_again() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("book.txt");
        fs::write(&doc, "第一章").unwrap();
        let store = MarkerFileStore::new(dir.path().join("state"));

        store.claim(&doc).unwrap();
        store.complete(&doc).unwrap();
        fs::write(&doc, "第一章\n第二章").unwrap();

        assert_eq!(store.status(&doc).unwrap(), MarkerStatus::Pending);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("a.txt");
        fs::write(&doc, "abc").unwrap();
        assert_eq!(
            content_hash(&doc).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
