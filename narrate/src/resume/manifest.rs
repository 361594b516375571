//! Per-document record kept next to the artifacts.
//!
//! The manifest names the document that owns an output directory and, for
//! each complete artifact, the hash of the Unit text it was made from. An
//! artifact is only reused while that hash still matches.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";

/// One complete artifact and the text behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub file: String,
    pub text_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Absolute path of the owning document
    pub document: PathBuf,
    /// Keyed by 1-based Unit number
    #[serde(default)]
    pub units: BTreeMap<usize, ArtifactRecord>,
}

impl ArtifactManifest {
    pub fn new(document: &Path) -> Self {
        Self {
            document: document_key(document),
            units: BTreeMap::new(),
        }
    }

    /// Read the manifest in `dir`. Missing or unreadable manifests give `None`.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(MANIFEST_FILE);
        let file = File::open(&path).ok()?;
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                log::warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        temp.persist(dir.join(MANIFEST_FILE))
            .map_err(|e| PipelineError::Io(e.error))?;
        Ok(())
    }

    pub fn owned_by(&self, document: &Path) -> bool {
        self.document == document_key(document)
    }

    /// Whether Unit `number` was last written to `file` from exactly `text`.
    pub fn matches(&self, number: usize, file: &str, text: &str) -> bool {
        self.units
            .get(&number)
            .is_some_and(|r| r.file == file && r.text_sha256 == text_hash(text))
    }

    pub fn record(&mut self, number: usize, file: impl Into<String>, text: &str) {
        self.units.insert(
            number,
            ArtifactRecord {
                file: file.into(),
                text_sha256: text_hash(text),
            },
        );
    }

    pub fn forget(&mut self, number: usize) -> Option<ArtifactRecord> {
        self.units.remove(&number)
    }
}

/// Absolute form of a document path, or the path as given.
pub fn document_key(document: &Path) -> PathBuf {
    fs::canonicalize(document).unwrap_or_else(|_| document.to_path_buf())
}

/// Short hex tag that tells apart documents sharing a file stem.
pub fn path_tag(document: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_key(document).to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
