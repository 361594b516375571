//! Per-document and per-batch run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the report written into each document's output directory.
pub const REPORT_FILE: &str = "report.json";

/// Lifecycle of one document through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentState {
    Discovered,
    Segmenting,
    Scheduling,
    Completed,
    PartiallyCompleted,
    /// Already completed by an earlier run
    Skipped,
    Failed,
}

impl DocumentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Skipped | Self::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Every chunk synthesized
    Complete,
    /// Final artifact from an earlier run kept as is
    Reused,
    /// Written with gaps
    Partial,
    /// No chunk produced audio
    Failed,
    /// Discarded because the run was stopped
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    /// 1-based Unit number, as used in artifact names
    pub number: usize,
    pub title: String,
    /// Section ordinals covered, inclusive
    pub sections: (usize, usize),
    pub status: UnitStatus,
    pub chunks: usize,
    /// Sequence indices of chunks without audio
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document: PathBuf,
    pub state: DocumentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub units: Vec<UnitReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DocumentReport {
    pub fn new(document: &Path) -> Self {
        Self {
            document: document.to_path_buf(),
            state: DocumentState::Discovered,
            encoding: None,
            output_dir: None,
            units: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn transition(&mut self, state: DocumentState) {
        log::debug!("{}: {:?} -> {:?}", self.document.display(), self.state, state);
        self.state = state;
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.transition(DocumentState::Failed);
    }

    /// Whether any Unit lacks complete audio.
    pub fn has_gaps(&self) -> bool {
        self.units.iter().any(|u| {
            matches!(
                u.status,
                UnitStatus::Partial | UnitStatus::Failed | UnitStatus::Abandoned
            )
        })
    }

    /// Whether this document should make the process exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.state,
            DocumentState::Failed | DocumentState::PartiallyCompleted
        ) || self.has_gaps()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    /// Write `report.json` into `dir`.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Human-readable summary lines.
    pub fn summary(&self) -> String {
        let mut out = format!("{} [{:?}]", self.document.display(), self.state);
        if let Some(encoding) = &self.encoding {
            out.push_str(&format!(" ({})", encoding));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("\n  error: {}", error));
        }
        for unit in &self.units {
            out.push_str(&format!(
                "\n  {:03} {} - {:?}",
                unit.number, unit.title, unit.status
            ));
            if !unit.failed_chunks.is_empty() {
                out.push_str(&format!(
                    " (missing chunks {:?} of {})",
                    unit.failed_chunks, unit.chunks
                ));
            }
        }
        out
    }
}

/// Reports for a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
}

impl BatchReport {
    pub fn push(&mut self, report: DocumentReport) {
        self.documents.push(report);
    }

    pub fn count(&self, state: DocumentState) -> usize {
        self.documents.iter().filter(|d| d.state == state).count()
    }

    pub fn has_failures(&self) -> bool {
        self.documents.iter().any(DocumentReport::is_failure)
    }

    /// Process exit code: 0 when every document finished cleanly.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() { 1 } else { 0 }
    }
}
