//! Reassembly of settled chunks into per-Unit artifacts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::job::SynthesisJob;
use crate::error::{PipelineError, Result};
use crate::text::Unit;

/// Marker inserted before the extension of a Unit with missing chunks.
pub const INCOMPLETE_TAG: &str = "incomplete";

/// Longest title kept in a file name, in characters.
const MAX_TITLE_CHARS: usize = 80;

/// Audio of one Unit, in chunk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub unit: usize,
    pub audio: Vec<u8>,
    pub chunk_count: usize,
    /// Sequence indices of chunks without audio
    pub failed: Vec<usize>,
}

impl Assembly {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The gap as an error, when there is one.
    pub fn gap(&self) -> Option<PipelineError> {
        if self.is_complete() {
            None
        } else {
            Some(PipelineError::ReassemblyGap {
                unit: self.unit,
                missing: self.failed.clone(),
            })
        }
    }
}

/// Concatenate succeeded chunks' audio in sequence order.
///
/// The result does not depend on the order the jobs finished in.
pub fn assemble(unit: usize, jobs: &[SynthesisJob]) -> Assembly {
    let mut ordered: Vec<&SynthesisJob> = jobs.iter().collect();
    ordered.sort_by_key(|job| job.chunk.sequence);

    let capacity = ordered
        .iter()
        .filter_map(|j| j.audio())
        .map(<[u8]>::len)
        .sum();
    let mut audio = Vec::with_capacity(capacity);
    let mut failed = Vec::new();

    for job in ordered {
        match job.audio() {
            Some(bytes) => audio.extend_from_slice(bytes),
            None => failed.push(job.chunk.sequence),
        }
    }

    Assembly {
        unit,
        audio,
        chunk_count: jobs.len(),
        failed,
    }
}

/// Writes Unit artifacts into a document's output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(&self, unit: &Unit) -> String {
        format!(
            "{:03}_{}",
            unit.group_index + 1,
            sanitize_title(&unit.display_title())
        )
    }

    /// `<NNN>_<title>.<ext>`
    pub fn file_name(&self, unit: &Unit) -> String {
        format!("{}.{}", self.stem(unit), self.extension)
    }

    pub fn final_path(&self, unit: &Unit) -> PathBuf {
        self.dir.join(self.file_name(unit))
    }

    /// `<NNN>_<title>.incomplete.<ext>`
    pub fn incomplete_path(&self, unit: &Unit) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}",
            self.stem(unit),
            INCOMPLETE_TAG,
            self.extension
        ))
    }

    /// Whether a complete artifact from an earlier run exists.
    pub fn has_final(&self, unit: &Unit) -> bool {
        self.final_path(unit).is_file()
    }

    /// Write an assembly to its final or incomplete path.
    ///
    /// The bytes go to a temporary file that is renamed into place, so a
    /// half-written artifact never appears under its final name.
    pub fn write(&self, unit: &Unit, assembly: &Assembly) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let target = if assembly.is_complete() {
            self.final_path(unit)
        } else {
            self.incomplete_path(unit)
        };

        let mut temp = tempfile::Builder::new()
            .prefix(".narrate-")
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        temp.write_all(&assembly.audio)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| PipelineError::Io(e.error))?;

        if assembly.is_complete() {
            let stale = self.incomplete_path(unit);
            if stale.exists() {
                fs::remove_file(&stale)?;
            }
        }

        Ok(target)
    }
}

/// Make a title safe for use in a file name.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c if c.is_whitespace() => ' ',
            c => c,
        })
        .take(MAX_TITLE_CHARS)
        .collect();

    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::segmenter::segment;
    use crate::text::Chunk;
    use speech_client::SynthesisError;
    use tempfile::TempDir;

    fn succeeded(sequence: usize, audio: &[u8]) -> SynthesisJob {
        let mut job = SynthesisJob::new(Chunk::new(0, sequence, "x"));
        job.start();
        job.succeed(audio.to_vec());
        job
    }

    fn failed(sequence: usize) -> SynthesisJob {
        let mut job = SynthesisJob::new(Chunk::new(0, sequence, "x"));
        job.start();
        job.fail(
            &SynthesisError::InvalidRequest("bad".into()),
            &crate::synth::RetryPolicy::default(),
        );
        job
    }

    #[test]
    fn test_order_independent_of_completion() {
        let jobs = vec![succeeded(2, b"C"), succeeded(0, b"A"), succeeded(1, b"B")];
        let assembly = assemble(0, &jobs);
        assert_eq!(assembly.audio, b"ABC");
        assert!(assembly.is_complete());
        assert!(assembly.gap().is_none());
    }

    #[test]
    fn test_gap_reported() {
        let jobs = vec![succeeded(0, b"A"), failed(1), succeeded(2, b"C")];
        let assembly = assemble(4, &jobs);
        assert_eq!(assembly.audio, b"AC");
        assert_eq!(assembly.failed, vec![1]);
        assert!(matches!(
            assembly.gap(),
            Some(PipelineError::ReassemblyGap { unit: 4, ref missing }) if missing == &vec![1]
        ));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("第一章 开始至第二章 继续"), "第一章 开始至第二章 继续");
        assert_eq!(sanitize_title("a/b:c?"), "a_b_c_");
        assert_eq!(sanitize_title("  ..  "), "untitled");
        assert_eq!(sanitize_title(&"长".repeat(200)).chars().count(), 80);
    }

    #[test]
    fn test_writer_paths_and_atomic_write() {
        let dir = TempDir::new().unwrap();
        let units = segment("第一章 开始\n内容", 5).unwrap();
        let writer = ArtifactWriter::new(dir.path(), ".mp3");

        assert_eq!(
            writer.final_path(&units[0]).file_name().unwrap(),
            "001_第一章 开始.mp3"
        );
        assert_eq!(
            writer.incomplete_path(&units[0]).file_name().unwrap(),
            "001_第一章 开始.incomplete.mp3"
        );

        let partial = assemble(0, &[succeeded(0, b"A"), failed(1)]);
        let path = writer.write(&units[0], &partial).unwrap();
        assert_eq!(path, writer.incomplete_path(&units[0]));
        assert!(!writer.has_final(&units[0]));

        let complete = assemble(0, &[succeeded(0, b"A"), succeeded(1, b"B")]);
        let path = writer.write(&units[0], &complete).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"AB");
        assert!(writer.has_final(&units[0]));
        assert!(!writer.incomplete_path(&units[0]).exists());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
