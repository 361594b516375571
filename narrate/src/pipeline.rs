//! Document orchestration: discovery, resumption, and per-document runs.
//!
//! Documents are processed one after another. Within a document every chunk
//! of every Unit that still needs audio goes to the [`Scheduler`] at once,
//! and each Unit is written as soon as its last chunk settles.

use indicatif::ProgressBar;
use regex::Regex;
use speech_client::Synthesizer;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use walkdir::WalkDir;

use crate::config::NarrateConfig;
use crate::document;
use crate::error::{PipelineError, Result};
use crate::report::{BatchReport, DocumentReport, DocumentState, UnitReport, UnitStatus};
use crate::resume::{ArtifactManifest, MarkerStatus, MarkerStore, path_tag};
use crate::synth::{ArtifactWriter, Scheduler, SettledUnit, StopSignal, UnitSink};
use crate::text::{Segmenter, Unit, chunk_units};

/// Drives documents through segmentation, synthesis, and artifact writing.
pub struct Orchestrator {
    config: NarrateConfig,
    synthesizer: Arc<dyn Synthesizer>,
    markers: Box<dyn MarkerStore>,
    stop: StopSignal,
    progress: Option<ProgressBar>,
    break_locks: bool,
}

impl Orchestrator {
    /// Fails with a configuration error before any document is touched.
    pub fn new(
        config: NarrateConfig,
        synthesizer: Arc<dyn Synthesizer>,
        markers: Box<dyn MarkerStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            synthesizer,
            markers,
            stop: StopSignal::new(),
            progress: None,
            break_locks: false,
        })
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Remove claims left behind by a crashed run before processing.
    pub fn with_break_locks(mut self, break_locks: bool) -> Self {
        self.break_locks = break_locks;
        self
    }

    pub fn markers(&self) -> &dyn MarkerStore {
        self.markers.as_ref()
    }

    /// Where a document's artifacts and report go.
    ///
    /// `<root>/<stem>`, unless a different document already owns that
    /// directory, in which case `<root>/<stem>-<path tag>`.
    pub fn output_dir(&self, document: &Path) -> PathBuf {
        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let root = self.config.output.root();
        let preferred = root.join(&stem);

        match ArtifactManifest::load(&preferred) {
            Some(manifest) if !manifest.owned_by(document) => {
                let dir = root.join(format!("{}-{}", stem, path_tag(document)));
                log::info!(
                    "{} belongs to {}; using {}",
                    preferred.display(),
                    manifest.document.display(),
                    dir.display()
                );
                dir
            }
            _ => preferred,
        }
    }

    /// Process every document in order; one document's failure never stops
    /// the rest.
    pub async fn process_batch(&self, documents: &[PathBuf]) -> BatchReport {
        let mut batch = BatchReport::default();

        for (i, path) in documents.iter().enumerate() {
            if self.stop.is_stopped() {
                log::warn!(
                    "Stopped; {} document(s) left unprocessed",
                    documents.len() - i
                );
                break;
            }
            log::info!("[{}/{}] {}", i + 1, documents.len(), path.display());
            batch.push(self.process(path).await);
        }

        batch
    }

    /// Run one document to a terminal state.
    pub async fn process(&self, path: &Path) -> DocumentReport {
        let mut report = DocumentReport::new(path);

        if self.break_locks {
            match self.markers.break_lock(path) {
                Ok(true) => log::warn!("Removed stale claim on {}", path.display()),
                Ok(false) => {}
                Err(e) => log::warn!("Could not remove claim on {}: {}", path.display(), e),
            }
        }

        match self.markers.status(path) {
            Ok(MarkerStatus::Completed) => {
                log::info!("{} already completed, skipping", path.display());
                report.transition(DocumentState::Skipped);
                return report;
            }
            Ok(_) => {}
            Err(e) => {
                report.fail(e);
                return report;
            }
        }

        if let Err(e) = self.markers.claim(path) {
            log::error!("{}: {}", path.display(), e);
            report.fail(e);
            return report;
        }

        let outcome = self.run_document(path, &mut report).await;

        match outcome {
            Ok(()) if !report.has_gaps() => match self.markers.complete(path) {
                Ok(done) => {
                    log::debug!("{} recorded as done at {}", path.display(), done.display());
                    report.transition(DocumentState::Completed);
                }
                Err(e) => {
                    log::error!("Could not record completion of {}: {}", path.display(), e);
                    self.release(path);
                    report.fail(e);
                }
            },
            Ok(()) => {
                self.release(path);
                report.transition(DocumentState::PartiallyCompleted);
            }
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                self.release(path);
                report.fail(e);
            }
        }

        if let Some(dir) = report.output_dir.clone() {
            if let Err(e) = report.write_json(&dir) {
                log::warn!("Could not write report for {}: {}", path.display(), e);
            }
        }

        report
    }

    fn release(&self, path: &Path) {
        if let Err(e) = self.markers.release(path) {
            log::warn!("Could not release claim on {}: {}", path.display(), e);
        }
    }

    async fn run_document(&self, path: &Path, report: &mut DocumentReport) -> Result<()> {
        report.transition(DocumentState::Segmenting);
        let doc = document::load(path)?;
        report.encoding = Some(doc.encoding.clone());

        let segmenter = Segmenter::new(
            self.config.segmenting.group_size,
            self.config.segmenting.numeral_magnitude,
            self.config.segmenting.title_separator.clone(),
        )?;
        let units = segmenter.segment(&doc.text);
        log::info!("{}: {} unit(s)", path.display(), units.len());

        let output_dir = self.output_dir(path);
        report.output_dir = Some(output_dir.clone());
        let writer = ArtifactWriter::new(&output_dir, &self.config.output.extension);

        let mut manifest = ArtifactManifest::load(&output_dir)
            .filter(|m| m.owned_by(path))
            .unwrap_or_else(|| ArtifactManifest::new(path));

        let mut pending = Vec::new();
        for unit in units {
            let number = unit.group_index + 1;
            if writer.has_final(&unit)
                && manifest.matches(number, &writer.file_name(&unit), &unit.text())
            {
                log::info!("Reusing {}", writer.final_path(&unit).display());
                report.units.push(UnitReport {
                    number,
                    title: unit.display_title(),
                    sections: (unit.first_ordinal(), unit.last_ordinal()),
                    status: UnitStatus::Reused,
                    chunks: 0,
                    failed_chunks: Vec::new(),
                    artifact: Some(writer.final_path(&unit)),
                });
            } else {
                remove_stale(&writer, &mut manifest, &unit)?;
                pending.push(unit);
            }
        }
        // Claims the directory before any audio lands in it
        manifest.save(&output_dir)?;

        let chunks = chunk_units(&pending, self.config.segmenting.max_chunk_bytes)?;
        report.transition(DocumentState::Scheduling);

        let mut scheduler = Scheduler::from_config(Arc::clone(&self.synthesizer), &self.config)?
            .with_stop_signal(self.stop.clone());
        if let Some(progress) = &self.progress {
            progress.reset();
            progress.set_length(chunks.len() as u64);
            progress.set_message(doc.stem());
            scheduler.set_progress(Some(progress.clone()));
        }

        let mut sink = ArtifactSink::new(&writer, &pending, manifest);
        let summary = scheduler.drive(chunks, &mut sink).await?;
        report.units.extend(sink.reports);

        for unit in &pending {
            if summary.delivered.contains(&unit.group_index) {
                continue;
            }
            report.units.push(UnitReport {
                number: unit.group_index + 1,
                title: unit.display_title(),
                sections: (unit.first_ordinal(), unit.last_ordinal()),
                status: UnitStatus::Abandoned,
                chunks: 0,
                failed_chunks: Vec::new(),
                artifact: None,
            });
        }

        report.units.sort_by_key(|u| u.number);
        Ok(())
    }
}

/// Drop an artifact that no longer matches its Unit, so a later partial
/// result never sits next to stale audio under the final name.
fn remove_stale(
    writer: &ArtifactWriter,
    manifest: &mut ArtifactManifest,
    unit: &Unit,
) -> Result<()> {
    let recorded = manifest.forget(unit.group_index + 1).map(|r| writer.dir().join(r.file));
    for stale in recorded.into_iter().chain([writer.final_path(unit)]) {
        if stale.is_file() {
            log::info!("Removing outdated {}", stale.display());
            fs::remove_file(&stale)?;
        }
    }
    Ok(())
}

/// Writes each settled Unit to disk and records what happened to it.
struct ArtifactSink<'a> {
    writer: &'a ArtifactWriter,
    units: BTreeMap<usize, &'a Unit>,
    manifest: ArtifactManifest,
    reports: Vec<UnitReport>,
}

impl<'a> ArtifactSink<'a> {
    fn new(writer: &'a ArtifactWriter, units: &'a [Unit], manifest: ArtifactManifest) -> Self {
        Self {
            writer,
            units: units.iter().map(|u| (u.group_index, u)).collect(),
            manifest,
            reports: Vec::new(),
        }
    }
}

impl UnitSink for ArtifactSink<'_> {
    fn accept(&mut self, settled: SettledUnit) -> Result<()> {
        let unit = self.units.get(&settled.unit).copied().ok_or_else(|| {
            PipelineError::Task(format!("settled unknown unit {}", settled.unit + 1))
        })?;
        let assembly = settled.assemble();

        let (status, artifact) = if assembly.audio.is_empty() {
            log::error!("Unit {} produced no audio", unit.group_index + 1);
            (UnitStatus::Failed, None)
        } else {
            let path = self.writer.write(unit, &assembly)?;
            match assembly.gap() {
                Some(gap) => {
                    log::warn!("{}; wrote {}", gap, path.display());
                    (UnitStatus::Partial, Some(path))
                }
                None => {
                    log::info!("Wrote {}", path.display());
                    self.manifest.record(
                        unit.group_index + 1,
                        self.writer.file_name(unit),
                        &unit.text(),
                    );
                    self.manifest.save(self.writer.dir())?;
                    (UnitStatus::Complete, Some(path))
                }
            }
        };

        self.reports.push(UnitReport {
            number: unit.group_index + 1,
            title: unit.display_title(),
            sections: (unit.first_ordinal(), unit.last_ordinal()),
            status,
            chunks: assembly.chunk_count,
            failed_chunks: assembly.failed,
            artifact,
        });
        Ok(())
    }
}

/// Expand files and directories into the documents to process.
///
/// Directory contents are filtered to supported formats and ordered by the
/// first number in the file name, then by name. Explicit files are kept as
/// given.
pub fn collect_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut documents = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| document::is_supported(path) && !is_hidden(path))
                .collect();
            found.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
            for path in found {
                if seen.insert(path.clone()) {
                    documents.push(path);
                }
            }
        } else if input.is_file() {
            if seen.insert(input.clone()) {
                documents.push(input.clone());
            }
        } else {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", input.display()),
            )));
        }
    }

    Ok(documents)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

/// (first number in the file name, file name); names without digits sort last.
fn sort_key(path: &Path) -> (u64, String) {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let re = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("valid regex"));

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let number = re
        .find(&name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u64::MAX);
    (number, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::{MarkerFileStore, MemoryMarkerStore, RenameMarker};
    use crate::text::split;
    use speech_client::{MockSynthesizer, SynthesisError};
    use std::fs;
    use tempfile::TempDir;

    const BOOK: &str = "第一章 开始\n甲甲甲。\n第二章 继续\n乙乙乙。\n";

    fn config(root: &Path, group_size: usize) -> NarrateConfig {
        let mut config = NarrateConfig::default();
        config.output.root = Some(root.to_path_buf());
        config.segmenting.group_size = group_size;
        config.scheduler.base_delay_ms = 0;
        config.scheduler.jitter_floor_ms = 0;
        config
    }

    fn orchestrator(config: NarrateConfig, mock: &Arc<MockSynthesizer>) -> Orchestrator {
        Orchestrator::new(config, mock.clone(), Box::new(MemoryMarkerStore::new())).unwrap()
    }

    fn write_book(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[tokio::test]
    async fn test_document_completes_and_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = orchestrator(config(&dir.path().join("out"), 1), &mock);

        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::Completed);
        assert_eq!(report.units.len(), 2);
        assert!(report.units.iter().all(|u| u.status == UnitStatus::Complete));

        let out = dir.path().join("out").join("book");
        assert_eq!(
            fs::read_to_string(out.join("001_第一章 开始.mp3")).unwrap(),
            "第一章 开始\n甲甲甲。\n"
        );
        assert!(out.join("002_第二章 继续.mp3").exists());
        assert!(out.join("report.json").exists());
        assert_eq!(orch.markers().status(&book).unwrap(), MarkerStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_run_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = orchestrator(config(dir.path(), 1), &mock);

        orch.process(&book).await;
        let calls = mock.call_count();
        assert_eq!(calls, 2);

        let report = orch.process(&book).await;
        assert_eq!(report.state, DocumentState::Skipped);
        assert_eq!(mock.call_count(), calls);
    }

    #[tokio::test]
    async fn test_existing_artifact_is_reused() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let out = dir.path().join("book");

        // First run loses the second Unit
        let failing = Arc::new(MockSynthesizer::always_succeeds().with_script(
            "第二章 继续\n乙乙乙。\n",
            usize::MAX,
            SynthesisError::InvalidRequest("voice".into()),
        ));
        let report = orchestrator(config(dir.path(), 1), &failing).process(&book).await;
        assert_eq!(report.state, DocumentState::PartiallyCompleted);
        let first = fs::read(out.join("001_第一章 开始.mp3")).unwrap();

        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = orchestrator(config(dir.path(), 1), &mock);
        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::Completed);
        assert_eq!(report.units[0].status, UnitStatus::Reused);
        assert_eq!(report.units[1].status, UnitStatus::Complete);
        assert_eq!(mock.calls_for("第一章 开始\n甲甲甲。\n"), 0);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(fs::read(out.join("001_第一章 开始.mp3")).unwrap(), first);
    }

    #[tokio::test]
    async fn test_unrecorded_artifact_is_replaced() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let out = dir.path().join("book");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("001_第一章 开始.mp3"), b"unknown origin").unwrap();

        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let report = orchestrator(config(dir.path(), 1), &mock).process(&book).await;

        assert_eq!(report.units[0].status, UnitStatus::Complete);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(
            fs::read_to_string(out.join("001_第一章 开始.mp3")).unwrap(),
            "第一章 开始\n甲甲甲。\n"
        );
    }

    #[tokio::test]
    async fn test_edited_document_is_synthesized_again() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = Orchestrator::new(
            config(&dir.path().join("out"), 5),
            mock.clone(),
            Box::new(MarkerFileStore::new(dir.path().join("state"))),
        )
        .unwrap();

        assert_eq!(orch.process(&book).await.state, DocumentState::Completed);
        assert_eq!(orch.process(&book).await.state, DocumentState::Skipped);

        let edited = "第一章 开始\n全新的内容。\n第二章 继续\n乙乙乙。\n";
        fs::write(&book, edited).unwrap();
        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::Completed);
        assert_eq!(report.units[0].status, UnitStatus::Complete);
        assert_eq!(mock.calls_for(edited), 1);
        let artifact = report.units[0].artifact.clone().unwrap();
        assert_eq!(fs::read_to_string(artifact).unwrap(), edited);
    }

    #[tokio::test]
    async fn test_same_stem_documents_get_separate_dirs() {
        let dir = TempDir::new().unwrap();
        for sub in ["a", "b"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        let a = write_book(&dir.path().join("a"), "book.txt", BOOK);
        let other = "第一章 开始\n丙丙丙。\n第二章 继续\n丁丁丁。\n";
        let b = write_book(&dir.path().join("b"), "book.txt", other);

        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = orchestrator(config(&dir.path().join("out"), 1), &mock);
        let batch = orch.process_batch(&[a.clone(), b.clone()]).await;

        assert!(batch.documents.iter().all(|d| d.state == DocumentState::Completed));
        assert!(batch.documents[1].units.iter().all(|u| u.status == UnitStatus::Complete));
        assert_eq!(mock.call_count(), 4);
        assert_eq!(mock.calls_for("第一章 开始\n丙丙丙。\n"), 1);

        let dir_a = batch.documents[0].output_dir.clone().unwrap();
        let dir_b = batch.documents[1].output_dir.clone().unwrap();
        assert_eq!(dir_a, dir.path().join("out").join("book"));
        assert_ne!(dir_a, dir_b);
        assert_eq!(
            fs::read_to_string(dir_b.join("001_第一章 开始.mp3")).unwrap(),
            "第一章 开始\n丙丙丙。\n"
        );

        // Stable across runs
        assert_eq!(orch.output_dir(&a), dir_a);
        assert_eq!(orch.output_dir(&b), dir_b);
    }

    #[tokio::test]
    async fn test_failed_chunk_gives_partial_document() {
        let dir = TempDir::new().unwrap();
        let text = "第一章 开始\n\n甲甲甲甲甲甲。\n\n乙乙乙乙乙乙。\n\n丙丙丙丙丙丙。\n";
        let book = write_book(dir.path(), "book.txt", text);

        let mut config = config(dir.path(), 1);
        config.segmenting.max_chunk_bytes = 24;
        let pieces = split(text, 24).unwrap();
        assert!(pieces.len() >= 3);

        let mock = Arc::new(MockSynthesizer::always_succeeds().with_script(
            &pieces[1],
            usize::MAX,
            SynthesisError::Transient("reset".into()),
        ));
        let orch = orchestrator(config, &mock);
        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::PartiallyCompleted);
        assert!(report.is_failure());
        let unit = &report.units[0];
        assert_eq!(unit.status, UnitStatus::Partial);
        assert_eq!(unit.failed_chunks, vec![1]);
        assert_eq!(mock.calls_for(&pieces[1]), 3);

        let artifact = unit.artifact.clone().unwrap();
        assert!(artifact.to_string_lossy().ends_with(".incomplete.mp3"));
        let expected: String = pieces
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, p)| p.as_str())
            .collect();
        assert_eq!(fs::read_to_string(artifact).unwrap(), expected);

        // Not recorded as done, so the next run tries again
        assert_eq!(orch.markers().status(&book).unwrap(), MarkerStatus::Pending);
    }

    #[tokio::test]
    async fn test_unit_without_audio_is_failed_and_not_written() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds().with_script(
            "第二章 继续\n乙乙乙。\n",
            usize::MAX,
            SynthesisError::InvalidRequest("voice".into()),
        ));
        let orch = orchestrator(config(dir.path(), 1), &mock);
        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::PartiallyCompleted);
        assert_eq!(report.units[1].status, UnitStatus::Failed);
        assert!(report.units[1].artifact.is_none());
        assert!(!dir.path().join("book").join("002_第二章 继续.mp3").exists());
    }

    #[tokio::test]
    async fn test_batch_continues_after_fatal_document_error() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("1.txt");
        fs::write(&bad, [0u8, 159, 146, 150]).unwrap();
        let good = write_book(dir.path(), "2.txt", BOOK);

        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = orchestrator(config(&dir.path().join("out"), 5), &mock);
        let batch = orch.process_batch(&[bad.clone(), good]).await;

        assert_eq!(batch.documents[0].state, DocumentState::Failed);
        assert!(batch.documents[0].error.as_deref().unwrap().contains("decode"));
        assert_eq!(batch.documents[1].state, DocumentState::Completed);
        assert_eq!(batch.exit_code(), 1);
        // The claim is dropped so a later run can try again
        assert_eq!(orch.markers().status(&bad).unwrap(), MarkerStatus::Pending);
    }

    #[tokio::test]
    async fn test_claimed_document_fails_unless_locks_broken() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());

        let orch = orchestrator(config(dir.path(), 5), &mock);
        orch.markers().claim(&book).unwrap();
        let report = orch.process(&book).await;
        assert_eq!(report.state, DocumentState::Failed);
        assert_eq!(mock.call_count(), 0);

        let orch = orch.with_break_locks(true);
        let report = orch.process(&book).await;
        assert_eq!(report.state, DocumentState::Completed);
    }

    #[tokio::test]
    async fn test_stop_abandons_units() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "book.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let stop = StopSignal::new();
        stop.stop();

        let orch = orchestrator(config(dir.path(), 1), &mock).with_stop_signal(stop);
        let report = orch.process(&book).await;

        assert_eq!(report.state, DocumentState::PartiallyCompleted);
        assert!(report.units.iter().all(|u| u.status == UnitStatus::Abandoned));
        assert_eq!(mock.call_count(), 0);
        assert!(!dir.path().join("book").join("001_第一章 开始.mp3").exists());
    }

    #[tokio::test]
    async fn test_rename_marker_renames_source() {
        let dir = TempDir::new().unwrap();
        let book = write_book(dir.path(), "3-5.txt", BOOK);
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let orch = Orchestrator::new(
            config(&dir.path().join("out"), 5),
            mock.clone(),
            Box::new(RenameMarker::new()),
        )
        .unwrap();

        let report = orch.process(&book).await;
        assert_eq!(report.state, DocumentState::Completed);
        assert!(dir.path().join("3-5_success.txt").exists());
        assert!(!book.exists());
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut config = NarrateConfig::default();
        config.scheduler.concurrency = 0;
        let mock: Arc<dyn Synthesizer> = Arc::new(MockSynthesizer::always_succeeds());
        assert!(matches!(
            Orchestrator::new(config, mock, Box::new(MemoryMarkerStore::new())),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_collect_inputs_orders_by_number() {
        let dir = TempDir::new().unwrap();
        for name in ["10-12.txt", "2-4.txt", "notes.txt", "1.epub", "cover.jpg", ".hidden.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("more")).unwrap();
        fs::write(dir.path().join("more").join("5.txt"), "x").unwrap();

        let names = |paths: Vec<PathBuf>| -> Vec<String> {
            paths
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                .collect()
        };

        let flat = collect_inputs(&[dir.path().to_path_buf()], false).unwrap();
        assert_eq!(names(flat), vec!["1.epub", "2-4.txt", "10-12.txt", "notes.txt"]);

        let deep = collect_inputs(&[dir.path().to_path_buf()], true).unwrap();
        assert_eq!(
            names(deep),
            vec!["1.epub", "2-4.txt", "5.txt", "10-12.txt", "notes.txt"]
        );
    }

    #[test]
    fn test_collect_inputs_missing_path() {
        assert!(collect_inputs(&[PathBuf::from("/nonexistent/book.txt")], false).is_err());
    }
}
