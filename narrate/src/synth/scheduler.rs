//! Concurrent synthesis with bounded parallelism and per-chunk retry.
//!
//! Every chunk becomes a task in a `JoinSet`; a semaphore bounds how many of
//! them talk to the synthesizer at once. Chunks are independent of each
//! other, so a failure never stops its siblings. Order is restored only when
//! a Unit's jobs are handed to the sink.

use futures_util::StreamExt;
use indicatif::ProgressBar;
use speech_client::{SpeechFrame, SpeechRequest, SynthesisError, Synthesizer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use super::assemble::{Assembly, assemble};
use super::job::SynthesisJob;
use super::retry::RetryPolicy;
use crate::config::{NarrateConfig, VoiceConfig};
use crate::error::{PipelineError, Result};
use crate::text::Chunk;

/// Cooperative cancellation shared by every task of a run.
///
/// Once stopped, no new attempts start, jobs waiting to retry give up, and
/// attempts already talking to the synthesizer are allowed to finish.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// All jobs of one Unit, terminal and sorted by sequence.
#[derive(Debug, Clone)]
pub struct SettledUnit {
    pub unit: usize,
    pub jobs: Vec<SynthesisJob>,
}

impl SettledUnit {
    pub fn assemble(&self) -> Assembly {
        assemble(self.unit, &self.jobs)
    }

    /// A Unit with cancelled jobs is discarded rather than written.
    pub fn is_abandoned(&self) -> bool {
        self.jobs.iter().any(SynthesisJob::is_cancelled)
    }
}

/// Receives Units as soon as all of their jobs are terminal.
pub trait UnitSink {
    fn accept(&mut self, settled: SettledUnit) -> Result<()>;
}

impl UnitSink for Vec<SettledUnit> {
    fn accept(&mut self, settled: SettledUnit) -> Result<()> {
        self.push(settled);
        Ok(())
    }
}

/// What happened to the Units of one `drive` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Units handed to the sink, in settle order
    pub delivered: Vec<usize>,
    /// Units discarded because the run was stopped
    pub abandoned: Vec<usize>,
}

/// Runs chunks through a synthesizer.
pub struct Scheduler {
    synthesizer: Arc<dyn Synthesizer>,
    voice: Arc<VoiceConfig>,
    concurrency: usize,
    policy: RetryPolicy,
    stop: StopSignal,
    progress: Option<ProgressBar>,
}

impl Scheduler {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        voice: VoiceConfig,
        concurrency: usize,
        policy: RetryPolicy,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(PipelineError::config("concurrency must be at least 1"));
        }
        if policy.max_attempts == 0 {
            return Err(PipelineError::config("max_retries must be at least 1"));
        }
        Ok(Self {
            synthesizer,
            voice: Arc::new(voice),
            concurrency,
            policy,
            stop: StopSignal::new(),
            progress: None,
        })
    }

    pub fn from_config(synthesizer: Arc<dyn Synthesizer>, config: &NarrateConfig) -> Result<Self> {
        Self::new(
            synthesizer,
            config.voice.clone(),
            config.scheduler.concurrency,
            config.scheduler.retry_policy(),
        )
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Tick `progress` once per finished job.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn set_progress(&mut self, progress: Option<ProgressBar>) {
        self.progress = progress;
    }

    /// Run every chunk to a terminal state; jobs come back in input order.
    pub async fn run(&self, chunks: Vec<Chunk>) -> Result<Vec<SynthesisJob>> {
        let total = chunks.len();
        let mut set = self.dispatch(chunks);
        let mut jobs: Vec<Option<SynthesisJob>> = (0..total).map(|_| None).collect();

        while let Some(joined) = set.join_next().await {
            let (index, job) = joined.map_err(|e| PipelineError::Task(e.to_string()))?;
            jobs[index] = Some(job);
        }

        jobs.into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PipelineError::Task("a synthesis task did not report back".into()))
    }

    /// Run chunks and hand each Unit to `sink` as soon as it settles.
    ///
    /// Units touched by cancellation are discarded and listed in the summary.
    pub async fn drive(&self, chunks: Vec<Chunk>, sink: &mut dyn UnitSink) -> Result<DriveSummary> {
        let mut waiting: BTreeMap<usize, (usize, Vec<SynthesisJob>)> = BTreeMap::new();
        for chunk in &chunks {
            waiting.entry(chunk.unit).or_insert((0, Vec::new())).0 += 1;
        }

        let mut set = self.dispatch(chunks);
        let mut summary = DriveSummary::default();

        while let Some(joined) = set.join_next().await {
            let (_, job) = joined.map_err(|e| PipelineError::Task(e.to_string()))?;
            let unit = job.chunk.unit;

            let Some((expected, jobs)) = waiting.get_mut(&unit) else {
                continue;
            };
            jobs.push(job);
            if jobs.len() < *expected {
                continue;
            }

            let Some((_, mut jobs)) = waiting.remove(&unit) else {
                continue;
            };
            jobs.sort_by_key(|job| job.chunk.sequence);
            let settled = SettledUnit { unit, jobs };

            if settled.is_abandoned() {
                log::info!("Discarding unit {} after stop", unit + 1);
                summary.abandoned.push(unit);
            } else {
                sink.accept(settled)?;
                summary.delivered.push(unit);
            }
        }

        Ok(summary)
    }

    fn dispatch(&self, chunks: Vec<Chunk>) -> JoinSet<(usize, SynthesisJob)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let synthesizer = Arc::clone(&self.synthesizer);
            let voice = Arc::clone(&self.voice);
            let stop = self.stop.clone();
            let progress = self.progress.clone();
            let policy = self.policy;

            set.spawn(async move {
                let mut job = SynthesisJob::new(chunk);

                let permit = tokio::select! {
                    biased;
                    _ = stop.stopped() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let job = match permit {
                    Some(permit) => {
                        let job = run_job(job, synthesizer.as_ref(), &voice, policy, &stop).await;
                        drop(permit);
                        job
                    }
                    None => {
                        job.cancel();
                        job
                    }
                };

                if let Some(progress) = &progress {
                    progress.inc(1);
                }
                (index, job)
            });
        }

        set
    }
}

/// Drive one job through attempts until it is terminal.
async fn run_job(
    mut job: SynthesisJob,
    synthesizer: &dyn Synthesizer,
    voice: &VoiceConfig,
    policy: RetryPolicy,
    stop: &StopSignal,
) -> SynthesisJob {
    loop {
        if stop.is_stopped() {
            job.cancel();
            return job;
        }

        job.start();
        let request = voice.request(&job.chunk.text);

        match collect_audio(synthesizer, &request).await {
            Ok(audio) => {
                log::debug!(
                    "Unit {} chunk {}: {} bytes of audio (attempt {})",
                    job.chunk.unit + 1,
                    job.chunk.sequence,
                    audio.len(),
                    job.attempt_count
                );
                job.succeed(audio);
                return job;
            }
            Err(e) => match job.fail(&e, &policy) {
                Some(delay) => {
                    log::warn!(
                        "Unit {} chunk {} failed (attempt {}/{}), retrying in {:?}: {}",
                        job.chunk.unit + 1,
                        job.chunk.sequence,
                        job.attempt_count,
                        policy.max_attempts,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.stopped() => {
                            job.cancel();
                            return job;
                        }
                    }
                }
                None => {
                    log::error!(
                        "Unit {} chunk {} failed after {} attempt(s): {}",
                        job.chunk.unit + 1,
                        job.chunk.sequence,
                        job.attempt_count,
                        e
                    );
                    return job;
                }
            },
        }
    }
}

/// Consume a synthesis stream, keeping only audio frames.
///
/// Audio from a stream that fails part way is discarded with the attempt.
pub async fn collect_audio(
    synthesizer: &dyn Synthesizer,
    request: &SpeechRequest,
) -> speech_client::Result<Vec<u8>> {
    let mut stream = synthesizer.synthesize(request).await?;
    let mut audio = Vec::new();

    while let Some(frame) = stream.next().await {
        match frame? {
            SpeechFrame::Audio(bytes) => audio.extend_from_slice(&bytes),
            SpeechFrame::Metadata(_) => {}
        }
    }

    if audio.is_empty() {
        return Err(SynthesisError::NoAudio);
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::job::{FailureKind, JobState};
    use proptest::prelude::*;
    use speech_client::MockSynthesizer;
    use std::time::Duration;

    fn chunks(unit: usize, texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(unit, i, *t))
            .collect()
    }

    fn scheduler(mock: &Arc<MockSynthesizer>, concurrency: usize) -> Scheduler {
        Scheduler::new(
            mock.clone(),
            VoiceConfig::default(),
            concurrency,
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let mock = Arc::new(MockSynthesizer::fails_then_succeeds(
            2,
            SynthesisError::Transient("reset".into()),
        ));
        let jobs = scheduler(&mock, 4).run(chunks(0, &["第一章"])).await.unwrap();

        assert_eq!(jobs[0].attempt_count, 3);
        assert_eq!(jobs[0].audio(), Some("第一章".as_bytes()));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_total_attempts() {
        let mock = Arc::new(MockSynthesizer::always_fails(SynthesisError::Timeout { secs: 1 }));
        let jobs = scheduler(&mock, 2).run(chunks(0, &["a", "b"])).await.unwrap();

        for job in &jobs {
            assert_eq!(job.attempt_count, 3);
            assert_eq!(job.failure().map(|f| f.kind), Some(FailureKind::Exhausted));
        }
        assert_eq!(mock.calls_for("a"), 3);
        assert_eq!(mock.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timing() {
        let mock = Arc::new(MockSynthesizer::fails_then_succeeds(2, SynthesisError::NoAudio));
        let start = tokio::time::Instant::now();
        scheduler(&mock, 1).run(chunks(0, &["x"])).await.unwrap();
        // 2s after the first failure, 3s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let mock = Arc::new(MockSynthesizer::always_fails(SynthesisError::InvalidRequest(
            "voice".into(),
        )));
        let jobs = scheduler(&mock, 1).run(chunks(0, &["x"])).await.unwrap();
        assert_eq!(jobs[0].attempt_count, 1);
        assert_eq!(jobs[0].failure().map(|f| f.kind), Some(FailureKind::Fatal));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_failure_discards_partial_audio() {
        let mock = Arc::new(
            MockSynthesizer::fails_then_succeeds(1, SynthesisError::Transient("eof".into()))
                .with_mid_stream_failures(),
        );
        let jobs = scheduler(&mock, 1).run(chunks(0, &["abcd"])).await.unwrap();
        assert_eq!(jobs[0].audio(), Some(&b"abcd"[..]));
        assert_eq!(jobs[0].attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let mock = Arc::new(
            MockSynthesizer::always_succeeds().with_delay(Duration::from_millis(100)),
        );
        let texts: Vec<String> = (0..20).map(|i| format!("chunk {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let jobs = scheduler(&mock, 3).run(chunks(0, &refs)).await.unwrap();

        assert_eq!(jobs.len(), 20);
        assert!(jobs.iter().all(|j| j.audio().is_some()));
        assert_eq!(mock.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_preserves_input_order() {
        let mock = Arc::new(
            MockSynthesizer::always_succeeds()
                .with_delay_for("A", Duration::from_millis(300))
                .with_delay_for("B", Duration::from_millis(100)),
        );
        let jobs = scheduler(&mock, 3).run(chunks(0, &["A", "B", "C"])).await.unwrap();
        let texts: Vec<_> = jobs.iter().map(|j| j.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_chunk_leaves_gap() {
        let mock = Arc::new(MockSynthesizer::always_succeeds().with_script(
            "B",
            usize::MAX,
            SynthesisError::Transient("reset".into()),
        ));
        let mut sink: Vec<SettledUnit> = Vec::new();
        let summary = scheduler(&mock, 3)
            .drive(chunks(0, &["A", "B", "C"]), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.delivered, vec![0]);
        let assembly = sink[0].assemble();
        assert_eq!(assembly.audio, b"AC");
        assert_eq!(assembly.failed, vec![1]);
        assert_eq!(mock.calls_for("B"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_reassembles_regardless_of_completion_order() {
        let mock = Arc::new(
            MockSynthesizer::always_succeeds()
                .with_delay_for("1", Duration::from_millis(500))
                .with_delay_for("2", Duration::from_millis(50))
                .with_delay_for("x", Duration::from_millis(10)),
        );
        let mut all = chunks(0, &["1", "2", "3"]);
        all.extend(chunks(1, &["x", "y"]));

        let mut sink: Vec<SettledUnit> = Vec::new();
        let summary = scheduler(&mock, 5).drive(all, &mut sink).await.unwrap();

        // Unit 1 settles first because unit 0 waits on its slowest chunk
        assert_eq!(summary.delivered, vec![1, 0]);
        assert_eq!(sink[1].assemble().audio, b"123");
        assert_eq!(sink[0].assemble().audio, b"xy");
    }

    #[tokio::test]
    async fn test_stopped_before_start_makes_no_calls() {
        let mock = Arc::new(MockSynthesizer::always_succeeds());
        let scheduler = scheduler(&mock, 2);
        scheduler.stop_signal().stop();

        let mut sink: Vec<SettledUnit> = Vec::new();
        let summary = scheduler.drive(chunks(0, &["a", "b"]), &mut sink).await.unwrap();

        assert_eq!(mock.call_count(), 0);
        assert!(sink.is_empty());
        assert_eq!(summary.abandoned, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_cancels_retry() {
        let mock = Arc::new(MockSynthesizer::always_fails(SynthesisError::NoAudio));
        let scheduler = scheduler(&mock, 1);
        let stop = scheduler.stop_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            stop.stop();
        });

        let jobs = scheduler.run(chunks(0, &["a"])).await.unwrap();
        assert_eq!(jobs[0].attempt_count, 1);
        assert!(jobs[0].is_cancelled());
        assert!(matches!(jobs[0].state, JobState::Failed(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mock: Arc<dyn Synthesizer> = Arc::new(MockSynthesizer::always_succeeds());
        assert!(Scheduler::new(mock, VoiceConfig::default(), 0, RetryPolicy::default()).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_reassembly_ignores_completion_order(
            delays in prop::collection::vec(0u64..1000, 1..12),
            concurrency in 1usize..6,
        ) {
            let texts: Vec<String> = (0..delays.len()).map(|i| format!("<{}>", i)).collect();
            let mut mock = MockSynthesizer::always_succeeds();
            for (text, delay) in texts.iter().zip(&delays) {
                mock = mock.with_delay_for(text, Duration::from_millis(*delay));
            }
            let mock = Arc::new(mock);
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let mut sink: Vec<SettledUnit> = Vec::new();
            runtime
                .block_on(scheduler(&mock, concurrency).drive(chunks(0, &refs), &mut sink))
                .unwrap();

            prop_assert_eq!(sink.len(), 1);
            prop_assert_eq!(sink[0].assemble().audio, texts.concat().into_bytes());
        }
    }
}
