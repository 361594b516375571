//! Mock synthesizer for testing
//!
//! Provides a scriptable synthesizer that can simulate transient failures,
//! fatal errors, slow responses, and failures in the middle of a stream.
//! Successful calls return the request text's bytes as "audio", split over two
//! audio frames with a metadata frame in between.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Result, SynthesisError};
use crate::provider::{AudioStream, SpeechFrame, SpeechRequest, Synthesizer};

/// A mock synthesizer for testing retry, ordering, and concurrency behavior
pub struct MockSynthesizer {
    /// Failures per distinct text before succeeding (usize::MAX = never succeed)
    fail_count: usize,
    /// Error to return on failure (None = always succeed)
    fail_with: Option<SynthesisError>,
    /// Per-text overrides of (failures, error)
    scripts: HashMap<String, (usize, SynthesisError)>,
    /// Emit one audio frame before failing
    fail_mid_stream: bool,
    /// Delay applied to every call
    delay: Duration,
    /// Per-text delay overrides
    delays: HashMap<String, Duration>,
    /// Total calls
    call_count: AtomicUsize,
    /// Calls per request text
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Synthesizer name for display
    name: &'static str,
}

impl MockSynthesizer {
    fn with_plan(fail_count: usize, fail_with: Option<SynthesisError>) -> Self {
        Self {
            fail_count,
            fail_with,
            scripts: HashMap::new(),
            fail_mid_stream: false,
            delay: Duration::ZERO,
            delays: HashMap::new(),
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            name: "mock",
        }
    }

    /// Create a synthesizer where each distinct text fails `n` times with the
    /// given error, then succeeds
    pub fn fails_then_succeeds(n: usize, error: SynthesisError) -> Self {
        Self::with_plan(n, Some(error))
    }

    /// Create a synthesizer that always fails with the given error
    pub fn always_fails(error: SynthesisError) -> Self {
        Self::with_plan(usize::MAX, Some(error))
    }

    /// Create a synthesizer that always succeeds
    pub fn always_succeeds() -> Self {
        Self::with_plan(0, None)
    }

    /// Make calls for exactly `text` fail `n` times with `error` before succeeding
    pub fn with_script(mut self, text: &str, n: usize, error: SynthesisError) -> Self {
        self.scripts.insert(text.to_string(), (n, error));
        self
    }

    /// Fail after the first audio frame instead of before the stream starts
    pub fn with_mid_stream_failures(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    /// Delay every call by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay calls for exactly `text` by `delay`
    pub fn with_delay_for(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Set a custom synthesizer name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Get the number of times synthesize() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times synthesize() was called for `text`
    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn planned_failure(&self, text: &str, attempt: usize) -> Option<SynthesisError> {
        match self.scripts.get(text) {
            Some((n, err)) if attempt < *n => Some(clone_error(err)),
            Some(_) => None,
            None if attempt < self.fail_count => self.fail_with.as_ref().map(clone_error),
            None => None,
        }
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(request.text.clone()).or_insert(0);
            *entry += 1;
            *entry - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&request.text)
            .copied()
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let bytes = request.text.as_bytes().to_vec();
        let mid = bytes.len() / 2;
        let (first, second) = (bytes[..mid].to_vec(), bytes[mid..].to_vec());

        match self.planned_failure(&request.text, attempt) {
            Some(err) if self.fail_mid_stream => {
                let frames: Vec<Result<SpeechFrame>> =
                    vec![Ok(SpeechFrame::Audio(first)), Err(err)];
                Ok(Box::pin(stream::iter(frames)))
            }
            Some(err) => Err(err),
            None => {
                let frames: Vec<Result<SpeechFrame>> = vec![
                    Ok(SpeechFrame::Audio(first)),
                    Ok(SpeechFrame::Metadata(format!(
                        "{{\"type\":\"WordBoundary\",\"offset\":{}}}",
                        mid
                    ))),
                    Ok(SpeechFrame::Audio(second)),
                ];
                Ok(Box::pin(stream::iter(frames)))
            }
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> Result<()> {
        Ok(())
    }
}

/// Clone a SynthesisError (needed because io::Error doesn't implement Clone)
fn clone_error(err: &SynthesisError) -> SynthesisError {
    match err {
        SynthesisError::Transient(s) => SynthesisError::Transient(s.clone()),
        SynthesisError::Timeout { secs } => SynthesisError::Timeout { secs: *secs },
        SynthesisError::NoAudio => SynthesisError::NoAudio,
        SynthesisError::MalformedResponse(s) => SynthesisError::MalformedResponse(s.clone()),
        SynthesisError::InvalidRequest(s) => SynthesisError::InvalidRequest(s.clone()),
        SynthesisError::Unavailable(s) => SynthesisError::Unavailable(s.clone()),
        SynthesisError::ConfigError(s) => SynthesisError::ConfigError(s.clone()),
        SynthesisError::Io(e) => SynthesisError::Io(std::io::Error::new(e.kind(), e.to_string())),
    }
}
