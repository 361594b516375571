use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::error::Result;

/// Request to synthesize one piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// Relative speaking rate, e.g. `+45%` or `-10%`
    pub rate: String,
    pub volume: Option<String>,
    pub pitch: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>, rate: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            rate: rate.into(),
            volume: None,
            pitch: None,
        }
    }
}

/// One item of a synthesis response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFrame {
    /// Encoded audio bytes, in stream order
    Audio(Vec<u8>),
    /// Side-channel data (word boundaries, subtitles); callers may ignore it
    Metadata(String),
}

/// Lazy, finite, non-restartable sequence of response frames
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<SpeechFrame>> + Send>>;

/// Trait for speech synthesis services
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing a request and return its response stream
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream>;

    /// Get the synthesizer name for display
    fn name(&self) -> &'static str;

    /// Check if the synthesizer can be used (binary installed, etc.)
    fn is_available(&self) -> Result<()>;
}
