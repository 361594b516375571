//! Speech synthesis client library for the narrate workspace
//!
//! Provides a streaming interface over text-to-speech services:
//! - edge-tts CLI (subprocess)
//! - Mock synthesizer (tests)

pub mod config;
pub mod error;
pub mod provider;
pub mod providers;

pub use config::ProviderConfig;
pub use error::{Result, SynthesisError};
pub use provider::{AudioStream, SpeechFrame, SpeechRequest, Synthesizer};
pub use providers::{EdgeTtsCli, MockSynthesizer, ProviderKind, get_synthesizer};
