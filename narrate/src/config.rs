//! narrate configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use speech_client::{ProviderConfig, SpeechRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::synth::RetryPolicy;
use crate::text::NumeralMagnitude;

// Defaults reproduce the settings the batch scripts were tuned with
const DEFAULT_VOICE: &str = "zh-CN-YunxiNeural";
const DEFAULT_RATE: &str = "+45%";
const DEFAULT_GROUP_SIZE: usize = 5;
const DEFAULT_MAX_CHUNK_BYTES: usize = 5000;
const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_JITTER_FLOOR_MS: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrateConfig {
    #[serde(default)]
    pub voice: VoiceConfig,

    #[serde(default)]
    pub segmenting: SegmentingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Voice settings passed with every synthesis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Voice name (e.g. zh-CN-YunxiNeural)
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Relative speaking rate (e.g. +45%)
    #[serde(default = "default_rate")]
    pub rate: String,

    /// Relative volume (e.g. +0%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    /// Relative pitch (e.g. +0Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentingConfig {
    /// Sections per output file
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Byte ceiling for a single synthesis request
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Joins first and last chapter titles in a Unit title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_separator: Option<String>,

    /// Largest numeral unit accepted in chapter headings
    #[serde(default)]
    pub numeral_magnitude: NumeralMagnitude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Synthesis calls running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Total attempts per chunk, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_jitter_floor_ms")]
    pub jitter_floor_ms: u64,
}

/// How finished documents are remembered between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerKind {
    /// Rename the source file to `<stem>_success.<ext>`
    #[default]
    Rename,
    /// Keep a JSON marker per document in a state directory
    MarkerFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Audio file extension
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Directory that receives one folder per document (defaults to the
    /// current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub marker: MarkerKind,

    /// Where marker files live (defaults to the local data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_rate() -> String {
    DEFAULT_RATE.to_string()
}

fn default_group_size() -> usize {
    DEFAULT_GROUP_SIZE
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_jitter_floor_ms() -> u64 {
    DEFAULT_JITTER_FLOOR_MS
}

fn default_extension() -> String {
    "mp3".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            rate: default_rate(),
            volume: None,
            pitch: None,
        }
    }
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
            max_chunk_bytes: default_max_chunk_bytes(),
            title_separator: None,
            numeral_magnitude: NumeralMagnitude::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_floor_ms: default_jitter_floor_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            root: None,
            marker: MarkerKind::default(),
            state_dir: None,
        }
    }
}

impl VoiceConfig {
    /// Build a synthesis request for `text` with these voice settings.
    pub fn request(&self, text: &str) -> SpeechRequest {
        let mut request = SpeechRequest::new(text, &self.voice, &self.rate);
        request.volume = self.volume.clone();
        request.pitch = self.pitch.clone();
        request
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter_floor: Duration::from_millis(self.jitter_floor_ms),
        }
    }
}

impl OutputConfig {
    pub fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory for marker files.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .map(|d| d.join("narrate").join("markers"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))
    }
}

impl NarrateConfig {
    /// Get the config file path: <config dir>/narrate/narrate.toml
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dir.join("narrate").join("narrate.toml"))
    }

    /// Load config from the default path, returning default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from a file, returning default if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: NarrateConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check settings before any work starts.
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.segmenting.group_size == 0 {
            return Err(PipelineError::config("group_size must be at least 1"));
        }
        if self.segmenting.max_chunk_bytes < crate::text::chunker::MIN_MAX_BYTES {
            return Err(PipelineError::config(format!(
                "max_chunk_bytes must be at least {}",
                crate::text::chunker::MIN_MAX_BYTES
            )));
        }
        if self.scheduler.concurrency == 0 {
            return Err(PipelineError::config("concurrency must be at least 1"));
        }
        if self.scheduler.max_retries == 0 {
            return Err(PipelineError::config("max_retries must be at least 1"));
        }
        if self.voice.voice.trim().is_empty() {
            return Err(PipelineError::config("voice must not be empty"));
        }
        for (name, value, suffix) in [
            ("rate", Some(&self.voice.rate), "%"),
            ("volume", self.voice.volume.as_ref(), "%"),
            ("pitch", self.voice.pitch.as_ref(), "Hz"),
        ] {
            if let Some(value) = value {
                if !is_signed_amount(value, suffix) {
                    return Err(PipelineError::config(format!(
                        "{} must look like +10{} or -10{}, got {:?}",
                        name, suffix, suffix, value
                    )));
                }
            }
        }
        let extension = self.output.extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PipelineError::config(format!(
                "invalid output extension {:?}",
                self.output.extension
            )));
        }
        Ok(())
    }
}

/// Matches `+45%`, `-10%`, `+0Hz`.
fn is_signed_amount(value: &str, suffix: &str) -> bool {
    let Some(rest) = value.strip_prefix(['+', '-']) else {
        return false;
    };
    let Some(digits) = rest.strip_suffix(suffix) else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NarrateConfig::default();
        assert_eq!(config.voice.voice, "zh-CN-YunxiNeural");
        assert_eq!(config.voice.rate, "+45%");
        assert_eq!(config.segmenting.group_size, 5);
        assert_eq!(config.segmenting.max_chunk_bytes, 5000);
        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.output.extension, "mp3");
        assert_eq!(config.output.marker, MarkerKind::Rename);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = NarrateConfig::config_path().unwrap();
        assert!(path.ends_with("narrate/narrate.toml"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[voice]
voice = "en-US-AriaNeural"
rate = "-10%"
pitch = "+5Hz"

[segmenting]
group_size = 2
numeral_magnitude = "hundreds"

[scheduler]
concurrency = 4

[output]
marker = "marker-file"

[provider]
proxy = "http://127.0.0.1:7890"
"#;
        let config: NarrateConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.voice.voice, "en-US-AriaNeural");
        assert_eq!(config.voice.pitch.as_deref(), Some("+5Hz"));
        assert_eq!(config.segmenting.group_size, 2);
        assert_eq!(config.segmenting.max_chunk_bytes, 5000);
        assert_eq!(config.segmenting.numeral_magnitude, NumeralMagnitude::Hundreds);
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.output.marker, MarkerKind::MarkerFile);
        assert_eq!(config.provider.kind, "edge-cli");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_config() {
        let config: NarrateConfig = toml::from_str("").unwrap();
        assert_eq!(config.segmenting.group_size, 5);
        assert_eq!(config.scheduler.base_delay_ms, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("narrate.toml");

        let mut config = NarrateConfig::default();
        config.voice.rate = "+20%".to_string();
        config.segmenting.title_separator = Some(" ~ ".to_string());
        config.save_to(&path).unwrap();

        let loaded = NarrateConfig::load_from(&path).unwrap();
        assert_eq!(loaded.voice.rate, "+20%");
        assert_eq!(loaded.segmenting.title_separator.as_deref(), Some(" ~ "));
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let config = NarrateConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scheduler.concurrency, 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NarrateConfig::default();
        config.segmenting.group_size = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));

        let mut config = NarrateConfig::default();
        config.segmenting.max_chunk_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = NarrateConfig::default();
        config.scheduler.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = NarrateConfig::default();
        config.scheduler.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = NarrateConfig::default();
        config.voice.rate = "45".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_voice_request() {
        let mut voice = VoiceConfig::default();
        voice.volume = Some("+10%".into());
        let request = voice.request("你好");
        assert_eq!(request.text, "你好");
        assert_eq!(request.rate, "+45%");
        assert_eq!(request.volume.as_deref(), Some("+10%"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = SchedulerConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }
}
