//! Synthesizer implementations

mod edge_cli;
pub mod mock;

pub use edge_cli::EdgeTtsCli;
pub use mock::MockSynthesizer;

use crate::config::ProviderConfig;
use crate::error::{Result, SynthesisError};
use crate::provider::Synthesizer;

/// Supported synthesizer types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    EdgeCli,
}

impl ProviderKind {
    /// Parse provider kind from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "edge-cli" | "edge_cli" | "edge-tts" | "edge" => Ok(Self::EdgeCli),
            _ => Err(SynthesisError::ConfigError(format!("Unknown provider: {}", s))),
        }
    }
}

/// Create a synthesizer instance from provider settings
pub fn get_synthesizer(config: &ProviderConfig) -> Result<Box<dyn Synthesizer>> {
    match ProviderKind::from_str(&config.kind)? {
        ProviderKind::EdgeCli => Ok(Box::new(EdgeTtsCli::new(
            config.command.clone(),
            config.timeout_secs,
            config.proxy.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_aliases() {
        assert_eq!(ProviderKind::from_str("edge-cli").unwrap(), ProviderKind::EdgeCli);
        assert_eq!(ProviderKind::from_str("Edge-TTS").unwrap(), ProviderKind::EdgeCli);
        assert!(ProviderKind::from_str("polly").is_err());
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let config = ProviderConfig {
            kind: "polly".into(),
            ..Default::default()
        };
        assert!(matches!(
            get_synthesizer(&config),
            Err(SynthesisError::ConfigError(_))
        ));
    }
}
