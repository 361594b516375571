use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    /// Network or service hiccup; the same request may succeed later.
    #[error("Transient synthesis failure: {0}")]
    Transient(String),

    #[error("Synthesis timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Service returned no audio")]
    NoAudio,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Synthesizer not available: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SynthesisError {
    /// Whether another attempt with the same request can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout { .. } | Self::NoAudio | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SynthesisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SynthesisError::Transient("reset".into()).is_transient());
        assert!(SynthesisError::Timeout { secs: 30 }.is_transient());
        assert!(SynthesisError::NoAudio.is_transient());
        assert!(
            SynthesisError::Io(std::io::Error::other("broken pipe")).is_transient()
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!SynthesisError::MalformedResponse("text/html".into()).is_transient());
        assert!(!SynthesisError::InvalidRequest("bad voice".into()).is_transient());
        assert!(!SynthesisError::Unavailable("edge-tts".into()).is_transient());
        assert!(!SynthesisError::ConfigError("rate".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SynthesisError::Timeout { secs: 12 };
        assert_eq!(err.to_string(), "Synthesis timed out after 12 seconds");
    }
}
