//! Edge TTS provider
//!
//! Runs the `edge-tts` command line tool as a subprocess and streams the MP3
//! it writes to stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{Result, SynthesisError};
use crate::provider::{AudioStream, SpeechFrame, SpeechRequest, Synthesizer};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Provider that shells out to `edge-tts`
pub struct EdgeTtsCli {
    cli_path: PathBuf,
    timeout: Duration,
    proxy: Option<String>,
}

impl EdgeTtsCli {
    /// Create a new edge-tts provider
    ///
    /// Returns an error if the binary is not found.
    pub fn new(
        cli_path: Option<PathBuf>,
        timeout_secs: u64,
        proxy: Option<String>,
    ) -> Result<Self> {
        let cli_path = match cli_path {
            Some(path) => {
                if !path.exists() {
                    return Err(SynthesisError::Unavailable(format!(
                        "edge-tts not found at specified path: {}",
                        path.display()
                    )));
                }
                path
            }
            None => which::which("edge-tts").map_err(|_| {
                SynthesisError::Unavailable(
                    "edge-tts not found. Install it with `pip install edge-tts`".into(),
                )
            })?,
        };

        Ok(Self {
            cli_path,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            proxy,
        })
    }

    /// Build the argument list for one request.
    ///
    /// Values are passed as `--flag=value` so that text starting with a
    /// hyphen, or a negative rate such as `-10%`, is not parsed as an option.
    fn args(&self, request: &SpeechRequest) -> Vec<String> {
        let mut args = vec![
            format!("--text={}", request.text),
            format!("--voice={}", request.voice),
            format!("--rate={}", request.rate),
        ];

        if let Some(volume) = &request.volume {
            args.push(format!("--volume={}", volume));
        }
        if let Some(pitch) = &request.pitch {
            args.push(format!("--pitch={}", pitch));
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy={}", proxy));
        }

        args.extend(["--write-media".to_string(), "-".to_string()]);
        args
    }
}

#[async_trait]
impl Synthesizer for EdgeTtsCli {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream> {
        if request.text.trim().is_empty() {
            return Err(SynthesisError::InvalidRequest("text is empty".into()));
        }

        log::debug!(
            "Running {} for {} bytes of text",
            self.cli_path.display(),
            request.text.len()
        );

        let mut child = Command::new(&self.cli_path)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SynthesisError::Unavailable(format!(
                    "{}: {}",
                    self.cli_path.display(),
                    e
                )),
                _ => SynthesisError::Io(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SynthesisError::Transient("stdout was not captured".into()))?;

        // Drain stderr concurrently so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let state = CliStream {
            child,
            stdout,
            stderr,
            timeout: self.timeout,
            head: Vec::new(),
            received: 0,
            done: false,
        };

        Ok(Box::pin(futures_util::stream::unfold(
            state,
            |mut state| async move { state.next_frame().await.map(|item| (item, state)) },
        )))
    }

    fn name(&self) -> &'static str {
        "edge-tts"
    }

    fn is_available(&self) -> Result<()> {
        if self.cli_path.exists() {
            Ok(())
        } else {
            Err(SynthesisError::Unavailable(format!(
                "{} no longer exists",
                self.cli_path.display()
            )))
        }
    }
}

/// Read side of one running edge-tts process
struct CliStream {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    timeout: Duration,
    /// Bytes held back until the MPEG header can be checked
    head: Vec<u8>,
    received: usize,
    done: bool,
}

impl CliStream {
    async fn next_frame(&mut self) -> Option<Result<SpeechFrame>> {
        if self.done {
            return None;
        }

        loop {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            let read = tokio::time::timeout(self.timeout, self.stdout.read(&mut buf)).await;

            let n = match read {
                Err(_) => {
                    self.done = true;
                    return Some(Err(SynthesisError::Timeout {
                        secs: self.timeout.as_secs(),
                    }));
                }
                Ok(Err(e)) => {
                    self.done = true;
                    return Some(Err(SynthesisError::Io(e)));
                }
                Ok(Ok(n)) => n,
            };

            if n == 0 {
                self.done = true;
                return match self.finish().await {
                    Err(e) => Some(Err(e)),
                    Ok(()) if self.received == 0 && self.head.is_empty() => {
                        Some(Err(SynthesisError::NoAudio))
                    }
                    Ok(()) if !self.head.is_empty() => {
                        let head = std::mem::take(&mut self.head);
                        if looks_like_mpeg(&head) {
                            self.received += head.len();
                            Some(Ok(SpeechFrame::Audio(head)))
                        } else {
                            Some(Err(malformed(&head)))
                        }
                    }
                    Ok(()) => None,
                };
            }

            buf.truncate(n);

            if self.received > 0 {
                self.received += n;
                return Some(Ok(SpeechFrame::Audio(buf)));
            }

            self.head.extend_from_slice(&buf);
            if self.head.len() < 3 {
                continue;
            }

            let head = std::mem::take(&mut self.head);
            if !looks_like_mpeg(&head) {
                self.done = true;
                let _ = self.child.start_kill();
                return Some(Err(malformed(&head)));
            }
            self.received += head.len();
            return Some(Ok(SpeechFrame::Audio(head)));
        }
    }

    /// Wait for the process and turn a failed exit into an error.
    async fn finish(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(classify_failure(status, &stderr))
    }
}

/// Check whether bytes start like an MP3 stream (ID3 tag or MPEG frame sync).
fn looks_like_mpeg(bytes: &[u8]) -> bool {
    if bytes.starts_with(b"ID3") {
        return true;
    }
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0
}

fn malformed(head: &[u8]) -> SynthesisError {
    let preview: String = String::from_utf8_lossy(&head[..head.len().min(32)])
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    SynthesisError::MalformedResponse(format!(
        "expected MP3 audio, got {:?}",
        preview
    ))
}

/// Map an edge-tts failure to a retryable or fatal error.
fn classify_failure(status: ExitStatus, stderr: &str) -> SynthesisError {
    let last_line = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string();

    if stderr.contains("NoAudioReceived") {
        SynthesisError::NoAudio
    } else if stderr.contains("usage:")
        || stderr.contains("ValueError")
        || stderr.contains("Invalid voice")
    {
        SynthesisError::InvalidRequest(last_line)
    } else {
        SynthesisError::Transient(format!("edge-tts exited with {}: {}", status, last_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> EdgeTtsCli {
        EdgeTtsCli {
            cli_path: PathBuf::from("/usr/bin/edge-tts"),
            timeout: Duration::from_secs(5),
            proxy: None,
        }
    }

    #[test]
    fn test_args_basic() {
        let request = SpeechRequest::new("你好", "zh-CN-YunxiNeural", "+45%");
        let args = provider().args(&request);
        assert_eq!(
            args,
            vec![
                "--text=你好",
                "--voice=zh-CN-YunxiNeural",
                "--rate=+45%",
                "--write-media",
                "-"
            ]
        );
    }

    #[test]
    fn test_args_negative_rate_and_options() {
        let mut request = SpeechRequest::new("hello", "en-US-AriaNeural", "-10%");
        request.volume = Some("+5%".into());
        request.pitch = Some("-2Hz".into());
        let mut p = provider();
        p.proxy = Some("http://proxy:8080".into());

        let args = p.args(&request);
        assert!(args.contains(&"--rate=-10%".to_string()));
        assert!(args.contains(&"--volume=+5%".to_string()));
        assert!(args.contains(&"--pitch=-2Hz".to_string()));
        assert!(args.contains(&"--proxy=http://proxy:8080".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_args_text_starting_with_hyphen() {
        for text in ["-你好。", "--那天", "-Hello."] {
            let request = SpeechRequest::new(text, "zh-CN-YunxiNeural", "+0%");
            let args = provider().args(&request);
            assert_eq!(args[0], format!("--text={}", text));
            assert!(!args.iter().any(|a| a == text));
        }
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let result = EdgeTtsCli::new(Some(PathBuf::from("/nonexistent/edge-tts")), 10, None);
        assert!(matches!(result, Err(SynthesisError::Unavailable(_))));
    }

    #[test]
    fn test_looks_like_mpeg() {
        assert!(looks_like_mpeg(b"ID3\x04\x00"));
        assert!(looks_like_mpeg(&[0xFF, 0xF3, 0x44]));
        assert!(!looks_like_mpeg(b"<html>"));
        assert!(!looks_like_mpeg(&[0xFF]));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_failure() {
        use std::os::unix::process::ExitStatusExt;
        let status = ExitStatus::from_raw(1 << 8);

        assert!(matches!(
            classify_failure(status, "edge_tts.exceptions.NoAudioReceived: No audio"),
            SynthesisError::NoAudio
        ));
        assert!(matches!(
            classify_failure(status, "ValueError: Invalid rate '45'"),
            SynthesisError::InvalidRequest(_)
        ));
        let err = classify_failure(status, "aiohttp.client_exceptions.ServerDisconnectedError\n");
        assert!(err.is_transient());
    }
}
