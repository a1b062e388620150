//! SSE Streaming Client
//!
//! Speaks server-sent events against the generation endpoint: one POST with
//! `stream: true`, answered by `data:` frames carrying tagged JSON events
//! (`fragment` / `done` / `error`) and closed by a `[DONE]` sentinel.
//!
//! The reader task preserves arrival order into a bounded channel and
//! watches the abort token; teardown drops the connection without sending
//! any further terminal event.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{StreamEvent, StreamFailure, StreamHandle, StreamingClient};
use crate::config::{BackendConfig, ConfigError, validate_endpoint};
use crate::constants::{network, stream as stream_constants};
use crate::request::{GenerationRequest, PromptMessage, SamplingParams};

/// Streaming client for the generation backend.
pub struct SseStreamingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl fmt::Debug for SseStreamingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseStreamingClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SseStreamingClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfigError> {
        let endpoint = validate_endpoint(&config.endpoint)?;

        // No overall timeout: streams legitimately run for minutes. The
        // controller enforces open and stall deadlines.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(network::OPEN_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConfigError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone().map(SecretString::from),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/v1/generate", self.endpoint)
    }

    fn health_url(&self) -> String {
        format!("{}/v1/health", self.endpoint)
    }

    fn build_body<'a>(&'a self, request: &'a GenerationRequest) -> WireRequest<'a> {
        WireRequest {
            model: &self.model,
            messages: &request.messages,
            sampling: WireSampling {
                temperature: request.sampling.temperature,
                seed: resolve_seed(&request.sampling),
            },
            stream: true,
        }
    }
}

#[async_trait]
impl StreamingClient for SseStreamingClient {
    async fn open(&self, request: GenerationRequest) -> Result<StreamHandle, StreamFailure> {
        let url = self.generate_url();
        let body = self.build_body(&request);

        debug!(slot = %request.target, model = %self.model, "opening generation stream");

        let mut builder = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StreamFailure::Connect(e.to_string())
            } else {
                StreamFailure::Io(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamFailure::Http {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(stream_constants::EVENT_CHANNEL_CAPACITY);
        let abort = CancellationToken::new();
        let byte_stream = Box::pin(response.bytes_stream());
        tokio::spawn(pump_stream(byte_stream, tx, abort.clone()));

        Ok(StreamHandle::new(rx, abort))
    }

    async fn health_check(&self) -> bool {
        match self.http.get(self.health_url()).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("generation backend is reachable");
                true
            }
            Ok(resp) => {
                warn!("generation backend health check failed: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("generation backend not reachable: {}", e);
                false
            }
        }
    }
}

// =============================================================================
// Reader Task
// =============================================================================

/// Drain the byte stream into ordered events until a terminal frame, an
/// error, or an abort. Sends at most one terminal event.
async fn pump_stream<B, E>(
    mut byte_stream: impl Stream<Item = Result<B, E>> + Unpin,
    tx: mpsc::Sender<StreamEvent>,
    abort: CancellationToken,
) where
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut frames = SseFrameBuffer::new();

    loop {
        tokio::select! {
            _ = abort.cancelled() => {
                debug!("generation stream aborted");
                return;
            }
            chunk = byte_stream.next() => {
                let bytes = match chunk {
                    None => {
                        let failure = StreamFailure::Io(
                            "stream ended before completion".to_string(),
                        );
                        let _ = tx.send(StreamEvent::Failed(failure)).await;
                        return;
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamEvent::Failed(StreamFailure::Io(e.to_string()))).await;
                        return;
                    }
                    Some(Ok(bytes)) => bytes,
                };

                frames.push(bytes.as_ref());
                while let Some(frame) = frames.next_frame() {
                    for line in frame.lines() {
                        match parse_data_line(line) {
                            None => {}
                            Some(Ok(FrameData::Terminator)) => {
                                // [DONE] without a preceding done frame
                                let failure = StreamFailure::Protocol(
                                    "stream terminated without final text".to_string(),
                                );
                                let _ = tx.send(StreamEvent::Failed(failure)).await;
                                return;
                            }
                            Some(Ok(FrameData::Event(event))) => match event {
                                WireEvent::Fragment { text } => {
                                    if tx.send(StreamEvent::Fragment(text)).await.is_err() {
                                        return;
                                    }
                                }
                                WireEvent::Done { text } => {
                                    let _ = tx
                                        .send(StreamEvent::Completed { final_text: text })
                                        .await;
                                    return;
                                }
                                WireEvent::Error { message, code } => {
                                    let failure = StreamFailure::Backend { message, code };
                                    let _ = tx.send(StreamEvent::Failed(failure)).await;
                                    return;
                                }
                            },
                            Some(Err(e)) => {
                                let failure = StreamFailure::Protocol(format!(
                                    "malformed stream frame: {}",
                                    e
                                ));
                                let _ = tx.send(StreamEvent::Failed(failure)).await;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    sampling: WireSampling,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireSampling {
    temperature: f32,
    seed: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Fragment { text: String },
    Done { text: String },
    Error {
        message: String,
        #[serde(default)]
        code: Option<u16>,
    },
}

enum FrameData {
    Event(WireEvent),
    /// The `[DONE]` sentinel.
    Terminator,
}

/// An absent seed resolves to a fresh random one per session, so repeated
/// generations of the same field differ.
fn resolve_seed(sampling: &SamplingParams) -> u64 {
    sampling.seed.unwrap_or_else(rand::random)
}

/// Parse one line of an SSE frame. `None` for non-data lines (comments,
/// event names, blanks).
fn parse_data_line(line: &str) -> Option<Result<FrameData, serde_json::Error>> {
    let line = line.trim();
    if !line.starts_with("data:") {
        return None;
    }
    let data = line.trim_start_matches("data:").trim();
    if data == "[DONE]" {
        return Some(Ok(FrameData::Terminator));
    }
    Some(serde_json::from_str::<WireEvent>(data).map(FrameData::Event))
}

/// Reassembles SSE frames (separated by a blank line) from arbitrary
/// chunk boundaries.
struct SseFrameBuffer {
    buf: Vec<u8>,
}

impl SseFrameBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_frame(&mut self) -> Option<String> {
        let pos = self.buf.windows(2).position(|w| w == b"\n\n")?;
        let frame: Vec<u8> = self.buf.drain(..pos + 2).collect();
        Some(String::from_utf8_lossy(&frame).into_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetField;

    fn backend_config() -> BackendConfig {
        BackendConfig {
            endpoint: "http://localhost:8080".to_string(),
            model: "narrator-large".to_string(),
            api_key: None,
        }
    }

    fn sample_request(seed: Option<u64>) -> GenerationRequest {
        GenerationRequest {
            target: TargetField::Backstory,
            messages: vec![PromptMessage::user("ctx")],
            sampling: SamplingParams {
                temperature: 0.7,
                seed,
            },
        }
    }

    #[test]
    fn test_explicit_seed_is_kept() {
        let request = sample_request(Some(42));
        assert_eq!(resolve_seed(&request.sampling), 42);
    }

    #[test]
    fn test_body_serializes_streaming_request() {
        let client = SseStreamingClient::new(&backend_config()).unwrap();
        let request = sample_request(Some(7));
        let body = serde_json::to_value(client.build_body(&request)).unwrap();

        assert_eq!(body["model"], "narrator-large");
        assert_eq!(body["stream"], true);
        assert_eq!(body["sampling"]["seed"], 7);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let config = BackendConfig {
            endpoint: "ftp://example.com".to_string(),
            ..backend_config()
        };
        assert!(SseStreamingClient::new(&config).is_err());
    }

    #[test]
    fn test_frame_buffer_reassembles_split_frames() {
        let mut frames = SseFrameBuffer::new();
        frames.push(b"data: {\"type\":\"fragment\",");
        assert!(frames.next_frame().is_none());

        frames.push(b"\"text\":\"hi\"}\n\ndata: x");
        let frame = frames.next_frame().unwrap();
        assert!(frame.contains("\"text\":\"hi\""));
        assert!(frames.next_frame().is_none());
    }

    #[test]
    fn test_parse_fragment_line() {
        let parsed = parse_data_line(r#"data: {"type":"fragment","text":"Once "}"#);
        match parsed {
            Some(Ok(FrameData::Event(WireEvent::Fragment { text }))) => {
                assert_eq!(text, "Once ");
            }
            _ => panic!("expected fragment"),
        }
    }

    #[test]
    fn test_parse_done_and_sentinel() {
        match parse_data_line(r#"data: {"type":"done","text":"full"}"#) {
            Some(Ok(FrameData::Event(WireEvent::Done { text }))) => assert_eq!(text, "full"),
            _ => panic!("expected done"),
        }
        assert!(matches!(
            parse_data_line("data: [DONE]"),
            Some(Ok(FrameData::Terminator))
        ));
    }

    #[test]
    fn test_parse_error_line() {
        match parse_data_line(r#"data: {"type":"error","message":"no credits","code":402}"#) {
            Some(Ok(FrameData::Event(WireEvent::Error { message, code }))) => {
                assert_eq!(message, "no credits");
                assert_eq!(code, Some(402));
            }
            _ => panic!("expected error"),
        }
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        assert!(parse_data_line(": keepalive").is_none());
        assert!(parse_data_line("event: message").is_none());
        assert!(parse_data_line("").is_none());
    }

    #[test]
    fn test_malformed_data_is_an_error() {
        assert!(matches!(parse_data_line("data: {nope"), Some(Err(_))));
    }

    #[tokio::test]
    async fn test_pump_delivers_fragments_then_completed() {
        let chunks: Vec<Result<Vec<u8>, std::convert::Infallible>> = vec![
            Ok(b"data: {\"type\":\"fragment\",\"text\":\"Once \"}\n\n".to_vec()),
            Ok(b"data: {\"type\":\"fragment\",\"text\":\"upon\"}\n\ndata: {\"type\":\"done\",\"text\":\"Once upon\"}\n\n".to_vec()),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        pump_stream(futures::stream::iter(chunks), tx, CancellationToken::new()).await;

        assert_eq!(rx.recv().await, Some(StreamEvent::Fragment("Once ".into())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Fragment("upon".into())));
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Completed {
                final_text: "Once upon".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_surfaces_backend_error() {
        let chunks: Vec<Result<Vec<u8>, std::convert::Infallible>> = vec![Ok(
            b"data: {\"type\":\"error\",\"message\":\"no credits\",\"code\":402}\n\n".to_vec(),
        )];
        let (tx, mut rx) = mpsc::channel(8);
        pump_stream(futures::stream::iter(chunks), tx, CancellationToken::new()).await;

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Failed(StreamFailure::Backend {
                message: "no credits".into(),
                code: Some(402),
            }))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_dropped_stream_is_io_failure() {
        let chunks: Vec<Result<Vec<u8>, std::convert::Infallible>> =
            vec![Ok(b"data: {\"type\":\"fragment\",\"text\":\"partial\"}\n\n".to_vec())];
        let (tx, mut rx) = mpsc::channel(8);
        pump_stream(futures::stream::iter(chunks), tx, CancellationToken::new()).await;

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Fragment("partial".into()))
        );
        assert!(matches!(
            rx.recv().await,
            Some(StreamEvent::Failed(StreamFailure::Io(_)))
        ));
    }

    #[tokio::test]
    async fn test_pump_aborted_sends_no_terminal() {
        let abort = CancellationToken::new();
        abort.cancel();

        // A stream that would block forever if polled past the abort check.
        let pending =
            futures::stream::pending::<Result<Vec<u8>, std::convert::Infallible>>();
        let (tx, mut rx) = mpsc::channel(8);
        pump_stream(Box::pin(pending), tx, abort).await;

        assert_eq!(rx.recv().await, None);
    }
}
