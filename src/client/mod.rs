//! Streaming Client Abstraction
//!
//! Transport boundary of the generation core. A client opens one outbound
//! generation call and delivers ordered [`StreamEvent`]s until a terminal
//! signal; the handle couples the event channel with a non-blocking abort.
//!
//! Failures cross this boundary raw ([`StreamFailure`]); the controller is
//! the single place they are classified into user-facing categories.

mod sse;

pub use sse::SseStreamingClient;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::request::GenerationRequest;

// =============================================================================
// Events
// =============================================================================

/// One inbound event from an open generation stream.
///
/// Fragments arrive in order, without duplication or loss. Exactly one
/// terminal event (`Completed` or `Failed`) ends a stream that was not
/// aborted, and nothing follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One incrementally delivered piece of generated text.
    Fragment(String),
    /// Terminal: the server-finalized full text. The server may normalize
    /// whitespace or formatting, so this takes precedence over local
    /// accumulation.
    Completed { final_text: String },
    /// Terminal: unclassified failure.
    Failed(StreamFailure),
}

/// Raw failure surfaced by a streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// Could not reach the backend at all.
    Connect(String),
    /// The backend answered with a non-success status before streaming.
    Http { status: u16, body: String },
    /// The backend reported an error inside the stream.
    Backend { message: String, code: Option<u16> },
    /// The connection dropped or errored mid-stream.
    Io(String),
    /// The backend sent a frame the client could not understand.
    Protocol(String),
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "connect: {}", msg),
            Self::Http { status, body } => write!(f, "http {}: {}", status, body),
            Self::Backend { message, code } => match code {
                Some(code) => write!(f, "backend ({}): {}", code, message),
                None => write!(f, "backend: {}", message),
            },
            Self::Io(msg) => write!(f, "io: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol: {}", msg),
        }
    }
}

// =============================================================================
// Stream Handle
// =============================================================================

/// Handle to one open generation stream.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    abort: CancellationToken,
}

impl StreamHandle {
    /// Couple an event channel with an abort token. Client implementations
    /// (and test doubles) hand the sender side to their reader task and
    /// watch the token for teardown.
    pub fn new(events: mpsc::Receiver<StreamEvent>, abort: CancellationToken) -> Self {
        Self { events, abort }
    }

    /// Next event, in arrival order. `None` once the reader task is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Request teardown. Returns immediately and is idempotent. No
    /// `Completed` will follow, but fragments already buffered at the
    /// moment of the call may still be observed; callers must not treat
    /// them as meaningful.
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("aborted", &self.abort.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Client Trait
// =============================================================================

/// Opens cancellable streaming generation calls.
///
/// No reconnect-on-drop: a dropped connection surfaces as a `Failed` event
/// and the session ends.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Open one generation call. Errors are raw; classification is the
    /// controller's job.
    async fn open(&self, request: GenerationRequest) -> Result<StreamHandle, StreamFailure>;

    /// Probe backend reachability. Drives the registry's first
    /// `Loading -> Idle/Unavailable` observation.
    async fn health_check(&self) -> bool;
}
