//! Generation Error Taxonomy
//!
//! Every failure the core can surface, plus the classifier that maps raw
//! backend/transport errors onto user-relevant categories.
//!
//! ## Categories
//!
//! - **Cancelled**: user-initiated; partial text is kept, never a failure banner
//! - **InsufficientCredits**: drives the dedicated buy-credits prompt
//! - **Busy**: a generation is already running; no network call was made
//! - **Unavailable**: the backend itself is down; flips the shared registry
//! - **Transport**: network failure mid-stream; retrying is reasonable
//! - **Unknown**: fallback for anything unrecognized
//!
//! ## Design Principles
//!
//! - The controller is the single classification point: no raw error
//!   crosses a session's result boundary
//! - Classification works from HTTP status codes where available and falls
//!   back to message patterns otherwise

use thiserror::Error;

// =============================================================================
// Generation Error
// =============================================================================

/// Errors surfaced to callers of the generation core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// User-initiated cancellation. Partial output delivered so far stays valid.
    #[error("generation cancelled")]
    Cancelled,

    /// The account has no credits left for this generation.
    #[error("insufficient credits: {0}")]
    InsufficientCredits(String),

    /// A generation is already running for this surface or the backend
    /// reported itself busy.
    #[error("generation already in progress")]
    Busy,

    /// The backend is down or unreachable.
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    /// Network failure mid-stream.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Unrecognized failure.
    #[error("generation failed: {0}")]
    Unknown(String),
}

impl GenerationError {
    /// Whether retrying the same request is a reasonable suggestion to show.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this error means the backend is down for every surface,
    /// not just this session.
    pub fn marks_backend_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short stable tag for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::InsufficientCredits(_) => "insufficient_credits",
            Self::Busy => "busy",
            Self::Unavailable(_) => "unavailable",
            Self::Transport(_) => "transport",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Result alias for the generation core.
pub type Result<T> = std::result::Result<T, GenerationError>;

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw backend and transport errors onto [`GenerationError`] categories.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from the backend or transport layer.
    pub fn classify(message: &str) -> GenerationError {
        let lower = message.to_lowercase();

        // Credit exhaustion patterns
        if lower.contains("insufficient credit")
            || lower.contains("out of credits")
            || lower.contains("no credits")
            || lower.contains("credit balance")
            || lower.contains("payment required")
            || lower.contains("quota exceeded")
        {
            return GenerationError::InsufficientCredits(message.to_string());
        }

        // Busy backend patterns
        if lower.contains("busy")
            || lower.contains("already generating")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
        {
            return GenerationError::Busy;
        }

        // Backend-down patterns
        if lower.contains("unavailable")
            || lower.contains("connection refused")
            || lower.contains("cannot connect")
            || lower.contains("unreachable")
            || lower.contains("dns")
            || lower.contains("503")
            || lower.contains("502")
        {
            return GenerationError::Unavailable(message.to_string());
        }

        // Mid-stream transport patterns
        if lower.contains("connection reset")
            || lower.contains("broken pipe")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("stream ended")
            || lower.contains("network")
        {
            return GenerationError::Transport(message.to_string());
        }

        GenerationError::Unknown(message.to_string())
    }

    /// Classify an HTTP status code directly (more accurate than string
    /// matching). The body is consulted first so a backend that reports
    /// credit exhaustion under a generic status still classifies correctly.
    pub fn classify_http_status(status: u16, body: &str) -> GenerationError {
        if !body.is_empty() {
            let by_message = Self::classify(body);
            if !matches!(by_message, GenerationError::Unknown(_)) {
                return by_message;
            }
        }

        match status {
            402 => GenerationError::InsufficientCredits(format!("HTTP 402: {}", body)),
            429 => GenerationError::Busy,
            500 | 502 | 503 | 504 => {
                GenerationError::Unavailable(format!("HTTP {}: {}", status, body))
            }
            _ => GenerationError::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
