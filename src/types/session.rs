//! Generation Session State
//!
//! One session is one complete attempt to produce text, from `start()` to a
//! terminal state. The controller owns the only mutable copy; surfaces
//! observe read-only snapshots through a watch channel.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

// =============================================================================
// Session Status
// =============================================================================

/// Lifecycle states of a generation session.
///
/// ```text
/// Pending -> Requesting -> Streaming -> {Completed | Cancelled | Failed}
/// ```
///
/// Exactly one terminal transition occurs per session; a session never
/// re-enters `Streaming` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, nothing sent yet.
    Pending,
    /// Request dispatched, no fragment received yet.
    Requesting,
    /// At least one fragment received.
    Streaming,
    /// Terminal: the backend finalized the text.
    Completed,
    /// Terminal: the user cancelled; partial text stays valid.
    Cancelled,
    /// Terminal: classified error.
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Requesting => write!(f, "REQUESTING"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// =============================================================================
// Generation Session
// =============================================================================

/// State of one generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    id: Uuid,
    slot: String,
    status: SessionStatus,
    accumulated_text: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl GenerationSession {
    /// Create a fresh session for a slot, in `Pending`.
    pub fn new(slot: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot: slot.into(),
            status: SessionStatus::Pending,
            accumulated_text: String::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Everything streamed so far. Length is non-decreasing while streaming,
    /// and the text survives cancellation and failure.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// `Pending -> Requesting`.
    pub(crate) fn mark_requesting(&mut self) {
        debug_assert_eq!(self.status, SessionStatus::Pending);
        self.status = SessionStatus::Requesting;
    }

    /// Append one fragment. The first fragment moves the session into
    /// `Streaming`. Fragments arriving after a terminal state are dropped:
    /// teardown after an abort can still deliver buffered data.
    pub(crate) fn append_fragment(&mut self, fragment: &str) {
        if self.status.is_terminal() {
            warn!(
                session = %self.id,
                "dropping fragment delivered after terminal state {}",
                self.status
            );
            return;
        }
        self.status = SessionStatus::Streaming;
        self.accumulated_text.push_str(fragment);
    }

    /// Apply the terminal transition. Returns `false` (and changes nothing)
    /// if a terminal state was already reached; the first transition wins.
    pub(crate) fn finish(&mut self, terminal: SessionStatus) -> bool {
        debug_assert!(terminal.is_terminal());
        if self.status.is_terminal() {
            warn!(
                session = %self.id,
                "ignoring {} after terminal state {}",
                terminal, self.status
            );
            return false;
        }
        self.status = terminal;
        self.ended_at = Some(Utc::now());
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
