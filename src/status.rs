//! Shared AI Availability Registry
//!
//! A single process-wide flag telling every surface whether the generation
//! backend is free, busy, or down. Controllers consult it before opening a
//! connection and write it back on every terminal transition.
//!
//! ## States
//!
//! - **Loading**: process start, backend not observed yet
//! - **Idle**: free to generate
//! - **Busy**: a generation is visibly running somewhere
//! - **Unavailable**: the backend is down
//! - **Error**: surfaces may park the flag here after an unrecoverable
//!   setup failure; the core itself only writes the other four
//!
//! The registry is an advisory mutual-exclusion signal, not a hard lock:
//! the busy check-and-set happens under one write-lock acquisition, but
//! cross-slot exclusion beyond that is deliberately not enforced.

use std::fmt;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::types::GenerationError;

// =============================================================================
// Status
// =============================================================================

/// Availability of the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiStatus {
    Loading,
    Idle,
    Busy,
    Unavailable,
    Error,
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "LOADING"),
            Self::Idle => write!(f, "IDLE"),
            Self::Busy => write!(f, "BUSY"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// All mutable state behind a single lock so the busy check-and-set is one
/// atomic step.
#[derive(Debug)]
struct RegistryInner {
    status: AiStatus,
    busy_notice: bool,
}

/// Shared availability flag plus the busy-notice bit surfaces render from.
///
/// Inject an `Arc<AiStatusRegistry>` into each controller rather than
/// holding a global, so tests supply isolated instances and can assert on
/// write sequences.
pub struct AiStatusRegistry {
    inner: RwLock<RegistryInner>,
}

impl AiStatusRegistry {
    /// Fresh registry in `Loading`, the state before the first backend
    /// observation.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                status: AiStatus::Loading,
                busy_notice: false,
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> AiStatus {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .status
    }

    /// Overwrite the status. Controllers use the dedicated transitions
    /// below; this is for surfaces that manage `Error` themselves.
    pub fn set_status(&self, status: AiStatus) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.status != status {
            debug!("ai status: {} -> {}", inner.status, status);
            inner.status = status;
        }
    }

    /// Record the first (or any subsequent) backend reachability probe.
    pub fn record_probe(&self, reachable: bool) {
        let next = if reachable {
            AiStatus::Idle
        } else {
            AiStatus::Unavailable
        };
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A running generation owns the flag; a probe must not clobber it.
        if inner.status == AiStatus::Busy {
            return;
        }
        if inner.status != next {
            info!("ai status: {} -> {} (probe)", inner.status, next);
            inner.status = next;
        }
    }

    /// Busy check-and-set as one atomic step: refuses when a generation is
    /// already visibly running, otherwise claims the flag.
    pub fn begin_generation(&self) -> Result<(), GenerationError> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.status == AiStatus::Busy {
            debug!("generation refused: registry is BUSY");
            return Err(GenerationError::Busy);
        }
        debug!("ai status: {} -> BUSY", inner.status);
        inner.status = AiStatus::Busy;
        Ok(())
    }

    /// Release the flag after a terminal transition: back to `Idle`, unless
    /// the session failed because the backend itself is down.
    pub fn finish_generation(&self, error: Option<&GenerationError>) {
        let next = match error {
            Some(err) if err.marks_backend_unavailable() => AiStatus::Unavailable,
            _ => AiStatus::Idle,
        };
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("ai status: {} -> {}", inner.status, next);
        inner.status = next;
    }

    /// Raise or clear the blocking busy notice. The core raises it on a
    /// busy refusal; clearing it back is the surface's call.
    pub fn set_busy_notice(&self, visible: bool) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.busy_notice = visible;
    }

    /// Whether the busy notice should currently be shown.
    pub fn busy_notice(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .busy_notice
    }
}

impl Default for AiStatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AiStatusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiStatusRegistry")
            .field("status", &self.status())
            .field("busy_notice", &self.busy_notice())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_loading() {
        let registry = AiStatusRegistry::new();
        assert_eq!(registry.status(), AiStatus::Loading);
        assert!(!registry.busy_notice());
    }

    #[test]
    fn test_probe_moves_loading_to_idle_or_unavailable() {
        let registry = AiStatusRegistry::new();
        registry.record_probe(true);
        assert_eq!(registry.status(), AiStatus::Idle);

        registry.record_probe(false);
        assert_eq!(registry.status(), AiStatus::Unavailable);
    }

    #[test]
    fn test_probe_does_not_clobber_busy() {
        let registry = AiStatusRegistry::new();
        registry.begin_generation().unwrap();
        registry.record_probe(true);
        assert_eq!(registry.status(), AiStatus::Busy);
    }

    #[test]
    fn test_begin_refuses_when_busy() {
        let registry = AiStatusRegistry::new();
        registry.begin_generation().unwrap();
        assert_eq!(
            registry.begin_generation().unwrap_err(),
            GenerationError::Busy
        );
        assert_eq!(registry.status(), AiStatus::Busy);
    }

    #[test]
    fn test_begin_allowed_from_any_non_busy_state() {
        // Only BUSY refuses; Loading/Unavailable/Error still allow an
        // attempt (the stream will surface the real failure).
        for status in [AiStatus::Loading, AiStatus::Unavailable, AiStatus::Error] {
            let registry = AiStatusRegistry::new();
            registry.set_status(status);
            assert!(registry.begin_generation().is_ok());
            assert_eq!(registry.status(), AiStatus::Busy);
        }
    }

    #[test]
    fn test_finish_reverts_to_idle() {
        let registry = AiStatusRegistry::new();
        registry.begin_generation().unwrap();
        registry.finish_generation(None);
        assert_eq!(registry.status(), AiStatus::Idle);
    }

    #[test]
    fn test_finish_on_cancellation_reverts_to_idle() {
        let registry = AiStatusRegistry::new();
        registry.begin_generation().unwrap();
        registry.finish_generation(Some(&GenerationError::Cancelled));
        assert_eq!(registry.status(), AiStatus::Idle);
    }

    #[test]
    fn test_finish_on_backend_down_sets_unavailable() {
        let registry = AiStatusRegistry::new();
        registry.begin_generation().unwrap();
        registry.finish_generation(Some(&GenerationError::Unavailable(
            "connection refused".into(),
        )));
        assert_eq!(registry.status(), AiStatus::Unavailable);
    }

    #[test]
    fn test_busy_notice_toggle() {
        let registry = AiStatusRegistry::new();
        registry.set_busy_notice(true);
        assert!(registry.busy_notice());
        registry.set_busy_notice(false);
        assert!(!registry.busy_notice());
    }

    #[test]
    fn test_write_sequence_across_two_sessions() {
        let registry = AiStatusRegistry::new();
        registry.record_probe(true);

        registry.begin_generation().unwrap();
        assert_eq!(registry.status(), AiStatus::Busy);
        registry.finish_generation(None);
        assert_eq!(registry.status(), AiStatus::Idle);

        registry.begin_generation().unwrap();
        registry.finish_generation(Some(&GenerationError::Transport("reset".into())));
        assert_eq!(registry.status(), AiStatus::Idle);
    }
}
