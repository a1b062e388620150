//! Generation Session Controller
//!
//! Owns one generation session's state machine: consults the shared
//! availability registry, builds the request, opens the stream, forwards
//! fragments, and settles the caller-held result exactly once.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending -> Requesting -> Streaming -> {Completed | Cancelled | Failed}
//! ```
//!
//! The controller is reusable across sessions but drives at most one live
//! session at a time; a second `start()` while one is in flight refuses
//! with the busy error rather than replacing the running session.
//!
//! This is also the single classification point: every raw failure from
//! the streaming layer becomes exactly one [`GenerationError`] before the
//! result rejects.

use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{StreamEvent, StreamFailure, StreamingClient};
use crate::config::TimeoutConfig;
use crate::credits::CreditLedgerSync;
use crate::request::{GenerationRequest, RequestBuilder, SamplingParams};
use crate::status::AiStatusRegistry;
use crate::types::{
    ErrorClassifier, GenerationError, GenerationSession, SessionStatus, StoryDocument,
    TargetField,
};

type ProgressFn = Box<dyn Fn(&str) + Send + Sync>;

// =============================================================================
// Controller
// =============================================================================

/// Drives generation sessions for one editing surface.
pub struct GenerationController {
    client: Arc<dyn StreamingClient>,
    registry: Arc<AiStatusRegistry>,
    credits: Arc<CreditLedgerSync>,
    timeouts: TimeoutConfig,
    sampling: SamplingParams,
    /// Live-session marker; cleared by the driver on every terminal
    /// transition.
    active: Arc<Mutex<Option<Uuid>>>,
}

impl GenerationController {
    pub fn new(
        client: Arc<dyn StreamingClient>,
        registry: Arc<AiStatusRegistry>,
        credits: Arc<CreditLedgerSync>,
    ) -> Self {
        Self {
            client,
            registry,
            credits,
            timeouts: TimeoutConfig::default(),
            sampling: SamplingParams::default(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Start a generation session for `target`.
    ///
    /// Returns immediately with a handle; the session runs on a spawned
    /// task. If a generation is already visibly running (here or on any
    /// surface sharing the registry), the handle's result rejects with the
    /// busy error, the busy notice is raised, and no network call is made.
    ///
    /// `on_progress` receives each fragment verbatim, in arrival order.
    pub fn start<F>(
        &self,
        document: &StoryDocument,
        target: TargetField,
        instructions: Option<&str>,
        on_progress: F,
    ) -> SessionHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let slot = target.slot_key();
        let mut session = GenerationSession::new(&slot);
        let id = session.id();
        let cancel = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();

        // Surface-local guard, then the shared advisory flag. Each is a
        // single lock acquisition, so two starts cannot both observe Idle.
        let refusal = {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            if active.is_some() {
                Some(GenerationError::Busy)
            } else {
                match self.registry.begin_generation() {
                    Err(err) => Some(err),
                    Ok(()) => {
                        *active = Some(id);
                        None
                    }
                }
            }
        };

        if let Some(err) = refusal {
            warn!(slot = %slot, "generation refused: already in progress");
            self.registry.set_busy_notice(true);
            session.finish(SessionStatus::Failed);
            let (_, snapshot_rx) = watch::channel(session);
            let _ = result_tx.send(Err(err));
            return SessionHandle {
                id,
                cancel,
                result: result_rx,
                snapshot: snapshot_rx,
            };
        }

        let request =
            RequestBuilder::build_with_sampling(document, &target, instructions, self.sampling);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.clone());

        info!(session = %id, slot = %slot, "starting generation session");

        let driver = SessionDriver {
            client: Arc::clone(&self.client),
            registry: Arc::clone(&self.registry),
            credits: Arc::clone(&self.credits),
            timeouts: self.timeouts.clone(),
            active: Arc::clone(&self.active),
            on_progress: Box::new(on_progress),
            cancel: cancel.clone(),
            snapshot: snapshot_tx,
        };
        tokio::spawn(driver.run(session, request, result_tx));

        SessionHandle {
            id,
            cancel,
            result: result_rx,
            snapshot: snapshot_rx,
        }
    }
}

impl std::fmt::Debug for GenerationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationController")
            .field("timeouts", &self.timeouts)
            .field("sampling", &self.sampling)
            .finish()
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Caller-held handle to a running (or already refused) session: a result
/// that settles exactly once, a non-blocking canceller, and a snapshot
/// channel for display surfaces.
pub struct SessionHandle {
    id: Uuid,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<String, GenerationError>>,
    snapshot: watch::Receiver<GenerationSession>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Never blocks; idempotent; no effect once the
    /// session reached a terminal state. Fragments already delivered to
    /// `on_progress` stay valid and are not retracted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cloneable canceller that outlives `result(self)`.
    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller(self.cancel.clone())
    }

    /// Await the settled result: the server-finalized text, or exactly one
    /// classified error.
    pub async fn result(self) -> Result<String, GenerationError> {
        match self.result.await {
            Ok(outcome) => outcome,
            // The driver settles before exiting; losing it without a
            // result means the runtime tore it down.
            Err(_) => Err(GenerationError::Unknown(
                "session driver dropped before settling".to_string(),
            )),
        }
    }

    /// Current session state, including everything streamed so far.
    pub fn snapshot(&self) -> GenerationSession {
        self.snapshot.borrow().clone()
    }

    /// Watch session state changes (status transitions and fragments).
    pub fn watch(&self) -> watch::Receiver<GenerationSession> {
        self.snapshot.clone()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("status", &self.snapshot.borrow().status())
            .finish()
    }
}

/// Cancellation half of a session handle.
#[derive(Debug, Clone)]
pub struct SessionCanceller(CancellationToken);

impl SessionCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

// =============================================================================
// Driver
// =============================================================================

struct SessionDriver {
    client: Arc<dyn StreamingClient>,
    registry: Arc<AiStatusRegistry>,
    credits: Arc<CreditLedgerSync>,
    timeouts: TimeoutConfig,
    active: Arc<Mutex<Option<Uuid>>>,
    on_progress: ProgressFn,
    cancel: CancellationToken,
    snapshot: watch::Sender<GenerationSession>,
}

impl SessionDriver {
    async fn run(
        self,
        mut session: GenerationSession,
        request: GenerationRequest,
        result_tx: oneshot::Sender<Result<String, GenerationError>>,
    ) {
        session.mark_requesting();
        self.snapshot.send_replace(session.clone());

        let outcome = self.run_stream(&mut session, request).await;

        let terminal = match &outcome {
            Ok(_) => SessionStatus::Completed,
            Err(GenerationError::Cancelled) => SessionStatus::Cancelled,
            Err(_) => SessionStatus::Failed,
        };
        session.finish(terminal);
        self.snapshot.send_replace(session.clone());

        match &outcome {
            Ok(text) => {
                info!(session = %session.id(), chars = text.len(), "generation completed");
            }
            Err(err) => {
                info!(session = %session.id(), kind = err.kind(), "generation ended: {}", err);
            }
        }

        self.registry.finish_generation(outcome.as_ref().err());
        self.credits.schedule_refresh(session.id());
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = None;

        // The caller may have dropped the handle without awaiting.
        let _ = result_tx.send(outcome);
    }

    async fn run_stream(
        &self,
        session: &mut GenerationSession,
        request: GenerationRequest,
    ) -> Result<String, GenerationError> {
        let mut handle = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(GenerationError::Cancelled),
            opened = tokio::time::timeout(self.timeouts.open(), self.client.open(request)) => {
                match opened {
                    Err(_) => {
                        return Err(GenerationError::Unavailable(format!(
                            "no response from backend within {:?}",
                            self.timeouts.open()
                        )));
                    }
                    Ok(Err(raw)) => return Err(classify_failure(raw)),
                    Ok(Ok(handle)) => handle,
                }
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    handle.abort();
                    return Err(GenerationError::Cancelled);
                }
                next = tokio::time::timeout(self.timeouts.stall(), handle.next_event()) => {
                    match next {
                        Err(_) => {
                            handle.abort();
                            return Err(GenerationError::Transport(format!(
                                "no data from backend for {:?}",
                                self.timeouts.stall()
                            )));
                        }
                        Ok(None) => {
                            return Err(GenerationError::Transport(
                                "generation stream closed without a terminal event".to_string(),
                            ));
                        }
                        Ok(Some(StreamEvent::Fragment(text))) => {
                            session.append_fragment(&text);
                            (self.on_progress)(&text);
                            self.snapshot.send_replace(session.clone());
                        }
                        // Server finalization wins over local accumulation:
                        // the backend may normalize whitespace or formatting.
                        Ok(Some(StreamEvent::Completed { final_text })) => return Ok(final_text),
                        Ok(Some(StreamEvent::Failed(raw))) => return Err(classify_failure(raw)),
                    }
                }
            }
        }
    }
}

/// Single classification point: raw stream failures become exactly one
/// user-facing category.
fn classify_failure(raw: StreamFailure) -> GenerationError {
    match raw {
        StreamFailure::Connect(msg) => GenerationError::Unavailable(msg),
        StreamFailure::Http { status, body } => {
            ErrorClassifier::classify_http_status(status, &body)
        }
        StreamFailure::Backend { message, code } => match code {
            Some(code) => ErrorClassifier::classify_http_status(code, &message),
            None => ErrorClassifier::classify(&message),
        },
        StreamFailure::Io(msg) => GenerationError::Transport(msg),
        StreamFailure::Protocol(msg) => GenerationError::Unknown(msg),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::client::StreamHandle;
    use crate::credits::BalanceSource;
    use crate::status::AiStatus;

    struct RefusingClient {
        called: AtomicBool,
    }

    impl RefusingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                called: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl StreamingClient for RefusingClient {
        async fn open(
            &self,
            _request: GenerationRequest,
        ) -> Result<StreamHandle, StreamFailure> {
            self.called.store(true, Ordering::SeqCst);
            Err(StreamFailure::Connect("must not be reached".to_string()))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct NullBalance;

    #[async_trait]
    impl BalanceSource for NullBalance {
        async fn fetch_balance(&self) -> Result<i64, String> {
            Ok(0)
        }
    }

    fn controller_with(client: Arc<dyn StreamingClient>) -> (GenerationController, Arc<AiStatusRegistry>) {
        let registry = Arc::new(AiStatusRegistry::new());
        registry.record_probe(true);
        let credits = Arc::new(CreditLedgerSync::new(Arc::new(NullBalance)));
        let controller = GenerationController::new(client, Arc::clone(&registry), credits)
            .with_timeouts(TimeoutConfig::fast());
        (controller, registry)
    }

    #[tokio::test]
    async fn test_busy_registry_refuses_without_network_call() {
        let client = RefusingClient::new();
        let (controller, registry) = controller_with(client.clone());

        // Another surface is visibly generating.
        registry.begin_generation().unwrap();

        let handle = controller.start(
            &StoryDocument::default(),
            TargetField::Backstory,
            None,
            |_| {},
        );

        assert_eq!(handle.result().await.unwrap_err(), GenerationError::Busy);
        assert!(!client.called.load(Ordering::SeqCst));
        assert!(registry.busy_notice());
        // The running session still owns the flag.
        assert_eq!(registry.status(), AiStatus::Busy);
    }

    #[tokio::test]
    async fn test_busy_refusal_snapshot_is_failed() {
        let client = RefusingClient::new();
        let (controller, registry) = controller_with(client);
        registry.begin_generation().unwrap();

        let handle = controller.start(
            &StoryDocument::default(),
            TargetField::StoryArc,
            None,
            |_| {},
        );
        assert_eq!(handle.snapshot().status(), SessionStatus::Failed);
        assert_eq!(handle.snapshot().accumulated_text(), "");
    }

    #[test]
    fn test_classify_connect_is_unavailable() {
        let err = classify_failure(StreamFailure::Connect("connection refused".into()));
        assert!(err.marks_backend_unavailable());
    }

    #[test]
    fn test_classify_http_402_is_credits() {
        let err = classify_failure(StreamFailure::Http {
            status: 402,
            body: String::new(),
        });
        assert!(matches!(err, GenerationError::InsufficientCredits(_)));
    }

    #[test]
    fn test_classify_backend_event_uses_code_then_message() {
        let err = classify_failure(StreamFailure::Backend {
            message: "no credits left".into(),
            code: Some(402),
        });
        assert!(matches!(err, GenerationError::InsufficientCredits(_)));

        let err = classify_failure(StreamFailure::Backend {
            message: "model is busy".into(),
            code: None,
        });
        assert_eq!(err, GenerationError::Busy);
    }

    #[test]
    fn test_classify_io_is_transport() {
        let err = classify_failure(StreamFailure::Io("connection reset".into()));
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_protocol_is_unknown() {
        let err = classify_failure(StreamFailure::Protocol("garbled frame".into()));
        assert!(matches!(err, GenerationError::Unknown(_)));
    }
}
