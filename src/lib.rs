//! Storyloom - Streaming Generation Core for AI-Assisted Story Writing
//!
//! The reusable plumbing every editing surface of a story-writing app
//! shares: cancellable streaming generation sessions, live accumulation of
//! partial output, a shared availability flag, user-relevant error
//! classification, and post-session credit reconciliation.
//!
//! ## Core Pieces
//!
//! - **Sessions**: one `start()` → one terminal state (`Completed`,
//!   `Cancelled`, or `Failed`), with fragments forwarded in order as they
//!   arrive
//! - **Cancellation**: non-blocking and idempotent; partial text delivered
//!   before a cancel stays valid
//! - **Shared Status**: an injected registry every controller checks before
//!   opening a connection
//! - **Error Taxonomy**: credits exhausted, busy, backend down, transport
//!   failure — classified once, in the controller
//! - **Credit Sync**: a delayed fire-and-forget balance re-read after every
//!   session
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use storyloom::{
//!     AiStatusRegistry, CoreConfig, CreditLedgerSync, GenerationController,
//!     HttpBalanceSource, SseStreamingClient, StoryDocument, TargetField,
//! };
//!
//! let config = CoreConfig::load()?;
//! let client = Arc::new(SseStreamingClient::new(&config.backend)?);
//! let registry = Arc::new(AiStatusRegistry::new());
//! let balance = Arc::new(HttpBalanceSource::new(&config.credits, None)?);
//! let credits = Arc::new(CreditLedgerSync::new(balance));
//!
//! let controller = GenerationController::new(client, registry, credits);
//! let handle = controller.start(
//!     &StoryDocument::default(),
//!     TargetField::Backstory,
//!     Some("keep it melancholic"),
//!     |fragment| print!("{fragment}"),
//! );
//! let text = handle.result().await?;
//! ```
//!
//! ## Modules
//!
//! - [`controller`]: session state machine and caller-held handles
//! - [`client`]: streaming transport trait + SSE implementation
//! - [`request`]: pure request assembly from document snapshots
//! - [`status`]: shared availability registry
//! - [`credits`]: post-session balance reconciliation
//! - [`config`]: layered configuration
//! - [`types`]: documents, sessions, and the error taxonomy

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod credits;
pub mod request;
pub mod status;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{BackendConfig, ConfigError, CoreConfig, CreditConfig, TimeoutConfig};
pub use types::{
    CharacterSheet, ErrorClassifier, GenerationError, GenerationSession, Result, SessionStatus,
    StoryDocument, TargetField,
};

// =============================================================================
// Session Re-exports
// =============================================================================

pub use controller::{GenerationController, SessionCanceller, SessionHandle};
pub use request::{GenerationRequest, PromptMessage, PromptRole, RequestBuilder, SamplingParams};

// =============================================================================
// Transport & Services Re-exports
// =============================================================================

pub use client::{SseStreamingClient, StreamEvent, StreamFailure, StreamHandle, StreamingClient};
pub use credits::{BalanceSource, CreditLedgerSync, HttpBalanceSource};
pub use status::{AiStatus, AiStatusRegistry};
