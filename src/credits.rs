//! Credit Ledger Synchronization
//!
//! Generations consume credits metered by an external account service. The
//! balance is re-read once after every session that opened a connection,
//! whatever the outcome, after a settle delay so the backend's own metering
//! catches up before the count is trusted.
//!
//! Refreshes are fire-and-forget: a failed re-read is logged and never
//! affects the session's already-settled result. The core never mutates
//! the balance itself; the account service remains the owner.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConfigError, CreditConfig, validate_endpoint};
use crate::constants::{credits, network};

// =============================================================================
// Balance Source
// =============================================================================

/// Where the current credit count comes from.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Current credit count from the account service. Errors are strings:
    /// they are only ever logged, never classified or propagated.
    async fn fetch_balance(&self) -> Result<i64, String>;
}

/// HTTP balance source: `GET <endpoint>` returning `{"credits": N}`.
pub struct HttpBalanceSource {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpBalanceSource {
    pub fn new(config: &CreditConfig, api_key: Option<String>) -> Result<Self, ConfigError> {
        let endpoint = validate_endpoint(&config.balance_endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(network::BALANCE_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConfigError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.map(SecretString::from),
        })
    }
}

impl fmt::Debug for HttpBalanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBalanceSource")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    credits: i64,
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    async fn fetch_balance(&self) -> Result<i64, String> {
        let mut builder = self.http.get(&self.endpoint);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("balance request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("balance request failed: {}", response.status()));
        }

        let body: BalanceResponse = response
            .json()
            .await
            .map_err(|e| format!("balance response malformed: {}", e))?;
        Ok(body.credits)
    }
}

// =============================================================================
// Ledger Sync
// =============================================================================

/// Schedules the delayed post-session balance refresh and caches the last
/// observed count for display surfaces.
pub struct CreditLedgerSync {
    source: Arc<dyn BalanceSource>,
    settle_delay: Duration,
    balance: watch::Sender<Option<i64>>,
}

impl CreditLedgerSync {
    /// Sync with the default settle delay.
    pub fn new(source: Arc<dyn BalanceSource>) -> Self {
        Self::with_settle_delay(source, Duration::from_millis(credits::SETTLE_DELAY_MS))
    }

    pub fn with_settle_delay(source: Arc<dyn BalanceSource>, settle_delay: Duration) -> Self {
        let (balance, _) = watch::channel(None);
        Self {
            source,
            settle_delay,
            balance,
        }
    }

    /// Schedule one delayed refresh. Returns immediately; the spawned task
    /// waits out the settle delay, re-reads the balance, and publishes it.
    /// Failure is logged and swallowed.
    pub fn schedule_refresh(&self, session_id: Uuid) {
        let source = Arc::clone(&self.source);
        let publish = self.balance.clone();
        let delay = self.settle_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match source.fetch_balance().await {
                Ok(balance) => {
                    debug!(session = %session_id, balance, "credit balance refreshed");
                    publish.send_replace(Some(balance));
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "credit balance refresh failed");
                }
            }
        });
    }

    /// Last observed balance; `None` until the first successful refresh.
    pub fn balance(&self) -> watch::Receiver<Option<i64>> {
        self.balance.subscribe()
    }
}

impl fmt::Debug for CreditLedgerSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditLedgerSync")
            .field("settle_delay", &self.settle_delay)
            .field("balance", &*self.balance.borrow())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
