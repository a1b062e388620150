//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// HTTP/Network constants
pub mod network {
    /// Deadline for opening a generation stream (seconds)
    pub const OPEN_TIMEOUT_SECS: u64 = 30;

    /// Maximum silence between fragments before the stream is declared dead (seconds)
    pub const STALL_TIMEOUT_SECS: u64 = 120;

    /// Timeout for the balance-query endpoint (seconds)
    pub const BALANCE_TIMEOUT_SECS: u64 = 10;
}

/// Streaming constants
pub mod stream {
    /// Capacity of the per-session event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Credit ledger constants
pub mod credits {
    /// Delay before re-reading the balance after a session ends (milliseconds).
    /// The backend meters asynchronously; reading too early returns a stale count.
    pub const SETTLE_DELAY_MS: u64 = 1_000;
}

/// Sampling constants
pub mod sampling {
    /// Default temperature for generation requests
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Upper bound accepted for configured temperatures
    pub const MAX_TEMPERATURE: f32 = 2.0;
}
