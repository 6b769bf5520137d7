//! Operational modes for mock devices.
//!
//! - **Instant**: moves complete without delay, deterministic
//! - **Realistic**: motion advances in timed ticks at the requested velocity
//! - **Chaos**: realistic timing plus the configured error injection

use serde::{Deserialize, Serialize};

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Tick-based motion at the requested velocity
    Realistic,
    /// Realistic timing with injected failures
    Chaos,
}

impl MockMode {
    /// Whether this mode simulates elapsed time.
    pub fn is_timed(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
