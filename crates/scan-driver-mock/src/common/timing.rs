//! Timing configuration for timed (realistic/chaos) mode.

use std::time::Duration;

/// Simulated delays of a timed mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Interval between simulated motion updates
    pub tick_interval_ms: u64,
    /// Extra settling time after the target is reached
    pub settling_time_ms: u64,
    /// Delay added to each command round trip
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// Motion controller defaults (10 ms ticks, 20 ms settling)
    pub fn manipulator() -> Self {
        Self {
            tick_interval_ms: 10,
            settling_time_ms: 20,
            communication_delay_ms: 2,
        }
    }

    /// Acquisition device defaults
    pub fn detector() -> Self {
        Self {
            tick_interval_ms: 0,
            settling_time_ms: 0,
            communication_delay_ms: 5,
        }
    }

    /// Motion update period (at least 1 ms)
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Wait after reaching a target
    pub fn settling_time(&self) -> Duration {
        Duration::from_millis(self.settling_time_ms)
    }

    /// Per-command round trip
    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 0,
            settling_time_ms: 0,
            communication_delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_interval_never_zero() {
        assert_eq!(TimingConfig::default().tick_interval(), Duration::from_millis(1));
        assert_eq!(
            TimingConfig::manipulator().tick_interval(),
            Duration::from_millis(10)
        );
    }
}
