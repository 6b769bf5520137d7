//! Simulated hardware trigger cable between a manipulator and detectors.

use scan_core::units::Quantity;
use tokio::sync::broadcast;

const TRIGGER_LINE_CAPACITY: usize = 4096;

/// One trigger pulse, emitted when the manipulator crosses a scheduled
/// position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPulse {
    /// Index within the armed schedule
    pub index: usize,
    /// Scheduled position that was crossed
    pub position: Quantity,
}

/// Broadcast channel carrying [`TriggerPulse`]s.
///
/// Receivers only see pulses emitted after they subscribed; pulses fired
/// with nobody listening are dropped.
#[derive(Debug, Clone)]
pub struct TriggerLine {
    sender: broadcast::Sender<TriggerPulse>,
}

impl TriggerLine {
    /// Line with no receivers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(TRIGGER_LINE_CAPACITY);
        Self { sender }
    }

    /// Receive pulses fired from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerPulse> {
        self.sender.subscribe()
    }

    /// Emit a pulse; returns the number of receivers that got it.
    pub fn fire(&self, pulse: TriggerPulse) -> usize {
        self.sender.send(pulse).unwrap_or(0)
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TriggerLine {
    fn default() -> Self {
        Self::new()
    }
}
