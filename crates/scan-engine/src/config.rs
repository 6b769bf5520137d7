//! Sweep parameters.

use scan_core::capabilities::Manipulator;
use scan_core::error::{ScanError, ScanResult};
use scan_core::units::Quantity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of one [`Scan`](crate::Scan).
///
/// Loaded from the `[scan]` config section, e.g.
///
/// ```toml
/// minimum = "0 mm"
/// maximum = "10 mm"
/// step = "2 mm"
/// overscan = "0.5 mm"
/// scan_velocity = "5 mm/s"
/// continuous_scan = true
/// settle_timeout = "5s"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First position of the sweep
    pub minimum: Quantity,
    /// Exclusive end of the sweep
    pub maximum: Quantity,
    /// Step size; its sign is ignored and its unit becomes the axis unit
    pub step: Quantity,

    /// Extra travel before the first and after the last position
    #[serde(default)]
    pub overscan: Option<Quantity>,

    /// Velocity for approach and retract moves (driver default if unset)
    #[serde(default)]
    pub positioning_velocity: Option<Quantity>,

    /// Velocity for moves between acquisitions (driver default if unset)
    #[serde(default)]
    pub scan_velocity: Option<Quantity>,

    /// Trigger-synchronized sweep instead of step-and-settle
    #[serde(default)]
    pub continuous_scan: bool,

    /// Move back to the start after the sweep, without waiting
    #[serde(default)]
    pub retract_at_end: bool,

    /// Bound for the initial wait on the manipulator (unbounded if unset)
    #[serde(default, with = "humantime_serde")]
    pub settle_timeout: Option<Duration>,
}

impl ScanConfig {
    /// Stepped sweep from `minimum` to `maximum` (exclusive).
    pub fn new(minimum: Quantity, maximum: Quantity, step: Quantity) -> Self {
        Self {
            minimum,
            maximum,
            step,
            overscan: None,
            positioning_velocity: None,
            scan_velocity: None,
            continuous_scan: false,
            retract_at_end: false,
            settle_timeout: None,
        }
    }

    /// Defaults in the manipulator's preferred unit: 0 to 10 in steps of 1.
    pub fn for_manipulator(manipulator: &dyn Manipulator) -> Self {
        let unit = manipulator.preferred_unit();
        Self::new(
            Quantity::new(0.0, unit),
            Quantity::new(10.0, unit),
            Quantity::new(1.0, unit),
        )
    }

    /// Extra travel around the sweep.
    pub fn with_overscan(mut self, overscan: Quantity) -> Self {
        self.overscan = Some(overscan);
        self
    }

    /// Velocity for approach and retract moves.
    pub fn with_positioning_velocity(mut self, velocity: Quantity) -> Self {
        self.positioning_velocity = Some(velocity);
        self
    }

    /// Velocity for moves between acquisitions.
    pub fn with_scan_velocity(mut self, velocity: Quantity) -> Self {
        self.scan_velocity = Some(velocity);
        self
    }

    /// Select a trigger-synchronized sweep.
    pub fn continuous(mut self, continuous: bool) -> Self {
        self.continuous_scan = continuous;
        self
    }

    /// Move back to the start after the sweep.
    pub fn retract_at_end(mut self, retract: bool) -> Self {
        self.retract_at_end = retract;
        self
    }

    /// Bound the initial wait on the manipulator.
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = Some(timeout);
        self
    }

    /// Check unit compatibility, finiteness and the step value.
    pub fn validate(&self) -> ScanResult<()> {
        let step = self.step;
        if step.value() == 0.0 || !step.value().is_finite() {
            return Err(ScanError::configuration(format!(
                "step must be a non-zero finite quantity, got {}",
                step
            )));
        }
        let positions = [
            ("minimum", Some(self.minimum)),
            ("maximum", Some(self.maximum)),
            ("overscan", self.overscan),
        ];
        for (name, value) in positions {
            let Some(value) = value else { continue };
            if !value.value().is_finite() {
                return Err(ScanError::configuration(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
            if !value.is_compatible(&step) {
                return Err(ScanError::configuration(format!(
                    "{} ({}) is not compatible with step ({})",
                    name, value, step
                )));
            }
        }
        let velocities = [
            ("positioning_velocity", self.positioning_velocity),
            ("scan_velocity", self.scan_velocity),
        ];
        for (name, velocity) in velocities {
            if let Some(velocity) = velocity.filter(|v| !v.value().is_finite()) {
                return Err(ScanError::configuration(format!(
                    "{} must be finite, got {}",
                    name, velocity
                )));
            }
        }
        Ok(())
    }
}
