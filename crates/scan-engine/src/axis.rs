//! Sweep axis computation.

use crate::config::ScanConfig;
use scan_core::data::Axis;
use scan_core::error::{ScanError, ScanResult};
use scan_core::units::Quantity;

/// Nominal positions of a sweep together with its signed overscan.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    /// Nominal positions in the step unit
    pub axis: Axis,
    /// Negative for a descending axis
    pub overscan: Quantity,
}

impl SweepPlan {
    /// Compute the half-open nominal axis `[minimum, maximum)`.
    ///
    /// The axis unit is the unit of `step`. When `maximum < minimum` the
    /// step is negated and the axis descends.
    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        config.validate()?;

        let unit = config.step.unit();
        let minimum = config.minimum.value_in(unit)?;
        let maximum = config.maximum.value_in(unit)?;
        let descending = maximum < minimum;
        let step = if descending {
            -config.step.value().abs()
        } else {
            config.step.value().abs()
        };

        let axis = Axis::arange(minimum, maximum, step, unit);
        if axis.is_empty() {
            return Err(ScanError::configuration(format!(
                "sweep from {} to {} contains no positions",
                config.minimum, config.maximum
            )));
        }

        let overscan = match config.overscan {
            Some(overscan) => overscan.value_in(unit)?.abs(),
            None => 0.0,
        };
        let overscan = Quantity::new(if descending { -overscan } else { overscan }, unit);

        Ok(Self { axis, overscan })
    }

    /// Where the retract move goes: `first - overscan`.
    pub fn retract_target(first: Quantity, overscan: Quantity) -> ScanResult<Quantity> {
        Ok(first.try_sub(overscan)?)
    }
}
