//! Capability traits for scan hardware.
//!
//! The orchestration engine only knows two capabilities:
//!
//! - [`Manipulator`]: something that moves (delay stage, rotator, actuator)
//!   and can optionally emit trigger pulses at regular positions.
//! - [`DataSource`]: something that acquires a [`DataSet`] (detector,
//!   lock-in, or another scan).
//!
//! Both are async (`#[async_trait]`), thread-safe (`Send + Sync`) and take
//! `&self`; implementations keep their state behind interior mutability.

use crate::data::{Axis, DataSet};
use crate::error::{DriverError, DriverErrorKind, ScanError, ScanResult};
use crate::observable::Observable;
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Interval used by the default [`Manipulator::wait_for_target_reached`].
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Motion state reported by a manipulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ManipulatorStatus {
    /// Not yet known (before the first report)
    #[default]
    Undefined,
    /// The last move completed
    TargetReached,
    /// A move is in progress
    Moving,
    /// The controller reported a fault
    Error,
    /// Motion was halted by `stop()`
    Stopped,
}

impl ManipulatorStatus {
    /// No motion is pending.
    pub fn is_settled(&self) -> bool {
        matches!(self, ManipulatorStatus::TargetReached | ManipulatorStatus::Stopped)
    }
}

impl std::fmt::Display for ManipulatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManipulatorStatus::Undefined => write!(f, "Undefined"),
            ManipulatorStatus::TargetReached => write!(f, "TargetReached"),
            ManipulatorStatus::Moving => write!(f, "Moving"),
            ManipulatorStatus::Error => write!(f, "Error"),
            ManipulatorStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Trigger pulse schedule: one pulse every `step` from `start` to `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerParams {
    /// Distance between pulses; its sign is the direction of travel
    pub step: Quantity,
    /// First pulse position
    pub start: Quantity,
    /// Last pulse position
    pub stop: Quantity,
}

impl TriggerParams {
    /// Derive the schedule covering `axis` (`step` from its first two points).
    pub fn from_axis(axis: &Axis) -> ScanResult<Self> {
        let (Some(start), Some(second), Some(stop)) = (axis.first(), axis.get(1), axis.last())
        else {
            return Err(ScanError::configuration(
                "a trigger axis needs at least two positions",
            ));
        };
        Ok(Self {
            step: second.try_sub(start)?,
            start,
            stop,
        })
    }

    /// Pulse positions `start, start + step, ...` up to and including `stop`,
    /// expressed in `unit`.
    pub fn to_axis(&self, unit: Unit) -> ScanResult<Axis> {
        let step = self.step.value_in(unit)?;
        let start = self.start.value_in(unit)?;
        let stop = self.stop.value_in(unit)?;
        if step == 0.0 {
            return Err(ScanError::configuration("trigger step is zero"));
        }

        let span = (stop - start) / step;
        if span < -1e-9 {
            return Err(ScanError::configuration(format!(
                "trigger step {} points away from stop {}",
                self.step, self.stop
            )));
        }
        let count = (span + 1e-9).floor().max(0.0) as usize + 1;
        let values = (0..count).map(|i| start + i as f64 * step).collect();
        Ok(Axis::new(values, unit))
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Positioning
///
/// # Contract
/// - `move_to` suspends until the target is reached or the move fails
/// - A new `move_to` may be issued while an older one is pending; the driver
///   decides whether the older move fails or completes
/// - `stop` never suspends and is safe when idle
/// - `position` and `status` are owned by the driver; callers only observe
#[async_trait]
pub trait Manipulator: Send + Sync {
    /// Current position.
    fn position(&self) -> &Observable<Quantity>;

    /// Motion status.
    fn status(&self) -> &Observable<ManipulatorStatus>;

    /// Unit in which the device natively works.
    fn preferred_unit(&self) -> Unit;

    /// Move to `target`, optionally at `velocity`, and wait until reached.
    async fn move_to(&self, target: Quantity, velocity: Option<Quantity>) -> ScanResult<()>;

    /// Position for a sweep from `start` to `stop`.
    ///
    /// # Default Implementation
    /// Moves to `start`. Drivers that emit trigger pulses override this to
    /// back off far enough that the first pulse is not lost.
    async fn begin_scan(
        &self,
        start: Quantity,
        stop: Quantity,
        velocity: Option<Quantity>,
    ) -> ScanResult<()> {
        let _ = stop;
        self.move_to(start, velocity).await
    }

    /// Negotiate a trigger schedule; returns the realized (possibly
    /// quantized) parameters.
    ///
    /// # Default Implementation
    /// Returns a configuration error: the device has no trigger output.
    async fn configure_trigger(&self, params: TriggerParams) -> ScanResult<TriggerParams> {
        let _ = params;
        Err(ScanError::configuration(
            "manipulator does not support trigger output",
        ))
    }

    /// Axis form of [`Manipulator::configure_trigger`].
    ///
    /// Returns the realized pulse positions in the unit of `axis`.
    async fn configure_trigger_axis(&self, axis: &Axis) -> ScanResult<Axis> {
        let requested = TriggerParams::from_axis(axis)?;
        let realized = self.configure_trigger(requested).await?;
        let realized_axis = realized.to_axis(axis.unit())?;
        Ok(realized_axis.with_name(axis.name()))
    }

    /// Wait until the status is settled.
    ///
    /// # Default Implementation
    /// Polls [`Manipulator::status`] every [`STATUS_POLL_INTERVAL`]. Fails on
    /// `Error` status, or with [`ScanError::Timeout`] once `timeout` elapses.
    async fn wait_for_target_reached(&self, timeout: Option<Duration>) -> ScanResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.status().get() {
                status if status.is_settled() => return Ok(()),
                ManipulatorStatus::Error => {
                    return Err(DriverError::new(
                        "manipulator",
                        DriverErrorKind::Hardware,
                        "manipulator reported error status",
                    )
                    .into())
                }
                _ => {}
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(ScanError::Timeout {
                        operation: "manipulator target reached".to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    /// Halt any motion immediately.
    fn stop(&self);
}

/// Capability: Acquisition
///
/// # Contract
/// - `start` arms the device; `axis_hint` carries the expected trigger
///   positions for devices that preallocate, others ignore it
/// - `stop` is safe when not started
/// - `read_data_set` returns what was acquired since `start` (triggered
///   devices) or one fresh sample (software-timed devices)
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Arm acquisition. `axis_hint` carries the expected trigger positions
    /// of a continuous sweep.
    async fn start(&self, axis_hint: Option<&Axis>) -> ScanResult<()>;

    /// Disarm acquisition. Safe when idle.
    async fn stop(&self) -> ScanResult<()>;

    /// Return what was acquired since `start`, or one fresh sample.
    async fn read_data_set(&self) -> ScanResult<DataSet>;
}
