//! Mock manipulator with trigger output.
//!
//! Simulates a motion controller (delay stage, rotator) that:
//! - moves at a requested velocity in timed ticks, publishing its position
//! - pre-empts a pending move when a new one is issued or `stop()` is called
//! - quantizes trigger schedules to a hardware resolution
//! - fires [`TriggerPulse`]s on its [`TriggerLine`] when motion in the
//!   armed direction crosses an armed trigger position (each position fires
//!   once per arming)
//!
//! # Example
//!
//! ```rust,ignore
//! let stage = MockManipulator::builder()
//!     .unit(MILLIMETER)
//!     .mode(MockMode::Realistic)
//!     .velocity(50.0)
//!     .trigger_resolution(0.001)
//!     .build();
//!
//! stage.move_to(Quantity::new(10.0, MILLIMETER), None).await?;
//! ```

use crate::common::{ErrorConfig, MockMode, TimingConfig};
use crate::trigger_line::{TriggerLine, TriggerPulse};
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::{Manipulator, ManipulatorStatus, TriggerParams};
use scan_core::describe::{ComponentDescription, Describe};
use scan_core::error::{DriverError, DriverErrorKind, ScanError, ScanResult};
use scan_core::observable::Observable;
use scan_core::units::{Dimension, Quantity, Unit, MILLIMETER};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

const DRIVER_TYPE: &str = "mock_manipulator";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`MockManipulator`], loadable from the `[mock.manipulator]`
/// config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MockManipulatorConfig {
    /// Native unit (default: mm)
    #[serde(default = "default_unit")]
    pub unit: Unit,

    /// Start position in native units
    #[serde(default)]
    pub initial_position: f64,

    /// Default velocity in native units per second
    #[serde(default = "default_velocity")]
    pub velocity: f64,

    /// Trigger positions and steps are rounded to multiples of this
    #[serde(default)]
    pub trigger_resolution: Option<f64>,

    /// Instant or timed motion
    #[serde(default)]
    pub mode: MockMode,

    /// Lower travel limit (requires `max_position`)
    #[serde(default)]
    pub min_position: Option<f64>,

    /// Upper travel limit (requires `min_position`)
    #[serde(default)]
    pub max_position: Option<f64>,

    /// Random failure probability per operation
    #[serde(default)]
    pub failure_rate: f64,

    /// Seed for random failures
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_unit() -> Unit {
    MILLIMETER
}

fn default_velocity() -> f64 {
    10.0
}

impl Default for MockManipulatorConfig {
    fn default() -> Self {
        Self {
            unit: default_unit(),
            initial_position: 0.0,
            velocity: default_velocity(),
            trigger_resolution: None,
            mode: MockMode::Instant,
            min_position: None,
            max_position: None,
            failure_rate: 0.0,
            seed: None,
        }
    }
}

/// Limit behavior when a target exceeds the travel range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitBehavior {
    /// Reject the move
    HardStop,
    /// Move to the nearest limit
    Clamp,
}

/// Travel range in native units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLimits {
    /// Lowest reachable position
    pub min_position: f64,
    /// Highest reachable position
    pub max_position: f64,
    /// What happens to targets outside the range
    pub behavior: LimitBehavior,
}

impl StageLimits {
    /// Reject targets outside `[min, max]`.
    pub fn hard_stop(min: f64, max: f64) -> Self {
        Self {
            min_position: min,
            max_position: max,
            behavior: LimitBehavior::HardStop,
        }
    }

    /// Clamp targets into `[min, max]`.
    pub fn clamp(min: f64, max: f64) -> Self {
        Self {
            min_position: min,
            max_position: max,
            behavior: LimitBehavior::Clamp,
        }
    }

    fn enforce(&self, target: f64) -> Result<f64, DriverError> {
        match self.behavior {
            LimitBehavior::Clamp => Ok(target.clamp(self.min_position, self.max_position)),
            LimitBehavior::HardStop => {
                if target < self.min_position || target > self.max_position {
                    Err(DriverError::new(
                        DRIVER_TYPE,
                        DriverErrorKind::InvalidParameter,
                        format!(
                            "Position {} exceeds limits [{}, {}]",
                            target, self.min_position, self.max_position
                        ),
                    ))
                } else {
                    Ok(target)
                }
            }
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct MotionState {
    position: f64,
    /// Incremented by every new move and by `stop()`
    generation: u64,
    schedule: Option<TriggerSchedule>,
}

#[derive(Debug)]
struct TriggerSchedule {
    positions: Vec<f64>,
    fired: Vec<bool>,
    /// Sign of the schedule step; `0.0` arms both directions
    direction: f64,
}

impl TriggerSchedule {
    fn new(positions: Vec<f64>, step: f64) -> Self {
        let fired = vec![false; positions.len()];
        let direction = if positions.len() > 1 { step.signum() } else { 0.0 };
        Self {
            positions,
            fired,
            direction,
        }
    }

    /// Positions in the closed segment `[from, to]` not yet fired, in
    /// motion order. Motion against the armed direction fires nothing.
    fn cross(&mut self, from: f64, to: f64) -> Vec<(usize, f64)> {
        if (to - from) * self.direction < 0.0 || (from == to && self.direction != 0.0) {
            return Vec::new();
        }
        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
        let tolerance = 1e-9 * (hi - lo).abs().max(1.0);
        let mut crossed: Vec<(usize, f64)> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(i, p)| !self.fired[*i] && **p >= lo - tolerance && **p <= hi + tolerance)
            .map(|(i, p)| (i, *p))
            .collect();
        for (i, _) in &crossed {
            self.fired[*i] = true;
        }
        crossed.sort_by(|a, b| {
            (a.1 - from)
                .abs()
                .partial_cmp(&(b.1 - from).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        crossed
    }
}

#[derive(Debug, Default)]
struct Counters {
    moves: AtomicUsize,
    begin_scans: AtomicUsize,
    trigger_configs: AtomicUsize,
    stops: AtomicUsize,
}

struct Inner {
    unit: Unit,
    position: Observable<Quantity>,
    status: Observable<ManipulatorStatus>,
    state: Mutex<MotionState>,
    default_velocity: f64,
    trigger_resolution: Option<f64>,
    backoff: Option<f64>,
    limits: Option<StageLimits>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    trigger_line: TriggerLine,
    counters: Counters,
}

impl Inner {
    fn superseded(&self, target: f64) -> ScanError {
        DriverError::new(
            DRIVER_TYPE,
            DriverErrorKind::Interrupted,
            format!("move to {} {} was superseded", target, self.unit),
        )
        .into()
    }

    fn current_position(&self, generation: u64, target: f64) -> ScanResult<f64> {
        let state = self.state.lock();
        if state.generation != generation {
            return Err(self.superseded(target));
        }
        Ok(state.position)
    }

    /// Move the simulated carriage to `to`, firing crossed trigger positions.
    fn advance(&self, generation: u64, to: f64, target: f64) -> ScanResult<()> {
        let pulses = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Err(self.superseded(target));
            }
            let from = state.position;
            state.position = to;
            state
                .schedule
                .as_mut()
                .map(|schedule| schedule.cross(from, to))
                .unwrap_or_default()
        };

        self.position.publish(Quantity::new(to, self.unit));
        for (index, position) in pulses {
            self.trigger_line.fire(TriggerPulse {
                index,
                position: Quantity::new(position, self.unit),
            });
        }
        Ok(())
    }

    fn finish_move(&self, generation: u64, target: f64) -> ScanResult<()> {
        {
            let state = self.state.lock();
            if state.generation != generation {
                return Err(self.superseded(target));
            }
        }
        self.status.publish(ManipulatorStatus::TargetReached);
        debug!(target, unit = %self.unit, "mock manipulator reached target");
        Ok(())
    }

    fn resolve_velocity(&self, velocity: Option<Quantity>) -> ScanResult<f64> {
        let value = match velocity {
            None => self.default_velocity,
            Some(v) => match self.unit.per_second() {
                Some(native) => v.value_in(native)?,
                None if v.unit().dimension() == Dimension::Dimensionless => v.value(),
                None => {
                    return Err(DriverError::new(
                        DRIVER_TYPE,
                        DriverErrorKind::InvalidParameter,
                        format!("velocity {} does not apply to unit '{}'", v, self.unit),
                    )
                    .into())
                }
            },
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("velocity must be positive, got {}", value),
            )
            .into());
        }
        Ok(value)
    }
}

// =============================================================================
// MockManipulator
// =============================================================================

/// Simulated manipulator. Clones share the same device.
#[derive(Clone)]
pub struct MockManipulator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockManipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockManipulator")
            .field("unit", &self.inner.unit)
            .field("mode", &self.inner.mode)
            .field("position", &self.inner.position.get())
            .field("status", &self.inner.status.get())
            .finish_non_exhaustive()
    }
}

impl MockManipulator {
    /// Instant-mode manipulator in mm at position 0.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Build from a `[mock.manipulator]` section.
    pub fn with_config(config: &MockManipulatorConfig) -> Self {
        let mut builder = Self::builder()
            .unit(config.unit)
            .initial_position(config.initial_position)
            .velocity(config.velocity)
            .mode(config.mode);
        if let Some(resolution) = config.trigger_resolution {
            builder = builder.trigger_resolution(resolution);
        }
        if let (Some(min), Some(max)) = (config.min_position, config.max_position) {
            builder = builder.limits(StageLimits::hard_stop(min, max));
        }
        if config.failure_rate > 0.0 {
            builder = builder.error_config(ErrorConfig::random_failures_seeded(
                config.failure_rate,
                config.seed,
            ));
        }
        builder.build()
    }

    /// Start configuring a manipulator.
    pub fn builder() -> MockManipulatorBuilder {
        MockManipulatorBuilder::new()
    }

    /// Cable carrying this manipulator's trigger pulses.
    pub fn trigger_line(&self) -> &TriggerLine {
        &self.inner.trigger_line
    }

    /// Armed trigger positions, if any.
    pub fn armed_trigger_positions(&self) -> Option<Vec<f64>> {
        self.inner
            .state
            .lock()
            .schedule
            .as_ref()
            .map(|s| s.positions.clone())
    }

    /// Accepted `move_to` calls
    pub fn move_count(&self) -> usize {
        self.inner.counters.moves.load(Ordering::SeqCst)
    }

    /// Calls to `begin_scan`
    pub fn begin_scan_count(&self) -> usize {
        self.inner.counters.begin_scans.load(Ordering::SeqCst)
    }

    /// Accepted trigger configurations
    pub fn trigger_config_count(&self) -> usize {
        self.inner.counters.trigger_configs.load(Ordering::SeqCst)
    }

    /// Calls to `stop`
    pub fn stop_count(&self) -> usize {
        self.inner.counters.stops.load(Ordering::SeqCst)
    }

    /// Force the reported status, e.g. to simulate a controller fault.
    pub fn inject_status(&self, status: ManipulatorStatus) {
        self.inner.status.publish(status);
    }
}

impl Default for MockManipulator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Manipulator for MockManipulator {
    fn position(&self) -> &Observable<Quantity> {
        &self.inner.position
    }

    fn status(&self) -> &Observable<ManipulatorStatus> {
        &self.inner.status
    }

    fn preferred_unit(&self) -> Unit {
        self.inner.unit
    }

    async fn move_to(&self, target: Quantity, velocity: Option<Quantity>) -> ScanResult<()> {
        let inner = &self.inner;
        inner.error_config.check_operation(DRIVER_TYPE, "move")?;

        let mut target = target.value_in(inner.unit)?;
        if let Some(limits) = &inner.limits {
            target = limits.enforce(target)?;
        }
        let velocity = inner.resolve_velocity(velocity)?;
        inner.counters.moves.fetch_add(1, Ordering::SeqCst);

        let generation = {
            let mut state = inner.state.lock();
            state.generation += 1;
            state.generation
        };
        inner.status.publish(ManipulatorStatus::Moving);
        debug!(target, velocity, unit = %inner.unit, "mock manipulator moving");

        if !inner.mode.is_timed() {
            inner.advance(generation, target, target)?;
            return inner.finish_move(generation, target);
        }

        sleep(inner.timing.communication_delay()).await;
        let tick = inner.timing.tick_interval();
        let max_step = velocity * tick.as_secs_f64();
        loop {
            sleep(tick).await;
            let current = inner.current_position(generation, target)?;
            let remaining = target - current;
            let next = if remaining.abs() <= max_step {
                target
            } else {
                current + max_step * remaining.signum()
            };
            inner.advance(generation, next, target)?;
            if next == target {
                break;
            }
        }

        sleep(inner.timing.settling_time()).await;
        inner.finish_move(generation, target)
    }

    /// Backs off by one trigger resolution step before `start` so the first
    /// pulse fires while already moving.
    async fn begin_scan(
        &self,
        start: Quantity,
        stop: Quantity,
        velocity: Option<Quantity>,
    ) -> ScanResult<()> {
        let inner = &self.inner;
        inner.counters.begin_scans.fetch_add(1, Ordering::SeqCst);

        let start = start.value_in(inner.unit)?;
        let stop = stop.value_in(inner.unit)?;
        let direction = if stop >= start { 1.0 } else { -1.0 };
        let backoff = inner
            .backoff
            .or(inner.trigger_resolution)
            .unwrap_or(0.0)
            .abs();

        self.move_to(Quantity::new(start - direction * backoff, inner.unit), velocity)
            .await
    }

    async fn configure_trigger(&self, params: TriggerParams) -> ScanResult<TriggerParams> {
        let inner = &self.inner;
        inner
            .error_config
            .check_operation(DRIVER_TYPE, "configure_trigger")?;
        inner.counters.trigger_configs.fetch_add(1, Ordering::SeqCst);

        let mut step = params.step.value_in(inner.unit)?;
        let mut start = params.start.value_in(inner.unit)?;
        let stop = params.stop.value_in(inner.unit)?;
        if step == 0.0 || !step.is_finite() {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                "trigger step must be non-zero",
            )
            .into());
        }

        let intervals = ((stop - start) / step + 1e-9).floor();
        if intervals < 0.0 {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("trigger step {} points away from stop {}", step, stop),
            )
            .into());
        }

        if let Some(resolution) = inner.trigger_resolution.filter(|r| *r > 0.0) {
            let quantized = (step / resolution).round() * resolution;
            step = if quantized == 0.0 {
                resolution * step.signum()
            } else {
                quantized
            };
            start = (start / resolution).round() * resolution;
        }

        let positions: Vec<f64> = (0..=intervals as usize)
            .map(|i| start + i as f64 * step)
            .collect();
        let stop = start + intervals * step;
        info!(
            start,
            stop,
            step,
            pulses = positions.len(),
            unit = %inner.unit,
            "mock manipulator trigger armed"
        );
        inner.state.lock().schedule = Some(TriggerSchedule::new(positions, step));

        Ok(TriggerParams {
            step: Quantity::new(step, inner.unit),
            start: Quantity::new(start, inner.unit),
            stop: Quantity::new(stop, inner.unit),
        })
    }

    async fn wait_for_target_reached(&self, timeout: Option<Duration>) -> ScanResult<()> {
        let mut rx = self.inner.status.subscribe();
        let wait = async move {
            loop {
                let status = *rx.borrow_and_update();
                if status.is_settled() {
                    return Ok(());
                }
                if status == ManipulatorStatus::Error {
                    return Err(ScanError::from(DriverError::new(
                        DRIVER_TYPE,
                        DriverErrorKind::Hardware,
                        "controller reported error status",
                    )));
                }
                if rx.changed().await.is_err() {
                    return Err(ScanError::from(DriverError::new(
                        DRIVER_TYPE,
                        DriverErrorKind::Shutdown,
                        "status channel closed",
                    )));
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ScanError::Timeout {
                    operation: "manipulator target reached".to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => wait.await,
        }
    }

    fn stop(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            state.generation += 1;
            state.schedule = None;
        }
        inner.counters.stops.fetch_add(1, Ordering::SeqCst);
        inner.status.publish(ManipulatorStatus::Stopped);
        debug!("mock manipulator stopped");
    }
}

impl Describe for MockManipulator {
    fn describe(&self) -> ComponentDescription {
        ComponentDescription::new("MockManipulator")
            .attribute(&self.inner.position)
            .attribute(&self.inner.status)
            .action("move_to", "Move to an absolute position")
            .action("stop", "Halt motion and disarm the trigger output")
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockManipulator with fluent API
pub struct MockManipulatorBuilder {
    unit: Unit,
    initial_position: f64,
    velocity: f64,
    trigger_resolution: Option<f64>,
    backoff: Option<f64>,
    limits: Option<StageLimits>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    trigger_line: Option<TriggerLine>,
}

impl MockManipulatorBuilder {
    /// Instant-mode defaults in mm.
    pub fn new() -> Self {
        Self {
            unit: MILLIMETER,
            initial_position: 0.0,
            velocity: default_velocity(),
            trigger_resolution: None,
            backoff: None,
            limits: None,
            mode: MockMode::Instant,
            timing: TimingConfig::manipulator(),
            error_config: ErrorConfig::none(),
            trigger_line: None,
        }
    }

    /// Native unit
    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Initial position in native units
    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    /// Default velocity in native units per second
    pub fn velocity(mut self, velocity: f64) -> Self {
        self.velocity = velocity;
        self
    }

    /// Quantize trigger positions and steps to multiples of `resolution`
    pub fn trigger_resolution(mut self, resolution: f64) -> Self {
        self.trigger_resolution = Some(resolution);
        self
    }

    /// Distance `begin_scan` backs off before the start position
    /// (default: the trigger resolution)
    pub fn backoff(mut self, distance: f64) -> Self {
        self.backoff = Some(distance);
        self
    }

    /// Restrict the travel range
    pub fn limits(mut self, limits: StageLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Instant or timed motion
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the simulated delays
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Inject failures
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Share an existing trigger cable
    pub fn trigger_line(mut self, line: TriggerLine) -> Self {
        self.trigger_line = Some(line);
        self
    }

    /// Create the manipulator.
    pub fn build(self) -> MockManipulator {
        let unit_symbol = self.unit.symbol();
        let position = Observable::new(
            "position",
            Quantity::new(self.initial_position, self.unit),
        )
        .with_description("Manipulator position")
        .with_units(unit_symbol)
        .with_dtype("quantity")
        .read_only();
        let status = Observable::new("status", ManipulatorStatus::TargetReached)
            .with_description("Motion status")
            .with_dtype("enum")
            .read_only();

        MockManipulator {
            inner: Arc::new(Inner {
                unit: self.unit,
                position,
                status,
                state: Mutex::new(MotionState {
                    position: self.initial_position,
                    generation: 0,
                    schedule: None,
                }),
                default_velocity: self.velocity,
                trigger_resolution: self.trigger_resolution,
                backoff: self.backoff,
                limits: self.limits,
                mode: self.mode,
                timing: self.timing,
                error_config: self.error_config,
                trigger_line: self.trigger_line.unwrap_or_default(),
                counters: Counters::default(),
            }),
        }
    }
}

impl Default for MockManipulatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use scan_core::data::Axis;
    use scan_core::units::{DEGREE, MICROMETER, MILLIMETER_PER_SECOND, PICOSECOND};

    fn mm(value: f64) -> Quantity {
        Quantity::new(value, MILLIMETER)
    }

    #[tokio::test]
    async fn test_instant_move_updates_position_and_status() {
        let stage = MockManipulator::new();
        stage.move_to(mm(10.0), None).await.unwrap();
        assert_eq!(stage.position().get(), mm(10.0));
        assert_eq!(stage.status().get(), ManipulatorStatus::TargetReached);
        assert_eq!(stage.move_count(), 1);
    }

    #[tokio::test]
    async fn test_move_converts_units() {
        let stage = MockManipulator::new();
        stage
            .move_to(Quantity::new(2500.0, MICROMETER), None)
            .await
            .unwrap();
        assert_eq!(stage.position().get(), mm(2.5));

        let err = stage
            .move_to(Quantity::new(1.0, DEGREE), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Unit(_)));
    }

    #[tokio::test]
    async fn test_limits_hard_stop_and_clamp() {
        let stage = MockManipulator::builder()
            .limits(StageLimits::hard_stop(0.0, 100.0))
            .build();
        assert!(stage.move_to(mm(50.0), None).await.is_ok());
        assert!(stage.move_to(mm(150.0), None).await.is_err());

        let stage = MockManipulator::builder()
            .limits(StageLimits::clamp(0.0, 100.0))
            .build();
        stage.move_to(mm(-10.0), None).await.unwrap();
        assert_eq!(stage.position().get(), mm(0.0));
    }

    #[tokio::test]
    async fn test_velocity_validation() {
        let stage = MockManipulator::new();
        assert!(stage
            .move_to(mm(1.0), Some(Quantity::new(5.0, MILLIMETER_PER_SECOND)))
            .await
            .is_ok());
        assert!(stage
            .move_to(mm(2.0), Some(Quantity::new(-5.0, MILLIMETER_PER_SECOND)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_realistic_move_publishes_intermediate_positions() {
        let stage = MockManipulator::builder()
            .mode(MockMode::Realistic)
            .velocity(100.0)
            .build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _guard = stage.position().observe(move |q: &Quantity| s.lock().push(q.value()));

        stage.move_to(mm(5.0), None).await.unwrap();

        let seen = seen.lock();
        assert!(seen.len() > 2, "expected several ticks, got {:?}", *seen);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(5.0));
    }

    #[tokio::test]
    async fn test_new_move_preempts_pending_move() {
        let stage = MockManipulator::builder()
            .mode(MockMode::Realistic)
            .velocity(10.0)
            .build();

        let first = {
            let stage = stage.clone();
            tokio::spawn(async move { stage.move_to(mm(100.0), None).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        stage.move_to(mm(0.5), None).await.unwrap();

        let err = first.await.unwrap().unwrap_err();
        match err {
            ScanError::Driver(e) => assert_eq!(e.kind, DriverErrorKind::Interrupted),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stage.position().get(), mm(0.5));
        assert_eq!(stage.status().get(), ManipulatorStatus::TargetReached);
    }

    #[tokio::test]
    async fn test_stop_interrupts_and_counts() {
        let stage = MockManipulator::builder()
            .mode(MockMode::Realistic)
            .velocity(10.0)
            .build();
        let pending = {
            let stage = stage.clone();
            tokio::spawn(async move { stage.move_to(mm(100.0), None).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;

        stage.stop();
        assert!(pending.await.unwrap().is_err());
        assert_eq!(stage.stop_count(), 1);
        assert_eq!(stage.status().get(), ManipulatorStatus::Stopped);
        assert!(stage.position().get().value() < 100.0);

        // Safe when idle
        stage.stop();
        assert_eq!(stage.stop_count(), 2);
    }

    #[tokio::test]
    async fn test_trigger_quantization() {
        let stage = MockManipulator::builder().trigger_resolution(0.3).build();
        let realized = stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(0.1),
                stop: mm(4.1),
            })
            .await
            .unwrap();

        assert!((realized.step.value() - 0.9).abs() < 1e-9);
        assert!(realized.start.value().abs() < 1e-9);
        assert!((realized.stop.value() - 3.6).abs() < 1e-9);
        assert_eq!(stage.armed_trigger_positions().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_configure_trigger_axis_in_request_unit() {
        let stage = MockManipulator::new();
        let axis = Axis::new(vec![0.0, 500.0, 1000.0], MICROMETER);
        let realized = stage.configure_trigger_axis(&axis).await.unwrap();
        assert_eq!(realized.unit(), MICROMETER);
        assert_eq!(realized.values(), &[0.0, 500.0, 1000.0]);
    }

    #[tokio::test]
    async fn test_pulses_fire_once_per_arming() {
        let stage = MockManipulator::new();
        let mut rx = stage.trigger_line().subscribe();
        stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(1.0),
                stop: mm(3.0),
            })
            .await
            .unwrap();

        stage.move_to(mm(5.0), None).await.unwrap();
        stage.move_to(mm(0.0), None).await.unwrap();
        stage.move_to(mm(5.0), None).await.unwrap();

        let mut pulses = Vec::new();
        while let Ok(pulse) = rx.try_recv() {
            pulses.push(pulse.position.value());
        }
        assert_eq!(pulses, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_motion_against_armed_direction_fires_nothing() {
        let stage = MockManipulator::builder().initial_position(5.0).build();
        let mut rx = stage.trigger_line().subscribe();
        stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(1.0),
                stop: mm(3.0),
            })
            .await
            .unwrap();

        // Backing off through the armed positions leaves them armed
        stage.move_to(mm(0.0), None).await.unwrap();
        assert!(rx.try_recv().is_err());

        stage.move_to(mm(4.0), None).await.unwrap();
        let indices: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_single_position_schedule_fires_either_way() {
        let stage = MockManipulator::builder().initial_position(5.0).build();
        let mut rx = stage.trigger_line().subscribe();
        stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(2.0),
                stop: mm(2.0),
            })
            .await
            .unwrap();
        stage.move_to(mm(0.0), None).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().position, mm(2.0));
    }

    #[tokio::test]
    async fn test_descending_pulses_in_motion_order() {
        let stage = MockManipulator::builder().initial_position(10.0).build();
        let mut rx = stage.trigger_line().subscribe();
        stage
            .configure_trigger(TriggerParams {
                step: mm(-2.0),
                start: mm(8.0),
                stop: mm(4.0),
            })
            .await
            .unwrap();
        stage.move_to(mm(0.0), None).await.unwrap();

        let indices: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stop_disarms_trigger() {
        let stage = MockManipulator::new();
        stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(0.0),
                stop: mm(2.0),
            })
            .await
            .unwrap();
        assert!(stage.armed_trigger_positions().is_some());
        stage.stop();
        assert!(stage.armed_trigger_positions().is_none());
    }

    #[tokio::test]
    async fn test_begin_scan_backs_off_against_direction() {
        let stage = MockManipulator::builder().backoff(0.5).build();
        stage.begin_scan(mm(2.0), mm(8.0), None).await.unwrap();
        assert_eq!(stage.position().get(), mm(1.5));

        stage.begin_scan(mm(8.0), mm(2.0), None).await.unwrap();
        assert_eq!(stage.position().get(), mm(8.5));
        assert_eq!(stage.begin_scan_count(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_target_reached_timeout_and_error() {
        let stage = MockManipulator::new();
        stage.inject_status(ManipulatorStatus::Moving);
        let err = stage
            .wait_for_target_reached(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));

        stage.inject_status(ManipulatorStatus::Error);
        let err = stage.wait_for_target_reached(None).await.unwrap_err();
        assert!(matches!(err, ScanError::Driver(_)));

        stage.inject_status(ManipulatorStatus::Stopped);
        stage.wait_for_target_reached(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_injection() {
        let stage = MockManipulator::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "move",
                count: 1,
            }))
            .build();
        assert!(stage.move_to(mm(1.0), None).await.is_ok());
        assert!(matches!(
            stage.move_to(mm(2.0), None).await,
            Err(ScanError::Driver(_))
        ));
    }

    #[tokio::test]
    async fn test_time_unit_manipulator_accepts_default_velocity() {
        let delay = MockManipulator::builder().unit(PICOSECOND).build();
        delay
            .move_to(Quantity::new(-3.0, PICOSECOND), None)
            .await
            .unwrap();
        assert_eq!(delay.position().get().unit(), PICOSECOND);
    }

    #[test]
    fn test_config_deserializes() {
        let config: MockManipulatorConfig = toml::from_str(
            r#"
            unit = "deg"
            velocity = 45.0
            trigger_resolution = 0.01
            mode = "realistic"
            "#,
        )
        .unwrap();
        assert_eq!(config.unit, DEGREE);
        assert_eq!(config.mode, MockMode::Realistic);

        let stage = MockManipulator::with_config(&config);
        assert_eq!(stage.preferred_unit(), DEGREE);
    }

    #[test]
    fn test_describe_lists_attributes() {
        let desc = MockManipulator::new().describe();
        assert!(desc.find_attribute("position").is_some());
        assert!(desc.find_attribute("status").is_some());
        assert!(desc.actions.iter().any(|a| a.name == "stop"));
    }
}
