//! Mock acquisition device.
//!
//! Two acquisition modes:
//! - **Scalar**: every `read_data_set` returns one 0-d sample computed from
//!   the followed manipulator position (or a running sample index).
//! - **Triggered**: between `start` and `stop` one sample is recorded per
//!   [`TriggerPulse`] received on a [`TriggerLine`]; `read_data_set` returns
//!   them as a 1-d dataset over a sample-index axis.
//!
//! Sample-count faults are configurable (`missing_samples`,
//! `extra_samples`) to exercise the scan engine's reconciliation.

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::trigger_line::{TriggerLine, TriggerPulse};
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::DataSource;
use scan_core::data::{Axis, DataSet};
use scan_core::describe::{ComponentDescription, Describe};
use scan_core::error::{ScanError, ScanResult};
use scan_core::observable::Observable;
use scan_core::units::{Quantity, Unit, VOLT};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

const DRIVER_TYPE: &str = "mock_data_source";

/// Maps a position (or sample index) to a signal value.
pub type Signal = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// How the mock produces samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// One sample per read from the followed position
    #[default]
    Scalar,
    /// One sample per trigger pulse between `start` and `stop`
    Triggered,
}

/// Configuration for [`MockDataSource`] (`[mock.data_source]`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MockDataSourceConfig {
    /// Scalar reads or trigger-collected samples
    #[serde(default)]
    pub acquisition: AcquisitionMode,

    /// Sample unit (default: V)
    #[serde(default = "default_unit")]
    pub unit: Unit,

    /// Instant or timed responses
    #[serde(default)]
    pub mode: MockMode,

    /// Uniform noise amplitude added to each sample
    #[serde(default)]
    pub noise_amplitude: f64,

    /// Noise seed (random if unset)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Samples dropped from the end of every triggered read
    #[serde(default)]
    pub missing_samples: usize,

    /// Samples appended to every triggered read
    #[serde(default)]
    pub extra_samples: usize,
}

fn default_unit() -> Unit {
    VOLT
}

impl Default for MockDataSourceConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionMode::Scalar,
            unit: default_unit(),
            mode: MockMode::Instant,
            noise_amplitude: 0.0,
            seed: None,
            missing_samples: 0,
            extra_samples: 0,
        }
    }
}

#[derive(Debug, Default)]
struct AcquisitionState {
    receiver: Option<broadcast::Receiver<TriggerPulse>>,
    samples: Vec<f64>,
}

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
    reads: AtomicUsize,
}

struct Inner {
    acquisition: AcquisitionMode,
    unit: Unit,
    signal: Signal,
    noise_amplitude: f64,
    rng: MockRng,
    missing_samples: usize,
    extra_samples: usize,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    trigger_line: Option<TriggerLine>,
    follow: Option<Observable<Quantity>>,
    acquiring: Observable<bool>,
    state: Mutex<AcquisitionState>,
    sample_index: AtomicU64,
    counters: Counters,
}

impl Inner {
    fn sample(&self, x: f64) -> f64 {
        (self.signal)(x) + self.rng.noise(self.noise_amplitude)
    }

    /// Convert pending pulses into samples.
    fn drain_pulses(&self, state: &mut AcquisitionState) {
        let Some(receiver) = state.receiver.as_mut() else {
            return;
        };
        loop {
            match receiver.try_recv() {
                Ok(pulse) => {
                    let value = self.sample(pulse.position.value());
                    state.samples.push(value);
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "mock data source lost trigger pulses");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

/// Simulated acquisition device. Clones share the same device.
#[derive(Clone)]
pub struct MockDataSource {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDataSource")
            .field("acquisition", &self.inner.acquisition)
            .field("unit", &self.inner.unit)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl MockDataSource {
    /// Scalar source returning the sample index.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a data source.
    pub fn builder() -> MockDataSourceBuilder {
        MockDataSourceBuilder::new()
    }

    /// Build from configuration; `trigger_line` and `follow` wire the source
    /// to a manipulator.
    pub fn with_config(
        config: &MockDataSourceConfig,
        trigger_line: Option<TriggerLine>,
        follow: Option<Observable<Quantity>>,
    ) -> Self {
        let mut builder = Self::builder()
            .acquisition(config.acquisition)
            .unit(config.unit)
            .mode(config.mode)
            .noise(config.noise_amplitude, config.seed)
            .missing_samples(config.missing_samples)
            .extra_samples(config.extra_samples);
        let triggered = config.acquisition == AcquisitionMode::Triggered;
        if let Some(line) = trigger_line.filter(|_| triggered) {
            builder = builder.trigger_line(line);
        }
        if let Some(position) = follow {
            builder = builder.follow(position);
        }
        builder.build()
    }

    /// Calls to `start`
    pub fn start_count(&self) -> usize {
        self.inner.counters.starts.load(Ordering::SeqCst)
    }

    /// Calls to `stop`
    pub fn stop_count(&self) -> usize {
        self.inner.counters.stops.load(Ordering::SeqCst)
    }

    /// Calls to `read_data_set`
    pub fn read_count(&self) -> usize {
        self.inner.counters.reads.load(Ordering::SeqCst)
    }

    /// Whether acquisition is armed
    pub fn is_acquiring(&self) -> bool {
        self.inner.acquiring.get()
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn start(&self, axis_hint: Option<&Axis>) -> ScanResult<()> {
        let inner = &self.inner;
        inner.error_config.check_operation(DRIVER_TYPE, "start")?;
        inner.counters.starts.fetch_add(1, Ordering::SeqCst);

        if inner.acquisition == AcquisitionMode::Triggered {
            let Some(line) = &inner.trigger_line else {
                return Err(ScanError::configuration(
                    "triggered acquisition requires a trigger line",
                ));
            };
            let mut state = inner.state.lock();
            state.samples.clear();
            if let Some(hint) = axis_hint {
                state.samples.reserve(hint.len());
            }
            state.receiver = Some(line.subscribe());
        }

        inner.acquiring.publish(true);
        debug!(
            acquisition = ?inner.acquisition,
            expected = ?axis_hint.map(Axis::len),
            "mock data source started"
        );
        Ok(())
    }

    async fn stop(&self) -> ScanResult<()> {
        let inner = &self.inner;
        inner.counters.stops.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = inner.state.lock();
            inner.drain_pulses(&mut state);
            state.receiver = None;
        }
        inner.acquiring.publish(false);
        debug!("mock data source stopped");
        Ok(())
    }

    async fn read_data_set(&self) -> ScanResult<DataSet> {
        let inner = &self.inner;
        inner.counters.reads.fetch_add(1, Ordering::SeqCst);
        inner.error_config.check_operation(DRIVER_TYPE, "read")?;
        if inner.mode.is_timed() {
            tokio::time::sleep(inner.timing.communication_delay()).await;
        }

        match inner.acquisition {
            AcquisitionMode::Scalar => {
                let index = inner.sample_index.fetch_add(1, Ordering::SeqCst);
                let x = inner
                    .follow
                    .as_ref()
                    .map(|position| position.get().value())
                    .unwrap_or(index as f64);
                Ok(DataSet::scalar(Quantity::new(inner.sample(x), inner.unit)))
            }
            AcquisitionMode::Triggered => {
                let mut samples = {
                    let mut state = inner.state.lock();
                    inner.drain_pulses(&mut state);
                    state.samples.clone()
                };
                let keep = samples.len().saturating_sub(inner.missing_samples);
                samples.truncate(keep);
                let last = samples.last().copied().unwrap_or(0.0);
                samples.extend(std::iter::repeat(last).take(inner.extra_samples));

                let len = samples.len();
                DataSet::from_vec(samples, inner.unit, Axis::index(len))
            }
        }
    }
}

impl Describe for MockDataSource {
    fn describe(&self) -> ComponentDescription {
        ComponentDescription::new("MockDataSource")
            .attribute(&self.inner.acquiring)
            .action("start", "Arm acquisition")
            .action("stop", "Disarm acquisition")
            .action("read_data_set", "Return the acquired samples")
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`MockDataSource`].
pub struct MockDataSourceBuilder {
    acquisition: AcquisitionMode,
    unit: Unit,
    signal: Signal,
    noise_amplitude: f64,
    seed: Option<u64>,
    missing_samples: usize,
    extra_samples: usize,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    trigger_line: Option<TriggerLine>,
    follow: Option<Observable<Quantity>>,
}

impl MockDataSourceBuilder {
    /// Scalar source in V without noise.
    pub fn new() -> Self {
        Self {
            acquisition: AcquisitionMode::Scalar,
            unit: default_unit(),
            signal: Arc::new(|x| x),
            noise_amplitude: 0.0,
            seed: None,
            missing_samples: 0,
            extra_samples: 0,
            mode: MockMode::Instant,
            timing: TimingConfig::detector(),
            error_config: ErrorConfig::none(),
            trigger_line: None,
            follow: None,
        }
    }

    /// Select scalar or triggered acquisition.
    pub fn acquisition(mut self, acquisition: AcquisitionMode) -> Self {
        self.acquisition = acquisition;
        self
    }

    /// Triggered acquisition from `line`
    pub fn trigger_line(mut self, line: TriggerLine) -> Self {
        self.trigger_line = Some(line);
        self.acquisition = AcquisitionMode::Triggered;
        self
    }

    /// Scalar samples evaluate the signal at this position
    pub fn follow(mut self, position: Observable<Quantity>) -> Self {
        self.follow = Some(position);
        self
    }

    /// Sample unit
    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Map the followed position to a sample value.
    pub fn signal<F>(mut self, signal: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.signal = Arc::new(signal);
        self
    }

    /// Add uniform noise of `amplitude`.
    pub fn noise(mut self, amplitude: f64, seed: Option<u64>) -> Self {
        self.noise_amplitude = amplitude;
        self.seed = seed;
        self
    }

    /// Drop `count` samples from each triggered read.
    pub fn missing_samples(mut self, count: usize) -> Self {
        self.missing_samples = count;
        self
    }

    /// Append `count` extra samples to each triggered read.
    pub fn extra_samples(mut self, count: usize) -> Self {
        self.extra_samples = count;
        self
    }

    /// Instant or timed responses
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

    /// Create the data source.
    pub fn build(self) -> MockDataSource {
        let acquiring = Observable::new("acquiring", false)
            .with_description("Acquisition armed")
            .with_dtype("bool")
            .read_only();
        MockDataSource {
            inner: Arc::new(Inner {
                acquisition: self.acquisition,
                unit: self.unit,
                signal: self.signal,
                noise_amplitude: self.noise_amplitude,
                rng: MockRng::new(self.seed),
                missing_samples: self.missing_samples,
                extra_samples: self.extra_samples,
                mode: self.mode,
                timing: self.timing,
                error_config: self.error_config,
                trigger_line: self.trigger_line,
                follow: self.follow,
                acquiring,
                state: Mutex::new(AcquisitionState::default()),
                sample_index: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }
}

impl Default for MockDataSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use crate::MockManipulator;
    use scan_core::capabilities::{Manipulator, TriggerParams};
    use scan_core::units::{COUNTS, MILLIMETER};

    fn mm(value: f64) -> Quantity {
        Quantity::new(value, MILLIMETER)
    }

    #[tokio::test]
    async fn test_scalar_reads_sample_index() {
        let source = MockDataSource::new();
        let a = source.read_data_set().await.unwrap();
        let b = source.read_data_set().await.unwrap();
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.get(&[]), Some(Quantity::new(0.0, VOLT)));
        assert_eq!(b.get(&[]), Some(Quantity::new(1.0, VOLT)));
        assert_eq!(source.read_count(), 2);
    }

    #[tokio::test]
    async fn test_scalar_follows_manipulator() {
        let stage = MockManipulator::new();
        let source = MockDataSource::builder()
            .follow(stage.position().clone())
            .signal(|x| 2.0 * x)
            .unit(COUNTS)
            .build();

        stage.move_to(mm(3.0), None).await.unwrap();
        let ds = source.read_data_set().await.unwrap();
        assert_eq!(ds.get(&[]), Some(Quantity::new(6.0, COUNTS)));
    }

    #[tokio::test]
    async fn test_triggered_collects_pulses_between_start_and_stop() {
        let stage = MockManipulator::new();
        let source = MockDataSource::builder()
            .trigger_line(stage.trigger_line().clone())
            .build();

        stage
            .configure_trigger(TriggerParams {
                step: mm(1.0),
                start: mm(0.0),
                stop: mm(4.0),
            })
            .await
            .unwrap();
        source.start(None).await.unwrap();
        assert!(source.is_acquiring());
        stage.move_to(mm(5.0), None).await.unwrap();
        source.stop().await.unwrap();

        // Pulses after stop are not recorded
        stage.move_to(mm(-1.0), None).await.unwrap();

        let ds = source.read_data_set().await.unwrap();
        assert_eq!(ds.shape(), &[5]);
        assert_eq!(ds.axes()[0], Axis::index(5));
        assert_eq!(ds.get(&[4]), Some(Quantity::new(4.0, VOLT)));
        assert!(!source.is_acquiring());
    }

    #[tokio::test]
    async fn test_missing_and_extra_samples() {
        for (missing, extra, expected) in [(1, 0, 4), (0, 1, 6)] {
            let stage = MockManipulator::new();
            let source = MockDataSource::builder()
                .trigger_line(stage.trigger_line().clone())
                .missing_samples(missing)
                .extra_samples(extra)
                .build();
            stage
                .configure_trigger(TriggerParams {
                    step: mm(1.0),
                    start: mm(0.0),
                    stop: mm(4.0),
                })
                .await
                .unwrap();
            source.start(None).await.unwrap();
            stage.move_to(mm(4.0), None).await.unwrap();
            source.stop().await.unwrap();

            let ds = source.read_data_set().await.unwrap();
            assert_eq!(ds.shape(), &[expected]);
        }
    }

    #[tokio::test]
    async fn test_triggered_without_line_fails_to_start() {
        let source = MockDataSource::builder()
            .acquisition(AcquisitionMode::Triggered)
            .build();
        assert!(matches!(
            source.start(None).await,
            Err(ScanError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_is_safe_when_idle() {
        let source = MockDataSource::new();
        source.stop().await.unwrap();
        source.stop().await.unwrap();
        assert_eq!(source.stop_count(), 2);
    }

    #[tokio::test]
    async fn test_seeded_noise_is_reproducible() {
        let a = MockDataSource::builder().noise(0.1, Some(3)).build();
        let b = MockDataSource::builder().noise(0.1, Some(3)).build();
        let va = a.read_data_set().await.unwrap().get(&[]).unwrap();
        let vb = b.read_data_set().await.unwrap().get(&[]).unwrap();
        assert_eq!(va, vb);
        assert!(va.value().abs() < 0.1);
    }

    #[tokio::test]
    async fn test_read_error_injection() {
        let source = MockDataSource::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout { operation: "read" }))
            .build();
        assert!(matches!(
            source.read_data_set().await,
            Err(ScanError::Driver(_))
        ));
    }
}
