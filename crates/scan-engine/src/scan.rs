//! Scan orchestration.
//!
//! [`Scan`] drives one [`Manipulator`] and one [`DataSource`] through a sweep
//! and assembles the result into a [`DataSet`] whose leading axis holds the
//! manipulator positions.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──read_data_set()──▶ Active ──(success | error | stop())──▶ Idle
//! ```
//!
//! Cleanup always runs on the way back to Idle: the data source is stopped,
//! the manipulator is halted and, if requested, a retract move is spawned.
//!
//! # Example
//!
//! ```rust,ignore
//! let scan = Scan::new(stage.clone(), detector.clone(), ScanConfig::new(
//!     "0 mm".parse()?, "10 mm".parse()?, "2 mm".parse()?,
//! ));
//! let data = scan.read_data_set().await?;
//! assert_eq!(data.shape()[0], 5);
//! ```

use crate::axis::SweepPlan;
use crate::callbacks::DatasetCallbacks;
use crate::config::ScanConfig;
use crate::run_state::RunState;
use crate::{continuous, stepped};
use async_trait::async_trait;
use parking_lot::RwLock;
use scan_core::capabilities::{DataSource, Manipulator};
use scan_core::data::{Axis, DataSet};
use scan_core::describe::{ComponentDescription, Describe};
use scan_core::error::{ScanError, ScanResult};
use scan_core::observable::Observable;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A one-dimensional sweep of a manipulator with acquisition at each
/// position.
pub struct Scan {
    manipulator: Arc<dyn Manipulator>,
    data_source: Arc<dyn DataSource>,
    config: RwLock<ScanConfig>,
    run: Arc<RunState>,
    callbacks: DatasetCallbacks,
}

impl Scan {
    /// Scan `manipulator` with acquisition from `data_source`.
    pub fn new(
        manipulator: Arc<dyn Manipulator>,
        data_source: Arc<dyn DataSource>,
        config: ScanConfig,
    ) -> Self {
        Self {
            manipulator,
            data_source,
            config: RwLock::new(config),
            run: Arc::new(RunState::new()),
            callbacks: DatasetCallbacks::new(),
        }
    }

    /// Scan with [`ScanConfig::for_manipulator`] defaults.
    pub fn for_manipulator(
        manipulator: Arc<dyn Manipulator>,
        data_source: Arc<dyn DataSource>,
    ) -> Self {
        let config = ScanConfig::for_manipulator(manipulator.as_ref());
        Self::new(manipulator, data_source, config)
    }

    /// Configuration used by the next run
    pub fn config(&self) -> ScanConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; takes effect at the next run.
    pub fn set_config(&self, config: ScanConfig) {
        *self.config.write() = config;
    }

    /// Swept manipulator
    pub fn manipulator(&self) -> &Arc<dyn Manipulator> {
        &self.manipulator
    }

    /// Data source read at each position
    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    /// Fraction of the current sweep completed.
    pub fn progress(&self) -> &Observable<f64> {
        self.run.progress()
    }

    /// Whether a sweep is in flight, as an observable
    pub fn active(&self) -> &Observable<bool> {
        self.run.active()
    }

    /// Whether a sweep is in flight
    pub fn is_active(&self) -> bool {
        self.run.is_active()
    }

    /// Register a callback invoked with every completed dataset.
    pub fn add_dataset_callback<F>(&self, callback: F)
    where
        F: Fn(&DataSet) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.add(callback);
    }

    /// Cancel the in-flight sweep. No-op when idle.
    pub fn stop(&self) {
        self.run.cancel();
    }

    /// Handle of the last retract move, if one was spawned and not yet taken.
    pub fn take_retract_task(&self) -> Option<JoinHandle<ScanResult<()>>> {
        self.run.take_retract_task()
    }

    /// Run one sweep and return the assembled dataset.
    ///
    /// Fails with [`ScanError::InvalidState`] if a sweep is already running
    /// on this instance and with [`ScanError::Cancelled`] if [`Scan::stop`]
    /// is called before it completes.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()), err)]
    pub async fn read_data_set(&self) -> ScanResult<DataSet> {
        let config = self.config();
        let retract = config
            .retract_at_end
            .then_some(config.positioning_velocity);
        let mut guard = self.run.try_begin(
            vec![self.manipulator.clone()],
            self.data_source.clone(),
            retract,
        )?;

        let result = tokio::select! {
            biased;
            _ = guard.cancelled() => Err(ScanError::Cancelled),
            result = self.sweep(&config) => result,
        };

        if let Ok(data_set) = &result {
            info!(shape = ?data_set.shape(), "scan complete");
            self.callbacks.notify(data_set);
        }

        let cleanup = guard.finish().await;
        match (result, cleanup) {
            (Ok(data_set), Ok(())) => Ok(data_set),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!(error = %cleanup_err, "data source stop failed during cleanup");
                Err(e)
            }
        }
    }

    async fn sweep(&self, config: &ScanConfig) -> ScanResult<DataSet> {
        self.data_source.stop().await?;
        self.manipulator
            .wait_for_target_reached(config.settle_timeout)
            .await?;

        let plan = SweepPlan::from_config(config)?;
        if let Some(first) = plan.axis.first() {
            self.run
                .set_retract_target(SweepPlan::retract_target(first, plan.overscan)?);
        }
        info!(
            points = plan.axis.len(),
            unit = %plan.axis.unit(),
            continuous = config.continuous_scan,
            "starting sweep"
        );

        if config.continuous_scan {
            continuous::sweep(
                self.manipulator.as_ref(),
                self.data_source.as_ref(),
                config,
                &plan,
                &self.run,
            )
            .await
        } else {
            stepped::sweep(
                self.manipulator.as_ref(),
                self.data_source.as_ref(),
                &plan.axis,
                config.scan_velocity,
                Some(self.run.progress()),
                |_| {},
            )
            .await
        }
    }
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("config", &*self.config.read())
            .field("active", &self.is_active())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

/// A scan is itself a data source, so scans nest into multi-axis sweeps.
#[async_trait]
impl DataSource for Scan {
    async fn start(&self, _axis_hint: Option<&Axis>) -> ScanResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ScanResult<()> {
        Scan::stop(self);
        Ok(())
    }

    async fn read_data_set(&self) -> ScanResult<DataSet> {
        Scan::read_data_set(self).await
    }
}

impl Describe for Scan {
    fn describe(&self) -> ComponentDescription {
        ComponentDescription::new("Scan")
            .attribute(self.run.progress())
            .attribute(self.run.active())
            .action("read_data_set", "Run one sweep and return the dataset")
            .action("stop", "Cancel the running sweep")
    }
}
