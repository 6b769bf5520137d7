//! Sweeps over a table of labelled positions, optionally nested inside
//! outer loops of further manipulators.

use crate::callbacks::DatasetCallbacks;
use crate::run_state::RunState;
use crate::stepped;
use crate::table::PositionTable;
use async_trait::async_trait;
use parking_lot::RwLock;
use scan_core::capabilities::{DataSource, Manipulator};
use scan_core::data::{Axis, DataSet};
use scan_core::describe::{ComponentDescription, Describe};
use scan_core::error::{ScanError, ScanResult};
use scan_core::observable::Observable;
use scan_core::units::{Quantity, Unit};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Parameters of a [`TabularScan`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularScanConfig {
    /// Velocity for moves between table entries
    #[serde(default)]
    pub scan_velocity: Option<Quantity>,

    /// Velocity for outer-loop moves and the retract
    #[serde(default)]
    pub positioning_velocity: Option<Quantity>,

    /// Move back to the first entry after the sweep
    #[serde(default)]
    pub retract_at_end: bool,

    /// Bound for the initial wait on each manipulator
    #[serde(default, with = "humantime_serde")]
    pub settle_timeout: Option<Duration>,

    /// Unit of bare numbers in the table (manipulator preferred unit if unset)
    #[serde(default)]
    pub table_unit: Option<Unit>,
}

struct OuterLoop {
    manipulator: Arc<dyn Manipulator>,
    axis: Axis,
}

/// Stepped scan over the entries of a [`PositionTable`].
///
/// With outer loops the result is a nested Cartesian sweep: for every
/// combination of outer positions the whole table is visited, and the
/// dataset axes are `[outer_k, ..., outer_1, table, ...]`.
pub struct TabularScan {
    manipulator: Arc<dyn Manipulator>,
    data_source: Arc<dyn DataSource>,
    table: PositionTable,
    config: RwLock<TabularScanConfig>,
    /// Innermost first
    outer_loops: Vec<OuterLoop>,
    current_entry_label: Observable<String>,
    run: Arc<RunState>,
    callbacks: DatasetCallbacks,
}

impl TabularScan {
    /// Sweep `manipulator` over `table`.
    pub fn new(
        manipulator: Arc<dyn Manipulator>,
        data_source: Arc<dyn DataSource>,
        table: PositionTable,
        config: TabularScanConfig,
    ) -> Self {
        Self {
            manipulator,
            data_source,
            table,
            config: RwLock::new(config),
            outer_loops: Vec::new(),
            current_entry_label: Observable::new("current_entry_label", String::new())
                .with_description("Label of the table entry being acquired")
                .with_dtype("string")
                .read_only(),
            run: Arc::new(RunState::new()),
            callbacks: DatasetCallbacks::new(),
        }
    }

    /// Load the table from `path`; bare numbers are read in
    /// `config.table_unit` or the manipulator's preferred unit.
    pub fn from_path(
        manipulator: Arc<dyn Manipulator>,
        data_source: Arc<dyn DataSource>,
        path: impl AsRef<Path>,
        config: TabularScanConfig,
    ) -> ScanResult<Self> {
        let unit = config
            .table_unit
            .unwrap_or_else(|| manipulator.preferred_unit());
        let table = PositionTable::from_path(path, unit)?;
        Ok(Self::new(manipulator, data_source, table, config))
    }

    /// Wrap the table sweep in a loop of `manipulator` over `axis`.
    ///
    /// Each call adds a loop outside the existing ones.
    pub fn with_outer_loop(mut self, manipulator: Arc<dyn Manipulator>, axis: Axis) -> Self {
        self.outer_loops.push(OuterLoop { manipulator, axis });
        self
    }

    /// Positions visited by each pass
    pub fn table(&self) -> &PositionTable {
        &self.table
    }

    /// Configuration used by the next run
    pub fn config(&self) -> TabularScanConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; takes effect at the next run.
    pub fn set_config(&self, config: TabularScanConfig) {
        *self.config.write() = config;
    }

    /// Label of the entry being acquired
    pub fn current_entry_label(&self) -> &Observable<String> {
        &self.current_entry_label
    }

    /// Fraction of the current sweep completed
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

    /// Table positions in the manipulator's preferred unit.
    pub fn table_axis(&self) -> ScanResult<Axis> {
        self.table.to_axis(self.manipulator.preferred_unit())
    }

    /// Visit every table entry for every outer-loop combination.
    ///
    /// Fails with [`ScanError::InvalidState`] if a sweep is already running
    /// and with [`ScanError::Cancelled`] if [`TabularScan::stop`] is called
    /// before it completes.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()), err)]
    pub async fn read_data_set(&self) -> ScanResult<DataSet> {
        let config = self.config();
        let retract = config
            .retract_at_end
            .then_some(config.positioning_velocity);
        let manipulators = std::iter::once(self.manipulator.clone())
            .chain(self.outer_loops.iter().map(|l| l.manipulator.clone()))
            .collect();
        let mut guard = self
            .run
            .try_begin(manipulators, self.data_source.clone(), retract)?;

        let result = tokio::select! {
            biased;
            _ = guard.cancelled() => Err(ScanError::Cancelled),
            result = self.sweep(&config) => result,
        };

        if let Ok(data_set) = &result {
            info!(shape = ?data_set.shape(), "tabular scan complete");
            self.callbacks.notify(data_set);
        }

        let cleanup = guard.finish().await;
        match (result, cleanup) {
            (Ok(data_set), Ok(())) => Ok(data_set),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!(error = %cleanup_err, "data source stop failed during cleanup");
                Err(e)
            }
        }
    }

    async fn sweep(&self, config: &TabularScanConfig) -> ScanResult<DataSet> {
        let axis = self.table_axis()?;
        if let Some(empty) = self.outer_loops.iter().position(|l| l.axis.is_empty()) {
            return Err(ScanError::configuration(format!(
                "outer loop {} has no positions",
                empty + 1
            )));
        }

        self.data_source.stop().await?;
        self.manipulator
            .wait_for_target_reached(config.settle_timeout)
            .await?;
        for outer in &self.outer_loops {
            outer
                .manipulator
                .wait_for_target_reached(config.settle_timeout)
                .await?;
        }

        if let Some(first) = axis.first() {
            self.run.set_retract_target(first);
        }

        let lengths: Vec<usize> = self.outer_loops.iter().map(|l| l.axis.len()).collect();
        let passes: usize = lengths.iter().product();
        let rows = axis.len();
        let total = (passes * rows) as f64;
        info!(
            entries = rows,
            outer_loops = self.outer_loops.len(),
            passes,
            "starting tabular sweep"
        );

        let mut results = Vec::with_capacity(passes);
        for pass in 0..passes {
            let indices = odometer(pass, &lengths);
            for (outer, &index) in self.outer_loops.iter().zip(&indices).rev() {
                if let Some(position) = outer.axis.get(index) {
                    outer
                        .manipulator
                        .move_to(position, config.positioning_velocity)
                        .await?;
                }
            }
            debug!(pass, ?indices, "outer positions reached");

            let label = &self.current_entry_label;
            let progress = self.run.progress();
            let table = &self.table;
            let data_set = stepped::sweep(
                self.manipulator.as_ref(),
                self.data_source.as_ref(),
                &axis,
                config.scan_velocity,
                None,
                |row| {
                    label.publish(table.label(row).unwrap_or_default().to_string());
                    progress.publish((pass * rows + row) as f64 / total);
                },
            )
            .await?;
            results.push(data_set);
        }
        self.run.progress().publish(1.0);

        // Innermost outer loop varies fastest; fold from the inside out
        for outer in &self.outer_loops {
            results = results
                .chunks(outer.axis.len())
                .map(|chunk| DataSet::stack(outer.axis.clone(), chunk))
                .collect::<ScanResult<Vec<_>>>()?;
        }
        results
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::Shape("tabular scan produced no data".to_string()))
    }
}

/// Loop indices for `pass`, innermost (`lengths[0]`) varying fastest.
fn odometer(mut pass: usize, lengths: &[usize]) -> Vec<usize> {
    lengths
        .iter()
        .map(|&len| {
            let index = pass % len;
            pass /= len;
            index
        })
        .collect()
}

impl std::fmt::Debug for TabularScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularScan")
            .field("entries", &self.table.len())
            .field("outer_loops", &self.outer_loops.len())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DataSource for TabularScan {
    async fn start(&self, _axis_hint: Option<&Axis>) -> ScanResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ScanResult<()> {
        TabularScan::stop(self);
        Ok(())
    }

    async fn read_data_set(&self) -> ScanResult<DataSet> {
        TabularScan::read_data_set(self).await
    }
}

impl Describe for TabularScan {
    fn describe(&self) -> ComponentDescription {
        ComponentDescription::new("TabularScan")
            .attribute(self.run.progress())
            .attribute(self.run.active())
            .attribute(&self.current_entry_label)
            .action("read_data_set", "Visit every table entry and return the dataset")
            .action("stop", "Cancel the running sweep")
    }
}
