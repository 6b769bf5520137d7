//! Run state of a scan: the Active guard, progress, cancellation and the
//! cleanup that runs whatever the outcome.

use parking_lot::Mutex;
use scan_core::capabilities::{DataSource, Manipulator};
use scan_core::error::{ScanError, ScanResult};
use scan_core::observable::Observable;
use scan_core::units::Quantity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Observable state shared by one scan instance across its runs.
pub struct RunState {
    active_flag: AtomicBool,
    active: Observable<bool>,
    progress: Observable<f64>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
    retract_target: Mutex<Option<Quantity>>,
    retract_task: Mutex<Option<JoinHandle<ScanResult<()>>>>,
}

impl RunState {
    /// Idle state with zero progress.
    pub fn new() -> Self {
        Self {
            active_flag: AtomicBool::new(false),
            active: Observable::new("active", false)
                .with_description("A sweep is in flight")
                .with_dtype("bool")
                .read_only(),
            progress: Observable::new("progress", 0.0)
                .with_description("Fraction of the sweep completed")
                .with_dtype("float")
                .read_only(),
            cancel: Mutex::new(None),
            retract_target: Mutex::new(None),
            retract_task: Mutex::new(None),
        }
    }

    /// Whether a run is in flight, as an observable
    pub fn active(&self) -> &Observable<bool> {
        &self.active
    }

    /// Fraction of the current run completed
    pub fn progress(&self) -> &Observable<f64> {
        &self.progress
    }

    /// Whether a run is in flight
    pub fn is_active(&self) -> bool {
        self.active_flag.load(Ordering::SeqCst)
    }

    /// Enter the Active state.
    ///
    /// Fails with [`ScanError::InvalidState`] if a run is already in flight;
    /// nothing is mutated in that case. `manipulators[0]` is the one moved
    /// by the retract.
    pub fn try_begin(
        self: &Arc<Self>,
        manipulators: Vec<Arc<dyn Manipulator>>,
        data_source: Arc<dyn DataSource>,
        retract: Option<Option<Quantity>>,
    ) -> ScanResult<RunGuard> {
        if self
            .active_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::InvalidState(
                "a scan is already in progress".to_string(),
            ));
        }

        let (tx, rx) = watch::channel(false);
        *self.cancel.lock() = Some(tx);
        *self.retract_target.lock() = None;
        self.active.publish(true);
        self.progress.publish(0.0);

        Ok(RunGuard {
            run: self.clone(),
            manipulators,
            data_source,
            retract,
            cancel: rx,
            finished: false,
        })
    }

    /// Signal cancellation of the in-flight run, if any.
    pub fn cancel(&self) {
        if let Some(tx) = self.cancel.lock().as_ref() {
            tx.send_replace(true);
        }
    }

    /// Record where a retract should go; set once the sweep axis is known.
    pub fn set_retract_target(&self, target: Quantity) {
        *self.retract_target.lock() = Some(target);
    }

    /// Handle of the most recently spawned retract move.
    pub fn take_retract_task(&self) -> Option<JoinHandle<ScanResult<()>>> {
        self.retract_task.lock().take()
    }

    fn reset(&self) {
        *self.cancel.lock() = None;
        self.progress.publish(0.0);
        self.active.publish(false);
        self.active_flag.store(false, Ordering::SeqCst);
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the Active state for one run and performs cleanup.
///
/// Call [`RunGuard::finish`] on every completed path. If the guard is dropped
/// instead (the caller's future was dropped mid-sweep), the same cleanup runs
/// with the async parts spawned on the current runtime.
pub struct RunGuard {
    run: Arc<RunState>,
    manipulators: Vec<Arc<dyn Manipulator>>,
    data_source: Arc<dyn DataSource>,
    /// `Some(velocity)` when a retract is requested
    retract: Option<Option<Quantity>>,
    cancel: watch::Receiver<bool>,
    finished: bool,
}

impl RunGuard {
    /// Resolves once cancellation is signalled; pending forever otherwise.
    pub async fn cancelled(&mut self) {
        if self.cancel.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run cleanup and leave the Active state.
    ///
    /// Returns the error of `DataSource::stop`, if any; all other cleanup
    /// steps still run.
    pub async fn finish(mut self) -> ScanResult<()> {
        let stopped = self.data_source.stop().await;
        self.finished = true;
        self.stop_and_retract();
        self.run.reset();
        stopped
    }

    fn stop_and_retract(&self) {
        for manipulator in &self.manipulators {
            manipulator.stop();
        }

        let Some(velocity) = self.retract else {
            return;
        };
        let target = self.run.retract_target.lock().take();
        let (Some(target), Some(manipulator)) = (target, self.manipulators.first()) else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!(target = %target, "no runtime available, skipping retract");
            return;
        };

        debug!(target = %target, "retracting manipulator");
        let manipulator = manipulator.clone();
        let task = handle.spawn(async move {
            let result = manipulator.move_to(target, velocity).await;
            if let Err(e) = &result {
                warn!(error = %e, "retract move failed");
            }
            result
        });
        *self.run.retract_task.lock() = Some(task);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let data_source = self.data_source.clone();
                handle.spawn(async move {
                    if let Err(e) = data_source.stop().await {
                        warn!(error = %e, "failed to stop data source after abandoned scan");
                    }
                });
            }
            Err(_) => warn!("no runtime available, data source left running"),
        }
        self.stop_and_retract();
        self.run.reset();
    }
}
