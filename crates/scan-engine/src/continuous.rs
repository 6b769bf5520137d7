//! Trigger-synchronized sweep.
//!
//! The manipulator moves through the whole range in one motion while emitting
//! a pulse at every realized trigger position; the data source collects one
//! sample per pulse.

use crate::axis::SweepPlan;
use crate::config::ScanConfig;
use crate::progress::track_position;
use crate::run_state::RunState;
use scan_core::capabilities::{DataSource, Manipulator};
use scan_core::data::{Axis, DataSet};
use scan_core::error::{ScanError, ScanResult};
use tracing::{debug, info, warn};

pub(crate) async fn sweep(
    manipulator: &dyn Manipulator,
    data_source: &dyn DataSource,
    config: &ScanConfig,
    plan: &SweepPlan,
    run: &RunState,
) -> ScanResult<DataSet> {
    let axis = &plan.axis;
    let (Some(first), Some(last)) = (axis.first(), axis.last()) else {
        return Err(ScanError::configuration("sweep axis is empty"));
    };
    if axis.len() < 2 {
        return Err(ScanError::configuration(
            "a continuous scan needs at least two positions",
        ));
    }

    let approach = first.try_sub(plan.overscan)?;
    let end = last.try_add(plan.overscan)?;
    manipulator
        .begin_scan(approach, end, config.positioning_velocity)
        .await?;

    let realized = manipulator
        .configure_trigger_axis(axis)
        .await?
        .to_unit(axis.unit())?;
    let (Some(realized_first), Some(realized_last)) = (realized.first(), realized.last()) else {
        return Err(ScanError::configuration(
            "manipulator realized an empty trigger schedule",
        ));
    };
    run.set_retract_target(SweepPlan::retract_target(realized_first, plan.overscan)?);
    info!(
        requested = axis.len(),
        realized = realized.len(),
        start = %realized_first,
        stop = %realized_last,
        "trigger schedule negotiated"
    );

    let tracker = track_position(manipulator, &realized, run.progress());
    data_source.start(Some(&realized)).await?;
    let end = realized_last.try_add(plan.overscan)?;
    manipulator.move_to(end, config.scan_velocity).await?;
    data_source.stop().await?;
    drop(tracker);

    let data_set = data_source.read_data_set().await?;
    data_set.validate()?;
    reconcile(data_set, realized)
}

/// Attach `realized` as the leading axis, trimming whichever of data and
/// axis is longer.
pub(crate) fn reconcile(mut data_set: DataSet, mut realized: Axis) -> ScanResult<DataSet> {
    let Some(&samples) = data_set.shape().first() else {
        return Err(ScanError::Shape(
            "triggered acquisition returned a 0-dimensional dataset".to_string(),
        ));
    };

    let triggers = realized.len();
    if samples != triggers {
        warn!(
            samples,
            triggers,
            "sample count does not match trigger count, trimming to the shorter"
        );
    }
    if samples < triggers {
        realized.truncate(samples);
    } else if samples > triggers {
        data_set.truncate_leading(triggers)?;
    }

    data_set.replace_axis(0, realized)?;
    debug!(shape = ?data_set.shape(), "continuous dataset assembled");
    Ok(data_set)
}
