//! Step-and-settle sweep: move, read, repeat.

use crate::progress::track_position;
use scan_core::capabilities::{DataSource, Manipulator};
use scan_core::data::{Axis, DataSet};
use scan_core::error::ScanResult;
use scan_core::observable::Observable;
use scan_core::units::Quantity;
use tracing::debug;

/// Visit every position of `axis` in order and stack the samples along a new
/// leading dimension.
///
/// `on_entry(i)` runs before the move to `axis[i]`. When `progress` is given
/// it follows the manipulator position over `axis`.
pub(crate) async fn sweep<F>(
    manipulator: &dyn Manipulator,
    data_source: &dyn DataSource,
    axis: &Axis,
    velocity: Option<Quantity>,
    progress: Option<&Observable<f64>>,
    mut on_entry: F,
) -> ScanResult<DataSet>
where
    F: FnMut(usize) + Send,
{
    data_source.start(None).await?;
    let tracker = progress.and_then(|progress| track_position(manipulator, axis, progress));

    let mut samples = Vec::with_capacity(axis.len());
    for (index, position) in axis.iter().enumerate() {
        on_entry(index);
        manipulator.move_to(position, velocity).await?;
        samples.push(data_source.read_data_set().await?);
        debug!(index, position = %position, "sample acquired");
    }

    drop(tracker);
    data_source.stop().await?;
    DataSet::stack(axis.clone(), &samples)
}
