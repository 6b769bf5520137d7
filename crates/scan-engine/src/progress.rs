//! Position-based progress tracking shared by the sweep kinds.

use scan_core::capabilities::Manipulator;
use scan_core::data::Axis;
use scan_core::observable::{Observable, ObserverGuard};
use scan_core::units::Quantity;

/// Mirror the manipulator position into `progress` as the fraction of
/// `axis` covered, clamped to `[0, 1]`.
///
/// Returns `None` when the axis has no extent. Progress updates stop when the
/// returned guard is dropped.
pub fn track_position(
    manipulator: &dyn Manipulator,
    axis: &Axis,
    progress: &Observable<f64>,
) -> Option<ObserverGuard> {
    let unit = axis.unit();
    let start = axis.first()?.value();
    let span = axis.last()?.value() - start;
    if span == 0.0 {
        return None;
    }

    let progress = progress.clone();
    Some(manipulator.position().observe(move |position: &Quantity| {
        if let Ok(value) = position.value_in(unit) {
            progress.publish(((value - start) / span).clamp(0.0, 1.0));
        }
    }))
}
