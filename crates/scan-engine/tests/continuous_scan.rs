//! Trigger-synchronized scans against mock hardware.

use scan_core::units::{MILLIMETER, MILLIMETER_PER_SECOND};
use scan_core::{Manipulator, Quantity, ScanError};
use scan_driver_mock::{ErrorConfig, ErrorScenario, MockDataSource, MockManipulator, MockMode};
use scan_engine::{Scan, ScanConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn mm(value: f64) -> Quantity {
    Quantity::new(value, MILLIMETER)
}

fn continuous(minimum: f64, maximum: f64, step: f64) -> ScanConfig {
    ScanConfig::new(mm(minimum), mm(maximum), mm(step)).continuous(true)
}

fn scan(stage: &MockManipulator, detector: &MockDataSource, config: ScanConfig) -> Arc<Scan> {
    Arc::new(Scan::new(
        Arc::new(stage.clone()),
        Arc::new(detector.clone()),
        config,
    ))
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
    }
}

#[tokio::test]
#[traced_test]
async fn one_sample_per_trigger() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 10.0, 2.0));

    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[5]);
    assert_eq!(data.axes()[0].values(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    assert_eq!(data.data().as_slice().unwrap(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    assert_eq!(stage.begin_scan_count(), 1);
    assert_eq!(stage.trigger_config_count(), 1);
    assert!(!logs_contain("sample count"));
    assert!(!scan.is_active());
}

#[tokio::test]
async fn realized_trigger_axis_replaces_nominal() {
    let stage = MockManipulator::builder().trigger_resolution(0.3).build();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 4.0, 1.0));

    let data = scan.read_data_set().await.unwrap();
    assert_close(data.axes()[0].values(), &[0.0, 0.9, 1.8, 2.7]);
    assert_close(data.data().as_slice().unwrap(), &[0.0, 0.9, 1.8, 2.7]);
    assert_eq!(data.axes()[0].unit(), MILLIMETER);
}

#[tokio::test]
#[traced_test]
async fn missing_samples_shrink_the_axis() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .missing_samples(1)
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 10.0, 2.0));

    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[4]);
    assert_eq!(data.axes()[0].values(), &[0.0, 2.0, 4.0, 6.0]);
    assert!(logs_contain("sample count"));
}

#[tokio::test]
#[traced_test]
async fn extra_samples_are_trimmed() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .extra_samples(1)
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 10.0, 2.0));

    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[5]);
    assert_eq!(data.axes()[0].len(), data.shape()[0]);
    assert!(logs_contain("sample count"));
}

#[tokio::test]
async fn overscan_and_retract_use_realized_axis() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let config = continuous(0.0, 10.0, 2.0)
        .with_overscan(mm(1.0))
        .retract_at_end(true);
    let scan = scan(&stage, &detector, config);

    scan.read_data_set().await.unwrap();
    scan.take_retract_task().unwrap().await.unwrap().unwrap();
    assert_eq!(stage.position().get(), mm(-1.0));
}

#[tokio::test]
async fn single_point_axis_is_rejected_before_motion() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 1.0, 2.0));

    let err = scan.read_data_set().await.unwrap_err();
    assert!(matches!(err, ScanError::Configuration(_)));
    assert_eq!(stage.begin_scan_count(), 0);
    assert_eq!(stage.move_count(), 0);
}

#[tokio::test]
async fn trigger_move_failure_cleans_up() {
    // The approach move succeeds, the triggered move fails
    let stage = MockManipulator::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "move",
            count: 1,
        }))
        .build();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 10.0, 2.0));

    let err = scan.read_data_set().await.unwrap_err();
    assert!(matches!(err, ScanError::Driver(_)), "{err:?}");
    assert!(!scan.is_active());
    assert!(!scan.active().get());
    assert_eq!(stage.begin_scan_count(), 1);
    assert_eq!(stage.trigger_config_count(), 1);
    assert_eq!(detector.start_count(), 1);
    // Initial stop plus cleanup
    assert_eq!(detector.stop_count(), 2);
    assert!(!detector.is_acquiring());
    assert_eq!(stage.stop_count(), 1);
    assert!(stage.armed_trigger_positions().is_none());
    assert_eq!(scan.progress().get(), 0.0);
    assert!(scan.take_retract_task().is_none());
}

#[tokio::test]
async fn trigger_configuration_timeout_cleans_up() {
    let stage = MockManipulator::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "configure_trigger",
        }))
        .build();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 10.0, 2.0));

    let err = scan.read_data_set().await.unwrap_err();
    assert!(matches!(err, ScanError::Driver(_)), "{err:?}");
    assert!(!scan.is_active());
    assert_eq!(detector.start_count(), 0);
    assert_eq!(detector.stop_count(), 2);
    assert_eq!(stage.stop_count(), 1);
    assert_eq!(scan.progress().get(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_trigger_move_cancels() {
    let stage = MockManipulator::builder().mode(MockMode::Realistic).build();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let config = continuous(0.0, 10.0, 2.0)
        .with_scan_velocity(Quantity::new(5.0, MILLIMETER_PER_SECOND));
    let scan = scan(&stage, &detector, config);

    let running = tokio::spawn({
        let scan = scan.clone();
        async move { scan.read_data_set().await }
    });
    while !detector.is_acquiring() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let data_source_stops = detector.stop_count();
    let manipulator_stops = stage.stop_count();
    scan.stop();

    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(detector.stop_count(), data_source_stops + 1);
    assert_eq!(stage.stop_count(), manipulator_stops + 1);
    assert!(!scan.is_active());
    assert!(!scan.active().get());
    assert!(stage.position().get().value() < 8.0);
    assert!(stage.armed_trigger_positions().is_none());
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .trigger_line(stage.trigger_line().clone())
        .build();
    let scan = scan(&stage, &detector, continuous(0.0, 4.0, 1.0));

    scan.stop();
    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[4]);
}
