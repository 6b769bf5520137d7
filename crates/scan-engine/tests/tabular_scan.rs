//! Tabular scans with and without outer loops.

use parking_lot::Mutex;
use scan_core::units::{DEGREE, MILLIMETER, VOLT};
use scan_core::{Axis, Describe, Manipulator, Quantity, ScanError};
use scan_driver_mock::{MockDataSource, MockManipulator, MockMode};
use scan_engine::{TabularScan, TabularScanConfig};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn table_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const TABLE: &str = "# label, position\nfirst, 1\nsecond, 3 mm\nthird, 2 mm\n";

#[tokio::test]
async fn visits_entries_in_table_order() {
    let stage = MockManipulator::new();
    let detector = MockDataSource::builder()
        .follow(stage.position().clone())
        .build();
    let file = table_file(TABLE);
    let scan = TabularScan::from_path(
        Arc::new(stage.clone()),
        Arc::new(detector.clone()),
        file.path(),
        TabularScanConfig::default(),
    )
    .unwrap();

    let labels = Arc::new(Mutex::new(Vec::new()));
    let _guard = scan.current_entry_label().observe({
        let labels = labels.clone();
        move |label: &String| labels.lock().push(label.clone())
    });

    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[3]);
    assert_eq!(data.axes()[0].values(), &[1.0, 3.0, 2.0]);
    assert_eq!(data.data().as_slice().unwrap(), &[1.0, 3.0, 2.0]);
    assert_eq!(*labels.lock(), vec!["first", "second", "third"]);
    assert_eq!(scan.current_entry_label().get(), "third");
    assert!(!scan.is_active());
}

#[tokio::test]
async fn bare_numbers_use_the_configured_unit() {
    let stage = MockManipulator::new();
    let file = table_file("a, 500\nb, 1500\n");
    let config = TabularScanConfig {
        table_unit: Some("um".parse().unwrap()),
        ..Default::default()
    };
    let scan = TabularScan::from_path(
        Arc::new(stage.clone()),
        Arc::new(MockDataSource::new()),
        file.path(),
        config,
    )
    .unwrap();

    let axis = scan.table_axis().unwrap();
    assert_eq!(axis.unit(), MILLIMETER);
    assert!((axis.values()[0] - 0.5).abs() < 1e-12);
    assert!((axis.values()[1] - 1.5).abs() < 1e-12);
}

#[tokio::test]
async fn table_errors_are_configuration_errors() {
    let stage = Arc::new(MockManipulator::new());
    let detector = Arc::new(MockDataSource::new());

    let missing = TabularScan::from_path(
        stage.clone(),
        detector.clone(),
        "/nonexistent/table.csv",
        TabularScanConfig::default(),
    );
    assert!(matches!(missing, Err(ScanError::Configuration(_))));

    let file = table_file("a, 1\nb\n");
    let malformed = TabularScan::from_path(
        stage.clone(),
        detector,
        file.path(),
        TabularScanConfig::default(),
    );
    assert!(matches!(malformed, Err(ScanError::Configuration(_))));
    assert_eq!(stage.move_count(), 0);
}

#[tokio::test]
async fn outer_loops_build_a_nested_sweep() {
    let stage = MockManipulator::new();
    let tilt = MockManipulator::builder().unit(DEGREE).build();
    let height = MockManipulator::new();

    // Sample encodes all three positions: table + 100 * tilt + 1000 * height
    let detector = MockDataSource::builder()
        .follow(stage.position().clone())
        .signal({
            let tilt = tilt.position().clone();
            let height = height.position().clone();
            move |x| x + 100.0 * tilt.get().value() + 1000.0 * height.get().value()
        })
        .build();

    let file = table_file(TABLE);
    let scan = TabularScan::from_path(
        Arc::new(stage.clone()),
        Arc::new(detector),
        file.path(),
        TabularScanConfig {
            retract_at_end: true,
            ..Default::default()
        },
    )
    .unwrap()
    .with_outer_loop(Arc::new(tilt.clone()), Axis::new(vec![0.0, 1.0], DEGREE))
    .with_outer_loop(
        Arc::new(height.clone()),
        Axis::new(vec![10.0, 20.0, 30.0], MILLIMETER),
    );

    let data = scan.read_data_set().await.unwrap();
    assert_eq!(data.shape(), &[3, 2, 3]);
    assert_eq!(data.axes()[0].values(), &[10.0, 20.0, 30.0]);
    assert_eq!(data.axes()[1].unit(), DEGREE);
    assert_eq!(data.axes()[2].values(), &[1.0, 3.0, 2.0]);
    assert_eq!(
        data.get(&[2, 1, 1]),
        Some(Quantity::new(3.0 + 100.0 + 30_000.0, VOLT))
    );
    assert_eq!(
        data.get(&[0, 0, 2]),
        Some(Quantity::new(2.0 + 10_000.0, VOLT))
    );

    scan.take_retract_task().unwrap().await.unwrap().unwrap();
    assert_eq!(stage.position().get(), Quantity::new(1.0, MILLIMETER));

    // Six passes over three entries, plus the retract
    assert_eq!(stage.move_count(), 19);
    assert_eq!(tilt.move_count(), 6);
    assert_eq!(height.move_count(), 6);
    assert_eq!(tilt.stop_count(), 1);
    assert_eq!(height.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_every_manipulator() {
    let stage = MockManipulator::builder()
        .mode(MockMode::Realistic)
        .velocity(5.0)
        .build();
    let tilt = MockManipulator::builder().unit(DEGREE).build();
    let detector = MockDataSource::builder()
        .follow(stage.position().clone())
        .build();
    let file = table_file(TABLE);
    let scan = Arc::new(
        TabularScan::from_path(
            Arc::new(stage.clone()),
            Arc::new(detector.clone()),
            file.path(),
            TabularScanConfig::default(),
        )
        .unwrap()
        .with_outer_loop(Arc::new(tilt.clone()), Axis::new(vec![0.0, 1.0], DEGREE)),
    );

    let running = tokio::spawn({
        let scan = scan.clone();
        async move { scan.read_data_set().await }
    });
    while stage.move_count() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scan.is_active());

    let data_source_stops = detector.stop_count();
    scan.stop();

    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(detector.stop_count(), data_source_stops + 1);
    assert_eq!(stage.stop_count(), 1);
    assert_eq!(tilt.stop_count(), 1);
    assert_eq!(tilt.move_count(), 1);
    assert!(!scan.is_active());
    assert_eq!(scan.progress().get(), 0.0);
    assert!(scan.take_retract_task().is_none());
}

#[tokio::test]
async fn tabular_scan_describes_itself() {
    let stage = MockManipulator::new();
    let file = table_file(TABLE);
    let scan = TabularScan::from_path(
        Arc::new(stage),
        Arc::new(MockDataSource::new()),
        file.path(),
        TabularScanConfig::default(),
    )
    .unwrap();

    let description = scan.describe();
    assert_eq!(description.component, "TabularScan");
    assert!(description.find_attribute("current_entry_label").is_some());
    assert_eq!(scan.table().len(), 3);
}
