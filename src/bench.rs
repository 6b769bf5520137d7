//! Simulated bench assembled from configuration.

use crate::config::AppConfig;
use scan_core::{ComponentDescription, DataSource, Describe, Manipulator, ScanError, ScanResult};
use scan_driver_mock::{MockDataSource, MockManipulator};
use scan_engine::{Scan, TabularScan};
use std::path::Path;
use std::sync::Arc;

/// A mock manipulator wired to a mock data source.
///
/// The data source follows the manipulator position and, in triggered
/// acquisition, listens on its trigger line.
#[derive(Debug, Clone)]
pub struct MockBench {
    /// Simulated stage
    pub manipulator: MockManipulator,
    /// Simulated detector
    pub data_source: MockDataSource,
}

impl MockBench {
    /// Wire the bench described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let manipulator = MockManipulator::with_config(&config.mock.manipulator);
        let data_source = MockDataSource::with_config(
            &config.mock.data_source,
            Some(manipulator.trigger_line().clone()),
            Some(manipulator.position().clone()),
        );
        Self {
            manipulator,
            data_source,
        }
    }

    /// Stepped or continuous scan with the `[scan]` parameters.
    pub fn scan(&self, config: &AppConfig) -> Scan {
        Scan::new(
            self.manipulator_handle(),
            self.data_source_handle(),
            config.scan.clone(),
        )
    }

    /// Build a tabular scan. `path` overrides the table file named in the
    /// configuration.
    pub fn tabular_scan(&self, config: &AppConfig, path: Option<&Path>) -> ScanResult<TabularScan> {
        let table = config.table.clone().unwrap_or_default();
        let path = path
            .map(Path::to_path_buf)
            .or(table.path)
            .ok_or_else(|| ScanError::configuration("no position table given"))?;
        TabularScan::from_path(
            self.manipulator_handle(),
            self.data_source_handle(),
            path,
            table.settings,
        )
    }

    /// Descriptions of the bench components and the scan.
    pub fn descriptions(&self, config: &AppConfig) -> Vec<ComponentDescription> {
        vec![
            self.manipulator.describe(),
            self.data_source.describe(),
            self.scan(config).describe(),
        ]
    }

    fn manipulator_handle(&self) -> Arc<dyn Manipulator> {
        Arc::new(self.manipulator.clone())
    }

    fn data_source_handle(&self) -> Arc<dyn DataSource> {
        Arc::new(self.data_source.clone())
    }
}
