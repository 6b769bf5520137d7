//! # rust_scan
//!
//! Sweeps a manipulator (stage, rotator, delay line) over a range of
//! positions and records a unit-aware [`DataSet`] from a data source at
//! each one, either step by step or on hardware triggers during a single
//! continuous move.
//!
//! The workspace is split into:
//!
//! - **`scan-core`**: units, datasets, observables and the
//!   [`Manipulator`]/[`DataSource`] capability traits
//! - **`scan-engine`**: [`Scan`] and [`TabularScan`]
//! - **`scan-driver-mock`**: simulated hardware
//!
//! This crate adds configuration loading, logging setup and the CLI bench.
//!
//! ```no_run
//! use rust_scan::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> ScanResult<()> {
//! let stage = MockManipulator::new();
//! let detector = MockDataSource::builder()
//!     .follow(stage.position().clone())
//!     .build();
//! let scan = Scan::for_manipulator(Arc::new(stage), Arc::new(detector));
//! let data = scan.read_data_set().await?;
//! assert_eq!(data.shape(), &[10]);
//! # Ok(())
//! # }
//! ```

pub mod bench;
pub mod config;
pub mod logging;

pub use scan_core::{DataSet, DataSource, Manipulator};
pub use scan_engine::{Scan, TabularScan};

/// Commonly used types from across the workspace.
pub mod prelude {
    pub use scan_core::{
        Axis, DataSet, DataSource, Describe, Manipulator, ManipulatorStatus, Observable,
        Quantity, ScanError, ScanResult, Unit,
    };
    pub use scan_driver_mock::{MockDataSource, MockManipulator};
    pub use scan_engine::{PositionTable, Scan, ScanConfig, TabularScan, TabularScanConfig};
}
