//! Mock hardware for rust-scan.
//!
//! Simulated devices for running sweeps without physical hardware. All mocks
//! use async-safe waits (`tokio::time::sleep`).
//!
//! - [`MockManipulator`]: stage/rotator with tick-based motion, trigger
//!   quantization and pulses on a [`TriggerLine`]
//! - [`MockDataSource`]: scalar or trigger-collecting acquisition device
//!
//! ```rust,ignore
//! use scan_driver_mock::{MockDataSource, MockManipulator};
//!
//! let stage = MockManipulator::new();
//! let detector = MockDataSource::builder()
//!     .trigger_line(stage.trigger_line().clone())
//!     .build();
//! ```

pub mod common;
mod mock_data_source;
mod mock_manipulator;
mod trigger_line;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};

pub use mock_data_source::{
    AcquisitionMode, MockDataSource, MockDataSourceBuilder, MockDataSourceConfig, Signal,
};
pub use mock_manipulator::{
    LimitBehavior, MockManipulator, MockManipulatorBuilder, MockManipulatorConfig, StageLimits,
};
pub use trigger_line::{TriggerLine, TriggerPulse};
