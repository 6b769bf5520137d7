//! Sweep orchestration for rust-scan.
//!
//! - [`Scan`]: one manipulator swept over a computed axis, either
//!   trigger-synchronized (continuous) or step-and-settle
//! - [`TabularScan`]: stepped sweep over a table of labelled positions,
//!   optionally nested inside outer loops
//!
//! Both implement [`DataSource`](scan_core::DataSource), so a scan can be the
//! acquisition device of another scan.

pub mod axis;
pub mod callbacks;
pub mod config;
mod continuous;
pub mod progress;
pub mod run_state;
pub mod scan;
mod stepped;
pub mod table;
pub mod tabular;

pub use axis::SweepPlan;
pub use callbacks::{DatasetCallback, DatasetCallbacks};
pub use config::ScanConfig;
pub use scan::Scan;
pub use table::PositionTable;
pub use tabular::{TabularScan, TabularScanConfig};
