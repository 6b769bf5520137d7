//! Core types for trigger-synchronized manipulator sweeps.
//!
//! - [`units`]: `Unit` and `Quantity` with checked arithmetic
//! - [`data`]: `Axis` and the n-dimensional `DataSet`
//! - [`observable`]: reactive properties with watch and sync listeners
//! - [`capabilities`]: the `Manipulator` and `DataSource` traits
//! - [`describe`]: explicit component descriptions
//! - [`error`]: `ScanError` and `DriverError`

pub mod capabilities;
pub mod data;
pub mod describe;
pub mod error;
pub mod observable;
pub mod units;

pub use capabilities::{DataSource, Manipulator, ManipulatorStatus, TriggerParams};
pub use data::{Axis, DataSet};
pub use describe::{ComponentDescription, Describe};
pub use error::{DriverError, DriverErrorKind, ScanError, ScanResult};
pub use observable::{Observable, ObserverGuard};
pub use units::{Quantity, Unit, UnitError};
