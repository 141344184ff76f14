//! chartd core - types shared by every chartd crate
//!
//! This crate provides the foundational types used throughout chartd:
//! - `ChartBundle`: a loaded chart (metadata, default values, templates, subcharts)
//! - `ValuesDocument`: caller-supplied configuration with deep merge support
//! - `ReleaseRecord`: the projection of a deployed release returned to callers
//! - `ReleaseReference`: the `(namespace, name)` identity of a release

pub mod chart;
pub mod error;
pub mod release;
pub mod values;

pub use chart::{ChartBundle, ChartFile, ChartMetadata, ChartType, Dependency};
pub use error::{CoreError, Result};
pub use release::{
    DEFAULT_NAMESPACE, MAX_RELEASE_NAME_LEN, ReleaseInfo, ReleaseRecord, ReleaseReference,
    ReleaseStatus, validate_release_name,
};
pub use values::ValuesDocument;
