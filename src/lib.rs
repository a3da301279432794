//! Parameter inference and curve grouping for MCC dosimetry scans.
//!
//! Raw file bytes go in; a typed [`FileRecord`] per file and a list of
//! [`CurveDescriptor`]s come out. Reading files, drawing and persisting
//! preferences are left to the caller.

pub mod assemble;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod keys;
pub mod state;

pub use assemble::{apply_overrides, build_curves, CurveDescriptor, PlotInput, PlotOutput, PlotSelection};
pub use config::EngineConfig;
pub use data::extract::extract;
pub use data::model::{FieldValue, FileRecord, Overrides};
pub use data::segment::{MeasureKind, PlaneSet};
pub use error::{ConfigError, FieldWarning, ParseError, UnresolvedKeyWarning, Warning};
pub use keys::{assign_keys, Parameter};
pub use state::Session;
