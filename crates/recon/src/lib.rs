//! `wellset-recon`: well-set reconciliation and emissions-config engine.
//!
//! Pure engine crate: receives CSV text already read from disk, returns the
//! reconciled parameter sets, the emissions-config tree and a run summary.
//! No CLI or filesystem dependencies.

pub mod aggregate;
pub mod cohort;
pub mod config;
pub mod emissions;
pub mod error;
pub mod evidence;
pub mod identifier;
pub mod join;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod units;

pub use cohort::Cohort;
pub use config::PipelineConfig;
pub use error::ReconError;
pub use identifier::IdentifierFormat;
pub use model::{EmissionsConfig, Flag, Flagged, RunSummary, SummaryTable};
pub use pipeline::{run, CancelToken, PipelineOutput, SourceInput};
pub use units::ConversionTable;
