//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Code | Domain    | Description                                      |
//! |------|-----------|--------------------------------------------------|
//! | 0    | Universal | Success                                          |
//! | 2    | Universal | CLI usage error (bad args, no output path)       |
//! | 60   | config    | Config cannot be parsed or fails validation      |
//! | 61   | runtime   | IO failure, unreadable source, cancelled run     |
//! | 62   | model     | Required model parameter has no value or default |
//! | 63   | pivot     | Two result rows map to the same summary cell     |
//! | 64   | strict    | Run finished but raised flags under `--strict`   |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `recon_exit_code` or the relevant command

use wellset_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config file failed to parse or validate (includes unit coverage).
pub const EXIT_INVALID_CONFIG: u8 = 60;

/// Runtime failure: file IO, unreadable CSV, cancellation.
pub const EXIT_RUNTIME: u8 = 61;

/// A required model parameter could not be resolved. No output was written.
pub const EXIT_SCHEMA_VIOLATION: u8 = 62;

/// Post-processing found a repeated (entity, metric) cell. No output was written.
pub const EXIT_DUPLICATE_CELL: u8 = 63;

/// Outputs were written but the run raised data-quality flags and
/// `--strict` was given.
pub const EXIT_FLAGS_STRICT: u8 = 64;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::UnknownUnit { .. } => EXIT_INVALID_CONFIG,
        ReconError::SchemaViolation { .. } => EXIT_SCHEMA_VIOLATION,
        ReconError::DuplicateCell { .. } => EXIT_DUPLICATE_CELL,
        ReconError::MalformedIdentifier { .. }
        | ReconError::SchemaMismatch { .. }
        | ReconError::InsufficientData { .. }
        | ReconError::MixedUnits { .. }
        | ReconError::Csv { .. }
        | ReconError::Cancelled { .. }
        | ReconError::Io(_) => EXIT_RUNTIME,
    }
}
