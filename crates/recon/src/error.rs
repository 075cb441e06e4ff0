use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (unknown source, inverted range, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Identifier does not match the declared pattern set of its source.
    #[error("source '{source_name}': malformed identifier '{raw}' ({reason})")]
    MalformedIdentifier {
        source_name: String,
        raw: String,
        reason: String,
    },
    /// Required column absent from a source file or result file.
    #[error("source '{source_name}': missing column '{column}'")]
    SchemaMismatch { source_name: String, column: String },
    /// No conversion registered between two units.
    #[error("no conversion registered from '{from}' to '{to}'")]
    UnknownUnit { from: String, to: String },
    /// A derived aggregate has no contributing value.
    #[error("group '{group}': aggregate '{aggregate}' has no contributing data")]
    InsufficientData { group: String, aggregate: String },
    /// Required model parameter has neither a value nor a default.
    #[error("group '{group}': required parameter '{path}' has no value and no default")]
    SchemaViolation { group: String, path: String },
    /// Two result rows map to the same pivot cell.
    #[error("duplicate cell ({row}, {column}): {first} vs {second}")]
    DuplicateCell {
        row: String,
        column: String,
        first: f64,
        second: f64,
    },
    /// One metric reported with two different units.
    #[error("metric '{metric}' reported in both '{first}' and '{second}'")]
    MixedUnits {
        metric: String,
        first: String,
        second: String,
    },
    /// CSV reader error.
    #[error("source '{source_name}': CSV error: {message}")]
    Csv { source_name: String, message: String },
    /// Pipeline cancelled between stages.
    #[error("cancelled before stage '{stage}'")]
    Cancelled { stage: String },
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl ReconError {
    /// Short machine-readable name, used as a skip-reason key in load reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "config_parse",
            Self::ConfigValidation(_) => "config_validation",
            Self::MalformedIdentifier { .. } => "malformed_identifier",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::UnknownUnit { .. } => "unknown_unit",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::DuplicateCell { .. } => "duplicate_cell",
            Self::MixedUnits { .. } => "mixed_units",
            Self::Csv { .. } => "csv",
            Self::Cancelled { .. } => "cancelled",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T, E = ReconError> = std::result::Result<T, E>;
