use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Data-quality flag. Never fatal; carried alongside the value it qualifies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum Flag {
    /// Sources disagree beyond tolerance. The higher-precedence value was kept.
    Conflicting {
        well: String,
        attribute: String,
        kept: String,
        rejected: String,
        /// `rejected - kept` in canonical units. `None` for text descriptors.
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<f64>,
    },
    /// `source` declares the attribute but has no usable value for the well.
    /// `source == None` means no source has the well at all.
    Missing {
        well: String,
        attribute: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// Aggregate had no data; the documented default was used.
    DefaultSubstituted { default: String },
    /// Aggregate had no data and no default.
    InsufficientData { aggregate: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Conflicting,
    Missing,
    DefaultSubstituted,
    InsufficientData,
}

impl Flag {
    pub fn kind(&self) -> FlagKind {
        match self {
            Self::Conflicting { .. } => FlagKind::Conflicting,
            Self::Missing { .. } => FlagKind::Missing,
            Self::DefaultSubstituted { .. } => FlagKind::DefaultSubstituted,
            Self::InsufficientData { .. } => FlagKind::InsufficientData,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflicting { well, attribute, kept, rejected, delta: Some(delta) } => write!(
                f,
                "conflicting {well}.{attribute}: kept {kept} over {rejected} (delta {delta})"
            ),
            Self::Conflicting { well, attribute, kept, rejected, delta: None } => {
                write!(f, "conflicting {well}.{attribute}: kept {kept} over {rejected}")
            }
            Self::Missing { well, attribute, source: Some(source) } => {
                write!(f, "missing {well}.{attribute} from {source}")
            }
            Self::Missing { well, attribute, source: None } => {
                write!(f, "missing {well}.{attribute} from every source")
            }
            Self::DefaultSubstituted { default } => write!(f, "default substituted: {default}"),
            Self::InsufficientData { aggregate } => write!(f, "insufficient data for {aggregate}"),
        }
    }
}

/// A value plus the flags raised while producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flagged<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<Flag>,
}

impl<T> Flagged<T> {
    pub fn clean(value: T) -> Self {
        Self { value, flags: Vec::new() }
    }

    pub fn new(value: T, flags: Vec<Flag>) -> Self {
        Self { value, flags }
    }

    pub fn flag(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flag(flag);
        self
    }

    /// Copy `other`'s flags onto `self`.
    pub fn absorb<U>(&mut self, other: &Flagged<U>) {
        for flag in &other.flags {
            self.flag(flag.clone());
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Flagged<U> {
        Flagged { value: f(self.value), flags: self.flags }
    }

    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn has(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind() == kind)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measured {
    pub value: f64,
    pub unit: String,
}

/// A single normalized row from one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct WellRecord {
    pub source: String,
    /// Canonical identifier.
    pub identifier: String,
    pub raw_identifier: String,
    pub period: Option<NaiveDate>,
    pub attributes: BTreeMap<String, Measured>,
    pub descriptors: BTreeMap<String, String>,
}

/// Per-file load summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub source: String,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_skipped: usize,
    pub skip_reasons: BTreeMap<String, usize>,
}

impl LoadReport {
    pub fn skip(&mut self, reason: &str) {
        self.rows_skipped += 1;
        *self.skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// All records loaded from one source.
#[derive(Debug, Clone)]
pub struct SourceRecords {
    pub source: String,
    pub records: Vec<WellRecord>,
    pub report: LoadReport,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// One merged field with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Merged<T> {
    /// Source whose value won.
    pub source: Option<String>,
    #[serde(flatten)]
    pub value: Flagged<Option<T>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledWell {
    pub identifier: String,
    pub attributes: BTreeMap<String, Merged<Measured>>,
    pub descriptors: BTreeMap<String, Merged<String>>,
}

impl ReconciledWell {
    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.attributes
            .values()
            .flat_map(|m| m.value.flags.iter())
            .chain(self.descriptors.values().flat_map(|m| m.value.flags.iter()))
    }

    pub fn descriptor(&self, name: &str) -> Option<&str> {
        self.descriptors
            .get(name)
            .and_then(|m| m.value.value.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub wells: Vec<ReconciledWell>,
    /// Every `Conflicting` flag raised, in well order.
    pub conflicts: Vec<Flag>,
    /// Cohort wells absent from every source.
    pub missing_wells: Vec<String>,
}

// ---------------------------------------------------------------------------
// Canonical units + aggregation
// ---------------------------------------------------------------------------

/// Numeric value in its canonical unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalValue {
    pub unit: String,
    #[serde(flatten)]
    pub value: Flagged<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalWell {
    pub identifier: String,
    pub attributes: BTreeMap<String, CanonicalValue>,
    pub descriptors: BTreeMap<String, Flagged<Option<String>>>,
}

impl CanonicalWell {
    pub fn value(&self, attribute: &str) -> Option<f64> {
        self.attributes.get(attribute).and_then(|v| v.value.value)
    }

    pub fn descriptor(&self, name: &str) -> Option<&str> {
        self.descriptors.get(name).and_then(|d| d.value.as_deref())
    }
}

/// Derived values for one facility/field group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateParameterSet {
    pub group: String,
    pub wells: Vec<String>,
    pub parameters: BTreeMap<String, CanonicalValue>,
    /// Descriptor shared by the group's wells (first in well order).
    pub descriptors: BTreeMap<String, Flagged<Option<String>>>,
}

// ---------------------------------------------------------------------------
// Emissions config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// True when the value is the model's declared default.
    pub is_default: bool,
    #[serde(flatten)]
    pub value: Flagged<ConfigValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldBlock {
    pub name: String,
    pub entries: Vec<ConfigEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisBlock {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub group: String,
    pub path: String,
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionsConfig {
    pub analysis: AnalysisBlock,
    pub fields: Vec<FieldBlock>,
    pub audit: Vec<AuditEntry>,
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongResultRow {
    pub entity: String,
    pub metric: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryColumn {
    pub metric: String,
    pub label: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub entity: String,
    pub cells: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTable {
    pub entity_header: String,
    pub columns: Vec<SummaryColumn>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn cell(&self, entity: &str, metric: &str) -> Option<f64> {
        let col = self.columns.iter().position(|c| c.metric == metric)?;
        self.rows
            .iter()
            .find(|r| r.entity == entity)
            .and_then(|r| r.cells[col])
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_name: String,
    pub engine_version: String,
    pub sources: Vec<LoadReport>,
    pub rows_skipped: usize,
    pub cohort_size: usize,
    pub wells_reconciled: usize,
    pub missing_wells: Vec<String>,
    pub conflicting_attributes: usize,
    pub missing_attributes: usize,
    pub defaults_substituted: usize,
    pub insufficient_data: usize,
    pub groups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_sha256: Option<String>,
}

impl RunSummary {
    pub fn has_flags(&self) -> bool {
        self.rows_skipped > 0
            || !self.missing_wells.is_empty()
            || self.conflicting_attributes > 0
            || self.missing_attributes > 0
            || self.defaults_substituted > 0
            || self.insufficient_data > 0
    }
}
