use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ReconError;
use crate::identifier::{IdentifierFormat, DEFAULT_LABEL_WIDTH};
use crate::units::{normalize_unit, Conversion, ConversionTable};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub cohort: CohortCriteria,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub precedence: PrecedenceConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub units: UnitsConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub model: ModelSchema,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub postprocess: PostprocessConfig,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Schema descriptor for one input dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    pub identifier_column: String,
    #[serde(default)]
    pub identifier_format: IdentifierFormat,
    #[serde(default = "default_label_width")]
    pub label_width: usize,
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Logical name → column, free text.
    #[serde(default)]
    pub descriptors: BTreeMap<String, String>,
    /// Logical name → column + unit, numeric.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeColumn>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    /// 1-based line holding the column headers. Lines above it are preamble.
    #[serde(default)]
    pub header_row: Option<usize>,
    /// Leading text of the header line, for exports whose preamble varies
    /// in length. Ignored when `header_row` is set.
    #[serde(default)]
    pub header_marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeColumn {
    pub column: String,
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

fn default_label_width() -> usize {
    DEFAULT_LABEL_WIDTH
}

fn default_date_format() -> String {
    "%Y-%m-%d".into()
}

// ---------------------------------------------------------------------------
// Cohort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortCriteria {
    /// Explicit well list. Restricts the candidate universe.
    #[serde(default)]
    pub wells: Vec<String>,
    #[serde(default)]
    pub identifier_format: IdentifierFormat,
    /// Label width for `wells`. Unset: the width of the sources that carry
    /// the well.
    #[serde(default)]
    pub label_width: Option<usize>,
    #[serde(default)]
    pub spud_after: Option<NaiveDate>,
    #[serde(default)]
    pub spud_before: Option<NaiveDate>,
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    /// Substring match; `tight_oil` expands to the tight-oil formation list.
    #[serde(default)]
    pub formations: Vec<String>,
    #[serde(default)]
    pub horizontal: HorizontalFilter,
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
    #[serde(default)]
    pub ranges: BTreeMap<String, RangeFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalFilter {
    #[serde(alias = "true", alias = "t")]
    Horizontal,
    #[serde(alias = "false", alias = "f")]
    Vertical,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeFilter {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Unit of `min`/`max`. Defaults to the attribute's canonical unit.
    #[serde(default)]
    pub unit: Option<String>,
}

impl CohortCriteria {
    pub fn is_unfiltered(&self) -> bool {
        self.wells.is_empty()
            && self.spud_after.is_none()
            && self.spud_before.is_none()
            && self.operators.is_empty()
            && self.fields.is_empty()
            && self.provinces.is_empty()
            && self.formations.is_empty()
            && self.horizontal == HorizontalFilter::Both
            && self.bounds.is_none()
            && self.ranges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Precedence + Tolerance
// ---------------------------------------------------------------------------

/// Per-attribute source precedence. Earlier wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecedenceConfig {
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl PrecedenceConfig {
    /// Full source order for `attribute`: declared order first, then the
    /// remaining sources in name order.
    pub fn order_for<'a>(
        &'a self,
        attribute: &str,
        sources: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        let declared = self.attributes.get(attribute).unwrap_or(&self.default);
        let mut order: Vec<String> = declared.clone();
        let mut rest: Vec<&String> = sources
            .into_iter()
            .filter(|s| !declared.contains(s))
            .collect();
        rest.sort();
        order.extend(rest.into_iter().cloned());
        order
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    #[serde(default = "default_relative_tolerance")]
    pub relative: f64,
    #[serde(default)]
    pub absolute: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeTolerance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeTolerance {
    #[serde(default)]
    pub relative: Option<f64>,
    #[serde(default)]
    pub absolute: Option<f64>,
}

fn default_relative_tolerance() -> f64 {
    0.01
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            relative: default_relative_tolerance(),
            absolute: 0.0,
            attributes: BTreeMap::new(),
        }
    }
}

impl ToleranceConfig {
    /// `(relative, absolute)` for `attribute`.
    pub fn for_attribute(&self, attribute: &str) -> (f64, f64) {
        match self.attributes.get(attribute) {
            Some(t) => (
                t.relative.unwrap_or(self.relative),
                t.absolute.unwrap_or(self.absolute),
            ),
            None => (self.relative, self.absolute),
        }
    }

    pub fn agrees(&self, attribute: &str, a: f64, b: f64) -> bool {
        let (relative, absolute) = self.for_attribute(attribute);
        let allowed = absolute.max(relative * a.abs().max(b.abs()));
        (a - b).abs() <= allowed
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitsConfig {
    /// Attribute → canonical unit.
    #[serde(default)]
    pub canonical: BTreeMap<String, String>,
    #[serde(default)]
    pub conversions: Vec<UnitConversion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitsConfig {
    /// Built-in table plus user entries.
    pub fn table(&self) -> ConversionTable {
        let mut table = ConversionTable::builtin();
        for c in &self.conversions {
            table.register(&c.from, &c.to, Conversion::affine(c.scale, c.offset));
        }
        table
    }

    pub fn canonical_unit(&self, attribute: &str) -> Option<String> {
        self.canonical.get(attribute).map(|u| normalize_unit(u))
    }
}

// ---------------------------------------------------------------------------
// Grouping + Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupingConfig {
    /// Descriptor to group wells by. `None` puts every well in one group.
    #[serde(default)]
    pub by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Sum,
    Mean,
    WeightedMean,
    Min,
    Max,
    Count,
    Ratio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateSpec {
    pub name: String,
    pub kind: AggregateKind,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub denominator: Option<String>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    /// Substituted (and flagged) when no well contributes.
    #[serde(default)]
    pub default: Option<f64>,
}

// ---------------------------------------------------------------------------
// Model schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_name")]
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn default_analysis_name() -> String {
    "wellset_run".into()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: default_analysis_name(),
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSchema {
    #[serde(default)]
    pub parameters: Vec<ModelParameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    Number,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelParameter {
    pub path: String,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub aggregate: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    /// Floor for numeric values.
    #[serde(default)]
    pub min: Option<f64>,
    /// Numeric code → label.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

fn default_required() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Output + Post-processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub field_index: Option<String>,
    #[serde(default = "default_field_index_paths")]
    pub field_index_paths: Vec<String>,
}

fn default_field_index_paths() -> Vec<String> {
    vec!["API".into()]
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            config: None,
            summary: None,
            field_index: None,
            field_index_paths: default_field_index_paths(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostprocessConfig {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_entity_column")]
    pub entity_column: String,
    #[serde(default = "default_metric_column")]
    pub metric_column: String,
    #[serde(default = "default_value_column")]
    pub value_column: String,
    #[serde(default = "default_unit_column")]
    pub unit_column: String,
    /// Canonical column order.
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Reject metrics not listed in `metrics`.
    #[serde(default)]
    pub strict_metrics: bool,
}

fn default_entity_column() -> String {
    "field".into()
}
fn default_metric_column() -> String {
    "metric".into()
}
fn default_value_column() -> String {
    "value".into()
}
fn default_unit_column() -> String {
    "unit".into()
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            entity_column: default_entity_column(),
            metric_column: default_metric_column(),
            value_column: default_value_column(),
            unit_column: default_unit_column(),
            metrics: Vec::new(),
            labels: BTreeMap::new(),
            strict_metrics: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Every source, in default precedence order.
    pub fn source_order(&self) -> Vec<String> {
        self.precedence.order_for("", self.sources.keys())
    }

    /// Attributes declared by at least one source.
    pub fn declared_attributes(&self) -> BTreeSet<&str> {
        self.sources
            .values()
            .flat_map(|s| s.attributes.keys().map(String::as_str))
            .collect()
    }

    /// Descriptors declared by at least one source.
    pub fn declared_descriptors(&self) -> BTreeSet<&str> {
        self.sources
            .values()
            .flat_map(|s| s.descriptors.keys().map(String::as_str))
            .collect()
    }

    /// Output unit of an aggregate.
    pub fn aggregate_unit(&self, spec: &AggregateSpec) -> String {
        if let Some(ref unit) = spec.unit {
            return normalize_unit(unit);
        }
        match spec.kind {
            AggregateKind::Count => "wells".into(),
            AggregateKind::Ratio => String::new(),
            _ => spec
                .attribute
                .as_deref()
                .and_then(|a| self.units.canonical_unit(a))
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));

        if self.sources.is_empty() {
            return invalid("at least 1 source is required".into());
        }

        for (name, source) in &self.sources {
            if source.identifier_column.trim().is_empty() {
                return invalid(format!("source '{name}': identifier_column is empty"));
            }
            if source.header_row == Some(0) {
                return invalid(format!("source '{name}': header_row counts from 1"));
            }
            if source.header_marker.as_deref().is_some_and(|m| m.trim().is_empty()) {
                return invalid(format!("source '{name}': header_marker is empty"));
            }
        }

        // Precedence lists reference existing sources, once each
        let lists = std::iter::once(("default", &self.precedence.default)).chain(
            self.precedence
                .attributes
                .iter()
                .map(|(a, l)| (a.as_str(), l)),
        );
        for (attr, list) in lists {
            let mut seen = BTreeSet::new();
            for source in list {
                if !self.sources.contains_key(source) {
                    return invalid(format!("precedence '{attr}': unknown source '{source}'"));
                }
                if !seen.insert(source) {
                    return invalid(format!("precedence '{attr}': source '{source}' listed twice"));
                }
            }
        }

        if self.tolerance.relative < 0.0 || self.tolerance.absolute < 0.0 {
            return invalid("tolerances must be non-negative".into());
        }
        for (attr, t) in &self.tolerance.attributes {
            if t.relative.is_some_and(|v| v < 0.0) || t.absolute.is_some_and(|v| v < 0.0) {
                return invalid(format!("tolerance '{attr}': must be non-negative"));
            }
        }

        for c in &self.units.conversions {
            if !c.scale.is_finite() || c.scale == 0.0 || !c.offset.is_finite() {
                return invalid(format!(
                    "unit conversion '{}' -> '{}': scale must be finite and non-zero, offset finite",
                    c.from, c.to
                ));
            }
        }

        self.check_unit_coverage()?;
        self.validate_cohort()?;
        self.validate_aggregates()?;
        self.validate_model()?;

        if let Some(ref by) = self.grouping.by {
            if !self.declared_descriptors().contains(by.as_str()) {
                return invalid(format!("grouping: descriptor '{by}' is not declared by any source"));
            }
        }

        Ok(())
    }

    /// Every source unit must convert to its canonical unit. Checked up-front
    /// so a missing conversion fails before any data is read.
    pub fn check_unit_coverage(&self) -> Result<(), ReconError> {
        let table = self.units.table();
        for (source_name, source) in &self.sources {
            for (attr, col) in &source.attributes {
                let canonical = self.units.canonical_unit(attr).ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "source '{source_name}': attribute '{attr}' has no canonical unit"
                    ))
                })?;
                table.lookup(&col.unit, &canonical)?;
            }
        }
        for (attr, range) in &self.cohort.ranges {
            if let (Some(unit), Some(canonical)) = (&range.unit, self.units.canonical_unit(attr)) {
                table.lookup(&canonical, unit)?;
            }
        }
        Ok(())
    }

    fn validate_cohort(&self) -> Result<(), ReconError> {
        let c = &self.cohort;
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));

        if let (Some(after), Some(before)) = (c.spud_after, c.spud_before) {
            if after >= before {
                return invalid(format!("cohort: spud_after {after} is not before spud_before {before}"));
            }
        }
        if let Some(b) = c.bounds {
            let lat_ok = (-90.0..=90.0).contains(&b.min_lat) && (-90.0..=90.0).contains(&b.max_lat);
            let lon_ok =
                (-180.0..=180.0).contains(&b.min_lon) && (-180.0..=180.0).contains(&b.max_lon);
            if !lat_ok || !lon_ok {
                return invalid("cohort: bounds outside ±90 latitude / ±180 longitude".into());
            }
            if b.min_lat > b.max_lat || b.min_lon > b.max_lon {
                return invalid("cohort: bounds are inverted".into());
            }
        }
        let declared = self.declared_attributes();
        for (attr, range) in &c.ranges {
            if !declared.contains(attr.as_str()) {
                return invalid(format!("cohort range: attribute '{attr}' is not declared by any source"));
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return invalid(format!("cohort range '{attr}': min {min} > max {max}"));
                }
            }
        }
        Ok(())
    }

    fn validate_aggregates(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));
        let declared = self.declared_attributes();
        let table = self.units.table();
        let mut names = BTreeSet::new();

        for spec in &self.aggregates {
            if !names.insert(spec.name.as_str()) {
                return invalid(format!("aggregate '{}' declared twice", spec.name));
            }
            let needs = |field: &Option<String>, what: &str| -> Result<(), ReconError> {
                match field {
                    Some(attr) if declared.contains(attr.as_str()) => Ok(()),
                    Some(attr) => Err(ReconError::ConfigValidation(format!(
                        "aggregate '{}': {what} '{attr}' is not declared by any source",
                        spec.name
                    ))),
                    None => Err(ReconError::ConfigValidation(format!(
                        "aggregate '{}': {what} is required",
                        spec.name
                    ))),
                }
            };
            match spec.kind {
                AggregateKind::Count => {}
                AggregateKind::WeightedMean => {
                    needs(&spec.attribute, "attribute")?;
                    needs(&spec.weight, "weight")?;
                }
                AggregateKind::Ratio => {
                    needs(&spec.attribute, "attribute")?;
                    needs(&spec.denominator, "denominator")?;
                }
                _ => needs(&spec.attribute, "attribute")?,
            }
            // Declared output unit must be reachable from the attribute's canonical unit
            if let (Some(unit), Some(attr)) = (&spec.unit, &spec.attribute) {
                if !matches!(spec.kind, AggregateKind::Ratio | AggregateKind::Count) {
                    if let Some(canonical) = self.units.canonical_unit(attr) {
                        table.lookup(&canonical, unit)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_model(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));
        let descriptors = self.declared_descriptors();

        for p in &self.model.parameters {
            if p.path.trim().is_empty() {
                return invalid("model parameter with empty path".into());
            }
            let sources = [&p.aggregate, &p.descriptor, &p.value]
                .iter()
                .filter(|s| s.is_some())
                .count();
            if sources != 1 {
                return invalid(format!(
                    "model parameter '{}': exactly one of aggregate, descriptor, value is required",
                    p.path
                ));
            }
            if let Some(ref agg) = p.aggregate {
                let spec = self.aggregates.iter().find(|a| &a.name == agg).ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "model parameter '{}': unknown aggregate '{agg}'",
                        p.path
                    ))
                })?;
                if let Some(ref unit) = p.unit {
                    let actual = self.aggregate_unit(spec);
                    if normalize_unit(unit) != actual {
                        return invalid(format!(
                            "model parameter '{}': expects unit '{unit}', aggregate '{agg}' produces '{actual}'",
                            p.path
                        ));
                    }
                }
            }
            if let Some(ref d) = p.descriptor {
                if !descriptors.contains(d.as_str()) {
                    return invalid(format!(
                        "model parameter '{}': descriptor '{d}' is not declared by any source",
                        p.path
                    ));
                }
            }
            if p.kind == ParamKind::Number {
                if let Some(ref default) = p.default {
                    if default.parse::<f64>().is_err() {
                        return invalid(format!(
                            "model parameter '{}': numeric default '{default}' is not a number",
                            p.path
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
