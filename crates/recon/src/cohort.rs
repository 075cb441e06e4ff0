//! Well cohort selection.
//!
//! Every supplied criterion must hold (logical AND). A criterion that needs
//! data the well does not have is not satisfied. An empty cohort is a valid
//! `Ok`; a criterion that cannot be evaluated is an `Err`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::config::{CohortCriteria, HorizontalFilter, PipelineConfig};
use crate::error::ReconError;
use crate::identifier::{normalize, IdentifierFormat, DEFAULT_LABEL_WIDTH};
use crate::join::{collapse, Collapsed};
use crate::model::{SourceRecords, WellRecord};
use crate::units::ConversionTable;

/// Logical descriptor names the selector understands.
pub const OPERATOR: &str = "operator";
pub const FIELD: &str = "field";
pub const PROVINCE: &str = "province";
pub const FORMATION: &str = "formation";
pub const HORIZONTAL: &str = "horizontal";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

/// Formations matched by the `tight_oil` shorthand.
pub const TIGHT_OIL_FORMATIONS: &[&str] = &[
    "Mbakken_M", "Dtorquay", "D3_forks", "Dbvrhl_lk", "Dswan_hl", "Kcard_ss", "TRchly_lk",
    "TRbndrylk", "Kdunvegan", "Dduvernay", "Jshaunv_L", "TRmontney", "TRdoig", "Mpekisko",
    "Dslave_pt", "Kvik_ss",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cohort {
    pub wells: BTreeSet<String>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.wells.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.wells.iter()
    }
}

/// What the selector sees of one well: each source collapsed, in default
/// precedence order.
struct WellView {
    sources: Vec<Collapsed>,
}

impl WellView {
    fn descriptor(&self, name: &str) -> Option<&str> {
        self.sources
            .iter()
            .find_map(|c| c.descriptors.get(name).map(String::as_str))
    }

    /// Earliest period reported by any source.
    fn first_period(&self) -> Option<NaiveDate> {
        self.sources.iter().filter_map(|c| c.first_period).min()
    }

    fn attribute(&self, name: &str) -> Option<(f64, &str)> {
        self.sources
            .iter()
            .find_map(|c| c.attributes.get(name).map(|m| (m.value, m.unit.as_str())))
    }

    fn coordinate(&self, name: &str) -> Option<f64> {
        self.descriptor(name)
            .and_then(|s| s.trim().parse().ok())
            .or_else(|| self.attribute(name).map(|(v, _)| v))
    }
}

fn eq_any(value: Option<&str>, wanted: &[String]) -> bool {
    value.is_some_and(|v| wanted.iter().any(|w| w.trim().eq_ignore_ascii_case(v.trim())))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "T" | "TRUE" | "Y" | "YES" | "1" => Some(true),
        "F" | "FALSE" | "N" | "NO" | "0" => Some(false),
        _ => None,
    }
}

fn expand_formations(formations: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for f in formations {
        let key = f.trim().to_ascii_lowercase().replace(['_', ' '], "");
        if key == "tightoil" {
            out.extend(TIGHT_OIL_FORMATIONS.iter().map(|s| s.to_ascii_lowercase()));
        } else {
            out.push(f.trim().to_ascii_lowercase());
        }
    }
    out
}

/// Label widths an explicit cohort entry may be padded to, most preferred first.
fn label_widths(config: &PipelineConfig) -> Vec<usize> {
    if let Some(width) = config.cohort.label_width {
        return vec![width];
    }
    let mut widths: Vec<usize> = Vec::new();
    for name in config.source_order() {
        if let Some(source) = config.sources.get(&name) {
            if !widths.contains(&source.label_width) {
                widths.push(source.label_width);
            }
        }
    }
    if widths.is_empty() {
        widths.push(DEFAULT_LABEL_WIDTH);
    }
    widths
}

/// Normalize one explicit cohort entry. Labels take the width of the first
/// source that actually has the well, else the highest-precedence width.
fn explicit_id<V>(
    raw: &str,
    format: IdentifierFormat,
    widths: &[usize],
    loaded: &BTreeMap<&str, V>,
) -> Result<String, ReconError> {
    let mut first = None;
    for &width in widths {
        let id = normalize(raw, format, width, "cohort")?;
        if loaded.contains_key(id.as_str()) {
            return Ok(id);
        }
        first.get_or_insert(id);
    }
    match first {
        Some(id) => Ok(id),
        None => normalize(raw, format, DEFAULT_LABEL_WIDTH, "cohort"),
    }
}

/// Select the cohort from loaded sources.
pub fn select(
    config: &PipelineConfig,
    loaded: &[SourceRecords],
    table: &ConversionTable,
) -> Result<Cohort, ReconError> {
    let criteria = &config.cohort;

    // Group each source's records by well
    let order = config.source_order();
    let mut by_well: BTreeMap<&str, BTreeMap<&str, Vec<&WellRecord>>> = BTreeMap::new();
    for src in loaded {
        for rec in &src.records {
            by_well
                .entry(rec.identifier.as_str())
                .or_default()
                .entry(src.source.as_str())
                .or_default()
                .push(rec);
        }
    }

    let universe: BTreeSet<String> = if criteria.wells.is_empty() {
        by_well.keys().map(|k| k.to_string()).collect()
    } else {
        let widths = label_widths(config);
        criteria
            .wells
            .iter()
            .map(|raw| explicit_id(raw, criteria.identifier_format, &widths, &by_well))
            .collect::<Result<_, _>>()?
    };

    let formations = expand_formations(&criteria.formations);
    let mut wells = BTreeSet::new();

    for id in universe {
        let view = WellView {
            sources: by_well
                .get(id.as_str())
                .map(|per_source| {
                    order
                        .iter()
                        .filter_map(|s| per_source.get(s.as_str()))
                        .map(|recs| collapse(recs))
                        .collect()
                })
                .unwrap_or_default(),
        };
        if matches(&view, criteria, &formations, config, table)? {
            wells.insert(id);
        }
    }

    info!(
        selected = wells.len(),
        loaded_wells = by_well.len(),
        unfiltered = criteria.is_unfiltered(),
        "cohort selected"
    );
    Ok(Cohort { wells })
}

fn matches(
    view: &WellView,
    c: &CohortCriteria,
    formations: &[String],
    config: &PipelineConfig,
    table: &ConversionTable,
) -> Result<bool, ReconError> {
    if c.spud_after.is_some() || c.spud_before.is_some() {
        let Some(date) = view.first_period() else {
            return Ok(false);
        };
        if c.spud_after.is_some_and(|after| date <= after)
            || c.spud_before.is_some_and(|before| date >= before)
        {
            return Ok(false);
        }
    }

    if !c.operators.is_empty() && !eq_any(view.descriptor(OPERATOR), &c.operators) {
        return Ok(false);
    }
    if !c.fields.is_empty() && !eq_any(view.descriptor(FIELD), &c.fields) {
        return Ok(false);
    }
    if !c.provinces.is_empty() && !eq_any(view.descriptor(PROVINCE), &c.provinces) {
        return Ok(false);
    }
    if !formations.is_empty() {
        let Some(formation) = view.descriptor(FORMATION) else {
            return Ok(false);
        };
        let formation = formation.to_ascii_lowercase();
        if !formations.iter().any(|f| formation.contains(f.as_str())) {
            return Ok(false);
        }
    }

    match c.horizontal {
        HorizontalFilter::Both => {}
        wanted => {
            let Some(is_horizontal) = view.descriptor(HORIZONTAL).and_then(parse_flag) else {
                return Ok(false);
            };
            if is_horizontal != (wanted == HorizontalFilter::Horizontal) {
                return Ok(false);
            }
        }
    }

    if let Some(b) = c.bounds {
        let (Some(lat), Some(lon)) = (view.coordinate(LATITUDE), view.coordinate(LONGITUDE)) else {
            return Ok(false);
        };
        if lat < b.min_lat || lat > b.max_lat || lon < b.min_lon || lon > b.max_lon {
            return Ok(false);
        }
    }

    for (attr, range) in &c.ranges {
        let Some((value, unit)) = view.attribute(attr) else {
            return Ok(false);
        };
        let canonical = config
            .units
            .canonical_unit(attr)
            .ok_or_else(|| ReconError::ConfigValidation(format!("attribute '{attr}' has no canonical unit")))?;
        let mut v = table.convert(value, unit, &canonical)?;
        if let Some(ref range_unit) = range.unit {
            v = table.convert(v, &canonical, range_unit)?;
        }
        if range.min.is_some_and(|min| v < min) || range.max.is_some_and(|max| v > max) {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_source;

    const CONFIG: &str = r#"
name = "Cohort"

[sources.geoscout]
file = "geoscout.csv"
identifier_column = "CPA Well ID"
identifier_format = "uwi"
date_column = "Date Well Spudded"
[sources.geoscout.descriptors]
operator = "Cur Operator Name"
field = "Producing Field/Area Name"
formation = "Prod./Inject. Frmtn"
province = "Area"
horizontal = "Horizontal Hole (T/F)"
latitude = "Lat"
longitude = "Lon"
[sources.geoscout.attributes]
gor = { column = "First 12 mo. Ave GOR (m3/m3)", unit = "m3/m3" }

[units.canonical]
gor = "scf/bbl"
"#;

    const CSV: &str = "\
CPA Well ID,Date Well Spudded,Cur Operator Name,Producing Field/Area Name,Prod./Inject. Frmtn,Area,Horizontal Hole (T/F),Lat,Lon,First 12 mo. Ave GOR (m3/m3)
100/01-01-001-01W4/00,2012-01-01,Acme Oil,HERITAGE,TRmontney,AB,T,55.1,-118.2,100
100/02-01-001-01W4/00,2008-06-01,Acme Oil,HERITAGE,Dduvernay,AB,F,54.0,-117.0,300
100/03-01-001-01W4/00,2015-03-01,Borealis,WASKAHIGAN,Kcard_ss,BC,T,56.0,-121.5,
100/04-01-001-01W4/00,2016-03-01,Borealis,WASKAHIGAN,Kbelly_rv,SK,T,,,50
";

    fn run(extra: &str) -> Result<Cohort, ReconError> {
        let config = PipelineConfig::from_toml(&format!("{CONFIG}\n{extra}")).unwrap();
        let loaded = vec![load_source("geoscout", CSV, &config.sources["geoscout"]).unwrap()];
        select(&config, &loaded, &config.units.table())
    }

    fn ids(c: &Cohort) -> Vec<&str> {
        c.iter().map(|s| &s[3..9]).collect()
    }

    #[test]
    fn no_filters_returns_every_loaded_well() {
        let cohort = run("").unwrap();
        assert_eq!(cohort.len(), 4);
    }

    #[test]
    fn spud_date_bounds_are_exclusive() {
        let cohort = run("[cohort]\nspud_after = \"2008-06-01\"\nspud_before = \"2016-03-01\"").unwrap();
        assert_eq!(ids(&cohort), vec!["010100", "030100"]);
    }

    #[test]
    fn province_and_horizontal_combine_with_and() {
        let cohort = run("[cohort]\nprovinces = [\"ab\", \"BC\"]\nhorizontal = \"t\"").unwrap();
        assert_eq!(ids(&cohort), vec!["010100", "030100"]);
    }

    #[test]
    fn tight_oil_shorthand_expands() {
        let cohort = run("[cohort]\nformations = [\"TightOil\"]").unwrap();
        // Kbelly_rv is not in the tight-oil list
        assert_eq!(ids(&cohort), vec!["010100", "020100", "030100"]);
    }

    #[test]
    fn formation_is_substring_match() {
        let cohort = run("[cohort]\nformations = [\"montney\"]").unwrap();
        assert_eq!(ids(&cohort), vec!["010100"]);
    }

    #[test]
    fn bounds_exclude_wells_without_coordinates() {
        let cohort = run(
            "[cohort.bounds]\nmin_lat = 50.0\nmax_lat = 60.0\nmin_lon = -125.0\nmax_lon = -110.0",
        )
        .unwrap();
        assert_eq!(cohort.len(), 3);
        assert!(!cohort.iter().any(|id| id.starts_with("10004")));
    }

    #[test]
    fn range_is_evaluated_in_requested_unit() {
        // 100 and 300 m3/m3; 50 m3/m3; third well has no GOR
        let cohort = run("[cohort.ranges.gor]\nmin = 60.0\nmax = 200.0\nunit = \"m3/m3\"").unwrap();
        assert_eq!(ids(&cohort), vec!["010100"]);
        let cohort = run("[cohort.ranges.gor]\nmax = 1000.0").unwrap();
        // canonical scf/bbl: 100 m3/m3 ≈ 561 scf/bbl, 50 ≈ 281
        assert_eq!(ids(&cohort), vec!["010100", "040100"]);
    }

    #[test]
    fn explicit_list_keeps_absent_wells() {
        let cohort = run("[cohort]\nwells = [\"100/01-01-001-01W4/00\", \"100/09-09-009-09W5/00\"]").unwrap();
        assert_eq!(cohort.len(), 2);
        assert!(cohort.contains("100090900909W500"));
    }

    #[test]
    fn explicit_list_with_filter_drops_absent_wells() {
        let cohort = run(
            "[cohort]\nwells = [\"100/01-01-001-01W4/00\", \"100/09-09-009-09W5/00\"]\nprovinces = [\"AB\"]",
        )
        .unwrap();
        assert_eq!(cohort.len(), 1);
    }

    #[test]
    fn empty_result_is_ok() {
        let cohort = run("[cohort]\noperators = [\"Nobody\"]").unwrap();
        assert!(cohort.is_empty());
    }

    const LABELS: &str = r#"
name = "Labels"

[sources.wide]
file = "wide.csv"
identifier_column = "Well"
identifier_format = "label"
label_width = 5
[sources.wide.attributes]
oil = { column = "Oil", unit = "bbl/d" }

[units.canonical]
oil = "bbl/d"
"#;

    fn run_labels(extra: &str) -> Result<Cohort, ReconError> {
        let config = PipelineConfig::from_toml(&format!("{LABELS}\n{extra}")).unwrap();
        let loaded = vec![load_source("wide", "Well,Oil\nW-1,100\n", &config.sources["wide"]).unwrap()];
        select(&config, &loaded, &config.units.table())
    }

    #[test]
    fn explicit_label_takes_source_width() {
        let cohort = run_labels("[cohort]\nwells = [\"W-1\"]\nidentifier_format = \"label\"").unwrap();
        assert_eq!(cohort.iter().map(String::as_str).collect::<Vec<_>>(), vec!["W-00001"]);
    }

    #[test]
    fn explicit_label_width_overrides_sources() {
        let cohort = run_labels(
            "[cohort]\nwells = [\"W-1\"]\nidentifier_format = \"label\"\nlabel_width = 3",
        )
        .unwrap();
        assert!(cohort.contains("W-001"));
        assert!(!cohort.contains("W-00001"));
    }

    #[test]
    fn spud_date_is_earliest_across_sources() {
        let extra = r#"
[sources.drilling]
file = "drilling.csv"
identifier_column = "UWI"
identifier_format = "uwi"
date_column = "Rig Release"

[precedence]
default = ["geoscout", "drilling"]

[cohort]
spud_before = "2010-01-01"
"#;
        let config = PipelineConfig::from_toml(&format!("{CONFIG}\n{extra}")).unwrap();
        let drilling = "UWI,Rig Release\n100/01-01-001-01W4/00,2009-11-15\n";
        let loaded = vec![
            load_source("geoscout", CSV, &config.sources["geoscout"]).unwrap(),
            load_source("drilling", drilling, &config.sources["drilling"]).unwrap(),
        ];
        let cohort = select(&config, &loaded, &config.units.table()).unwrap();
        // well 01 spudded 2012 per geoscout, but drilling saw it in 2009
        assert_eq!(ids(&cohort), vec!["010100", "020100"]);
    }

    #[test]
    fn malformed_explicit_well_is_an_error() {
        let err = run("[cohort]\nwells = [\"???\"]").unwrap_err();
        assert_eq!(err.kind(), "malformed_identifier");
    }
}
