//! Reconciliation join: one `ReconciledWell` per cohort identifier.
//!
//! Each attribute is resolved through its precedence list. Numeric values are
//! compared in canonical units; a disagreement beyond tolerance keeps the
//! higher-precedence value and raises `Conflicting`. Gaps raise `Missing`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::cohort::Cohort;
use crate::config::{PipelineConfig, SourceConfig};
use crate::error::ReconError;
use crate::model::{
    Flag, Flagged, Measured, Merged, ReconciledWell, Reconciliation, SourceRecords, WellRecord,
};
use crate::units::ConversionTable;

/// One source's records for one well, collapsed to a single view.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Collapsed {
    pub first_period: Option<NaiveDate>,
    pub period: Option<NaiveDate>,
    pub attributes: BTreeMap<String, Measured>,
    pub descriptors: BTreeMap<String, String>,
}

/// Keep the latest reporting period; average its numeric values and take the
/// smallest descriptor text. Input order does not matter.
pub(crate) fn collapse(records: &[&WellRecord]) -> Collapsed {
    let first_period = records.iter().filter_map(|r| r.period).min();
    let period = records.iter().filter_map(|r| r.period).max();
    let latest = records.iter().filter(|r| r.period == period);

    let mut values: BTreeMap<&str, (Vec<f64>, &str)> = BTreeMap::new();
    let mut descriptors: BTreeMap<String, String> = BTreeMap::new();
    for rec in latest {
        for (name, m) in &rec.attributes {
            values
                .entry(name.as_str())
                .or_insert_with(|| (Vec::new(), m.unit.as_str()))
                .0
                .push(m.value);
        }
        for (name, text) in &rec.descriptors {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match descriptors.get_mut(name) {
                Some(current) if text < current.as_str() => *current = text.to_string(),
                Some(_) => {}
                None => {
                    descriptors.insert(name.clone(), text.to_string());
                }
            }
        }
    }

    let attributes = values
        .into_iter()
        .map(|(name, (mut vs, unit))| {
            vs.sort_by(f64::total_cmp);
            let mean = vs.iter().sum::<f64>() / vs.len() as f64;
            (
                name.to_string(),
                Measured {
                    value: mean,
                    unit: unit.to_string(),
                },
            )
        })
        .collect();

    Collapsed {
        first_period,
        period,
        attributes,
        descriptors,
    }
}

/// Placeholder for a cohort well that no source has.
fn absent<T>(well: &str, attribute: &str) -> Merged<T> {
    Merged {
        source: None,
        value: Flagged::clean(None).with_flag(Flag::Missing {
            well: well.into(),
            attribute: attribute.into(),
            source: None,
        }),
    }
}

/// Join the cohort's records from every loaded source.
pub fn reconcile(
    config: &PipelineConfig,
    cohort: &Cohort,
    loaded: &[SourceRecords],
    table: &ConversionTable,
) -> Result<Reconciliation, ReconError> {
    let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&WellRecord>>> = BTreeMap::new();
    for src in loaded {
        for rec in src.records.iter().filter(|r| cohort.contains(&r.identifier)) {
            grouped
                .entry(rec.identifier.as_str())
                .or_default()
                .entry(src.source.as_str())
                .or_default()
                .push(rec);
        }
    }

    let attributes = config.declared_attributes();
    let descriptors = config.declared_descriptors();

    let mut wells = Vec::with_capacity(cohort.len());
    let mut conflicts = Vec::new();
    let mut missing_wells = Vec::new();

    for id in cohort.iter() {
        let Some(per_source) = grouped.get(id.as_str()) else {
            debug!(well = id.as_str(), "absent from every source");
            missing_wells.push(id.clone());
            wells.push(ReconciledWell {
                identifier: id.clone(),
                attributes: attributes.iter().map(|a| (a.to_string(), absent(id, a))).collect(),
                descriptors: descriptors.iter().map(|d| (d.to_string(), absent(id, d))).collect(),
            });
            continue;
        };

        let views: BTreeMap<&str, Collapsed> =
            per_source.iter().map(|(s, recs)| (*s, collapse(recs))).collect();

        let mut well = ReconciledWell {
            identifier: id.clone(),
            attributes: BTreeMap::new(),
            descriptors: BTreeMap::new(),
        };

        for attr in &attributes {
            let merged = merge_attribute(config, table, id, attr, &views)?;
            conflicts.extend(
                merged
                    .value
                    .flags
                    .iter()
                    .filter(|f| matches!(f, Flag::Conflicting { .. }))
                    .cloned(),
            );
            well.attributes.insert(attr.to_string(), merged);
        }
        for desc in &descriptors {
            let merged = merge_descriptor(config, id, desc, &views);
            conflicts.extend(
                merged
                    .value
                    .flags
                    .iter()
                    .filter(|f| matches!(f, Flag::Conflicting { .. }))
                    .cloned(),
            );
            well.descriptors.insert(desc.to_string(), merged);
        }
        wells.push(well);
    }

    info!(
        wells = wells.len(),
        conflicts = conflicts.len(),
        missing_wells = missing_wells.len(),
        "reconciled cohort"
    );
    Ok(Reconciliation {
        wells,
        conflicts,
        missing_wells,
    })
}

/// Sources that declare `name`, in its precedence order.
fn declaring_sources(
    config: &PipelineConfig,
    name: &str,
    declares: impl Fn(&SourceConfig) -> bool,
) -> Vec<String> {
    config
        .precedence
        .order_for(name, config.sources.keys())
        .into_iter()
        .filter(|s| config.sources.get(s).is_some_and(&declares))
        .collect()
}

fn merge_attribute(
    config: &PipelineConfig,
    table: &ConversionTable,
    well: &str,
    attr: &str,
    views: &BTreeMap<&str, Collapsed>,
) -> Result<Merged<Measured>, ReconError> {
    let order = declaring_sources(config, attr, |s| s.attributes.contains_key(attr));
    let canonical = config.units.canonical_unit(attr).ok_or_else(|| {
        ReconError::ConfigValidation(format!("attribute '{attr}' has no canonical unit"))
    })?;

    let mut flags = Vec::new();
    let mut candidates: Vec<(&str, &Measured, f64)> = Vec::new();
    for source in &order {
        match views.get(source.as_str()).and_then(|v| v.attributes.get(attr)) {
            Some(m) => {
                let c = table.convert(m.value, &m.unit, &canonical)?;
                candidates.push((source.as_str(), m, c));
            }
            None => flags.push(Flag::Missing {
                well: well.into(),
                attribute: attr.into(),
                source: Some(source.clone()),
            }),
        }
    }

    let Some(&(kept_source, kept, kept_value)) = candidates.first() else {
        return Ok(Merged {
            source: None,
            value: Flagged::new(None, flags),
        });
    };
    for &(rejected, _, value) in &candidates[1..] {
        if !config.tolerance.agrees(attr, kept_value, value) {
            warn!(
                well,
                attribute = attr,
                kept = kept_source,
                kept_value,
                rejected,
                rejected_value = value,
                unit = canonical.as_str(),
                "conflicting values"
            );
            flags.push(Flag::Conflicting {
                well: well.into(),
                attribute: attr.into(),
                kept: kept_source.into(),
                rejected: rejected.into(),
                delta: Some(value - kept_value),
            });
        }
    }

    Ok(Merged {
        source: Some(kept_source.to_string()),
        value: Flagged::new(Some(kept.clone()), flags),
    })
}

fn merge_descriptor(
    config: &PipelineConfig,
    well: &str,
    desc: &str,
    views: &BTreeMap<&str, Collapsed>,
) -> Merged<String> {
    let order = declaring_sources(config, desc, |s| s.descriptors.contains_key(desc));

    let mut flags = Vec::new();
    let mut candidates: Vec<(&str, &str)> = Vec::new();
    for source in &order {
        match views.get(source.as_str()).and_then(|v| v.descriptors.get(desc)) {
            Some(text) => candidates.push((source.as_str(), text.as_str())),
            None => flags.push(Flag::Missing {
                well: well.into(),
                attribute: desc.into(),
                source: Some(source.clone()),
            }),
        }
    }

    let Some(&(kept_source, kept)) = candidates.first() else {
        return Merged {
            source: None,
            value: Flagged::new(None, flags),
        };
    };
    let folded = kept.trim().to_lowercase();
    for &(rejected, text) in &candidates[1..] {
        if text.trim().to_lowercase() != folded {
            warn!(well, descriptor = desc, kept, rejected_value = text, "conflicting descriptor");
            flags.push(Flag::Conflicting {
                well: well.into(),
                attribute: desc.into(),
                kept: kept_source.into(),
                rejected: rejected.into(),
                delta: None,
            });
        }
    }

    Merged {
        source: Some(kept_source.to_string()),
        value: Flagged::new(Some(kept.to_string()), flags),
    }
}
