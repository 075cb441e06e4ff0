//! Canonical units and group aggregates.
//!
//! Every reduction sorts its contributions by well identifier before folding,
//! so the result never depends on input order.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::{AggregateKind, AggregateSpec, PipelineConfig};
use crate::error::ReconError;
use crate::model::{
    AggregateParameterSet, CanonicalValue, CanonicalWell, Flag, Flagged, Reconciliation,
};
use crate::units::ConversionTable;

/// Group for wells lacking the grouping descriptor.
pub const UNASSIGNED: &str = "unassigned";

/// Convert every reconciled attribute to its canonical unit.
pub fn to_canonical(
    config: &PipelineConfig,
    reconciliation: &Reconciliation,
    table: &ConversionTable,
) -> Result<Vec<CanonicalWell>, ReconError> {
    let mut out = Vec::with_capacity(reconciliation.wells.len());
    for well in &reconciliation.wells {
        let mut attributes = BTreeMap::new();
        for (name, merged) in &well.attributes {
            let unit = config.units.canonical_unit(name).ok_or_else(|| {
                ReconError::ConfigValidation(format!("attribute '{name}' has no canonical unit"))
            })?;
            let value = match merged.value.value {
                Some(ref m) => Some(table.convert(m.value, &m.unit, &unit)?),
                None => None,
            };
            attributes.insert(
                name.clone(),
                CanonicalValue {
                    unit,
                    value: Flagged::new(value, merged.value.flags.clone()),
                },
            );
        }
        let descriptors = well
            .descriptors
            .iter()
            .map(|(name, merged)| (name.clone(), merged.value.clone()))
            .collect();
        out.push(CanonicalWell {
            identifier: well.identifier.clone(),
            attributes,
            descriptors,
        });
    }
    Ok(out)
}

/// Split wells into named groups, each sorted by identifier.
pub fn group<'a>(
    config: &PipelineConfig,
    wells: &'a [CanonicalWell],
) -> BTreeMap<String, Vec<&'a CanonicalWell>> {
    let mut groups: BTreeMap<String, Vec<&CanonicalWell>> = BTreeMap::new();
    for well in wells {
        let name = match config.grouping.by {
            Some(ref by) => well
                .descriptor(by)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNASSIGNED)
                .to_string(),
            None => config.name.clone(),
        };
        groups.entry(name).or_default().push(well);
    }
    for members in groups.values_mut() {
        members.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    }
    groups
}

/// Compute every declared aggregate for every group.
pub fn aggregate(
    config: &PipelineConfig,
    wells: &[CanonicalWell],
    table: &ConversionTable,
) -> Result<Vec<AggregateParameterSet>, ReconError> {
    let descriptors = config.declared_descriptors();
    let mut sets = Vec::new();

    for (name, members) in group(config, wells) {
        let mut parameters = BTreeMap::new();
        for spec in &config.aggregates {
            let value = compute(config, spec, &name, &members, table)?;
            parameters.insert(spec.name.clone(), value);
        }

        let descriptors = descriptors
            .iter()
            .map(|d| {
                let value = members
                    .iter()
                    .find_map(|w| w.descriptors.get(*d).filter(|v| v.value.is_some()))
                    .cloned()
                    .unwrap_or_else(|| Flagged::clean(None));
                (d.to_string(), value)
            })
            .collect();

        debug!(group = name.as_str(), wells = members.len(), "aggregated group");
        sets.push(AggregateParameterSet {
            group: name,
            wells: members.iter().map(|w| w.identifier.clone()).collect(),
            parameters,
            descriptors,
        });
    }
    Ok(sets)
}

/// Values of `attribute` over `members`, plus the flags those values carry.
fn column<'a>(
    members: &[&'a CanonicalWell],
    attribute: &str,
) -> Vec<(&'a str, Option<f64>, &'a [Flag])> {
    members
        .iter()
        .map(|w| match w.attributes.get(attribute) {
            Some(v) => (w.identifier.as_str(), v.value.value, v.value.flags.as_slice()),
            None => (w.identifier.as_str(), None, &[][..]),
        })
        .collect()
}

fn compute(
    config: &PipelineConfig,
    spec: &AggregateSpec,
    group: &str,
    members: &[&CanonicalWell],
    table: &ConversionTable,
) -> Result<CanonicalValue, ReconError> {
    let unit = config.aggregate_unit(spec);
    let mut flags: Vec<Flag> = Vec::new();
    let mut absorb = |col: &[(&str, Option<f64>, &[Flag])]| {
        for (_, _, fs) in col {
            for f in fs.iter() {
                if !flags.contains(f) {
                    flags.push(f.clone());
                }
            }
        }
    };

    let attribute = spec.attribute.as_deref().unwrap_or_default();
    let primary = column(members, attribute);

    let raw: Option<f64> = match spec.kind {
        AggregateKind::Count => Some(members.len() as f64),
        AggregateKind::Sum | AggregateKind::Mean | AggregateKind::Min | AggregateKind::Max => {
            absorb(&primary);
            let values: Vec<f64> = primary.iter().filter_map(|(_, v, _)| *v).collect();
            if values.is_empty() {
                None
            } else {
                Some(match spec.kind {
                    AggregateKind::Sum => values.iter().sum(),
                    AggregateKind::Mean => values.iter().sum::<f64>() / values.len() as f64,
                    AggregateKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    _ => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                })
            }
        }
        AggregateKind::WeightedMean | AggregateKind::Ratio => {
            let other_name = match spec.kind {
                AggregateKind::WeightedMean => spec.weight.as_deref(),
                _ => spec.denominator.as_deref(),
            }
            .unwrap_or_default();
            let other = column(members, other_name);
            absorb(&primary);
            absorb(&other);
            let pairs: Vec<(f64, f64)> = primary
                .iter()
                .zip(&other)
                .filter_map(|((_, v, _), (_, w, _))| Some(((*v)?, (*w)?)))
                .collect();
            if spec.kind == AggregateKind::WeightedMean {
                let weight: f64 = pairs.iter().map(|(_, w)| w).sum();
                (weight != 0.0).then(|| pairs.iter().map(|(v, w)| v * w).sum::<f64>() / weight)
            } else {
                let num: f64 = pairs.iter().map(|(v, _)| v).sum();
                let den: f64 = pairs.iter().map(|(_, d)| d).sum();
                (!pairs.is_empty() && den != 0.0).then(|| num / den * spec.scale.unwrap_or(1.0))
            }
        }
    };

    // Declared output unit may differ from the attribute's canonical one
    let converts = !matches!(spec.kind, AggregateKind::Count | AggregateKind::Ratio);
    let value = match (raw, spec.attribute.as_deref()) {
        (Some(v), Some(attr)) if converts => {
            let canonical = config.units.canonical_unit(attr).unwrap_or_default();
            Some(table.convert(v, &canonical, &unit)?)
        }
        (v, _) => v,
    };

    let value = match value {
        Some(v) => Flagged::new(Some(v), flags),
        None => {
            let shortfall = ReconError::InsufficientData {
                group: group.into(),
                aggregate: spec.name.clone(),
            };
            match spec.default {
                Some(default) => {
                    warn!(default, "{shortfall}; substituting default");
                    let mut f = Flagged::new(Some(default), flags);
                    f.flag(Flag::DefaultSubstituted {
                        default: default.to_string(),
                    });
                    f
                }
                None => {
                    warn!("{shortfall}");
                    let mut f = Flagged::new(None, flags);
                    f.flag(Flag::InsufficientData {
                        aggregate: spec.name.clone(),
                    });
                    f
                }
            }
        }
    };

    Ok(CanonicalValue { unit, value })
}
