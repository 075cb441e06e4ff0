//! EmissionsConfig builder: parameter sets + model schema → config tree.
//!
//! Rendering to bytes happens in `wellset-io`; this module decides which
//! value each model path gets and records why.

use tracing::{debug, info, warn};

use crate::config::{ModelParameter, ParamKind, PipelineConfig};
use crate::error::ReconError;
use crate::model::{
    AggregateParameterSet, AnalysisBlock, AuditEntry, ConfigEntry, ConfigValue, EmissionsConfig,
    FieldBlock, Flag, Flagged,
};

/// Schema used when none is declared: one optional numeric path per aggregate.
fn derived_schema(config: &PipelineConfig) -> Vec<ModelParameter> {
    config
        .aggregates
        .iter()
        .map(|a| ModelParameter {
            path: a.name.clone(),
            process: None,
            aggregate: Some(a.name.clone()),
            descriptor: None,
            value: None,
            kind: ParamKind::Number,
            unit: None,
            required: false,
            default: a.default.map(|d| d.to_string()),
            min: None,
            map: Default::default(),
        })
        .collect()
}

fn parse_value(raw: &str, kind: ParamKind) -> Option<ConfigValue> {
    match kind {
        ParamKind::Text => Some(ConfigValue::Text(raw.to_string())),
        ParamKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ConfigValue::Number),
    }
}

/// Resolve one path for one parameter set. `Ok(None)` means the optional
/// path has nothing to emit.
fn resolve(
    param: &ModelParameter,
    set: &AggregateParameterSet,
) -> Result<Option<ConfigEntry>, ReconError> {
    let mut value: Flagged<Option<ConfigValue>> = if let Some(ref agg) = param.aggregate {
        match set.parameters.get(agg) {
            Some(v) => Flagged::new(v.value.value.map(ConfigValue::Number), v.value.flags.clone()),
            None => Flagged::clean(None),
        }
    } else if let Some(ref desc) = param.descriptor {
        match set.descriptors.get(desc) {
            Some(d) => Flagged::new(
                d.value.as_deref().and_then(|s| parse_value(s, param.kind)),
                d.flags.clone(),
            ),
            None => Flagged::clean(None),
        }
    } else if let Some(ref literal) = param.value {
        let parsed = parse_value(literal, param.kind).ok_or_else(|| {
            ReconError::ConfigValidation(format!(
                "model parameter '{}': value '{literal}' is not a number",
                param.path
            ))
        })?;
        Flagged::clean(Some(parsed))
    } else {
        Flagged::clean(None)
    };

    // Code → label
    if !param.map.is_empty() {
        if let Some(ref v) = value.value {
            if let Some(label) = param.map.get(v.to_string().trim()) {
                value.value = Some(ConfigValue::Text(label.clone()));
            }
        }
    }

    let Flagged { value, mut flags } = value;
    let (mut value, is_default) = match value {
        Some(v) => (v, false),
        None => match param.default {
            Some(ref default) => {
                let v = parse_value(default, param.kind).ok_or_else(|| {
                    ReconError::ConfigValidation(format!(
                        "model parameter '{}': default '{default}' is not a number",
                        param.path
                    ))
                })?;
                let substituted = Flag::DefaultSubstituted {
                    default: default.clone(),
                };
                if !flags.contains(&substituted) {
                    flags.push(substituted);
                }
                warn!(
                    group = set.group.as_str(),
                    path = param.path.as_str(),
                    default = default.as_str(),
                    "using model default"
                );
                (v, true)
            }
            None if param.required => {
                return Err(ReconError::SchemaViolation {
                    group: set.group.clone(),
                    path: param.path.clone(),
                })
            }
            None => return Ok(None),
        },
    };

    if let (Some(min), ConfigValue::Number(n)) = (param.min, &mut value) {
        if *n < min {
            debug!(
                group = set.group.as_str(),
                path = param.path.as_str(),
                value = *n,
                min,
                "raised to floor"
            );
            *n = min;
        }
    }

    Ok(Some(ConfigEntry {
        path: param.path.clone(),
        process: param.process.clone(),
        is_default,
        value: Flagged::new(value, flags),
    }))
}

/// Build the config tree for every parameter set, in set order.
pub fn build(
    config: &PipelineConfig,
    sets: &[AggregateParameterSet],
) -> Result<EmissionsConfig, ReconError> {
    let derived;
    let schema = if config.model.parameters.is_empty() {
        derived = derived_schema(config);
        &derived
    } else {
        &config.model.parameters
    };

    let mut fields = Vec::with_capacity(sets.len());
    let mut audit = Vec::new();
    for set in sets {
        let mut entries = Vec::with_capacity(schema.len());
        for param in schema {
            let Some(entry) = resolve(param, set)? else {
                continue;
            };
            if !entry.value.flags.is_empty() {
                audit.push(AuditEntry {
                    group: set.group.clone(),
                    path: entry.path.clone(),
                    flags: entry.value.flags.clone(),
                });
            }
            entries.push(entry);
        }
        fields.push(FieldBlock {
            name: set.group.clone(),
            entries,
        });
    }

    info!(
        fields = fields.len(),
        paths = schema.len(),
        audited = audit.len(),
        "built emissions config"
    );
    Ok(EmissionsConfig {
        analysis: AnalysisBlock {
            name: config.analysis.name.clone(),
            attributes: config
                .analysis
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
        fields,
        audit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalValue, FlagKind};
    use std::collections::BTreeMap;

    const BASE: &str = r#"
name = "Emit"

[sources.prod]
file = "prod.csv"
identifier_column = "well"
[sources.prod.attributes]
oil = { column = "oil", unit = "bbl/d" }
gor = { column = "gor", unit = "scf/bbl" }
[sources.prod.descriptors]
flood = "flood"
api = "api"

[units.canonical]
oil = "bbl/d"
gor = "scf/bbl"

[[aggregates]]
name = "oil_prod"
kind = "sum"
attribute = "oil"

[[aggregates]]
name = "GOR"
kind = "mean"
attribute = "gor"
"#;

    const SCHEMA: &str = r#"
[analysis]
name = "FUSE_run"
[analysis.attributes]
functional_unit = "oil"
GWP_horizon = "100"

[[model.parameters]]
path = "oil_prod"
aggregate = "oil_prod"
unit = "bbl/d"

[[model.parameters]]
path = "GOR"
aggregate = "GOR"
min = 0.00001
default = "0"

[[model.parameters]]
path = "flood_gas_type"
descriptor = "flood"
kind = "text"
required = false
[model.parameters.map]
1 = "NG"
2 = "N2"
3 = "CO2"

[[model.parameters]]
path = "heater_treater"
process = "CrudeOilDewatering"
value = "1"

[[model.parameters]]
path = "API"
descriptor = "api"
kind = "text"
"#;

    fn set(
        group: &str,
        oil: Option<f64>,
        gor: Option<f64>,
        flood: Option<&str>,
    ) -> AggregateParameterSet {
        let num = |v: Option<f64>, unit: &str| CanonicalValue {
            unit: unit.into(),
            value: Flagged::clean(v),
        };
        AggregateParameterSet {
            group: group.into(),
            wells: vec!["W-001".into()],
            parameters: BTreeMap::from([
                ("oil_prod".into(), num(oil, "bbl/d")),
                ("GOR".into(), num(gor, "scf/bbl")),
            ]),
            descriptors: BTreeMap::from([
                ("flood".into(), Flagged::clean(flood.map(String::from))),
                ("api".into(), Flagged::clean(Some("100013403924W400".to_string()))),
            ]),
        }
    }

    fn config(schema: &str) -> PipelineConfig {
        PipelineConfig::from_toml(&format!("{BASE}\n{schema}")).unwrap()
    }

    #[test]
    fn schema_order_and_values() {
        let ec = build(&config(SCHEMA), &[set("Heritage", Some(150.0), Some(800.0), Some("1"))]).unwrap();
        assert_eq!(ec.analysis.name, "FUSE_run");
        assert_eq!(ec.analysis.attributes[0], ("GWP_horizon".into(), "100".into()));
        let paths: Vec<&str> = ec.fields[0].entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["oil_prod", "GOR", "flood_gas_type", "heater_treater", "API"]);
        assert_eq!(ec.fields[0].entries[0].value.value, ConfigValue::Number(150.0));
        assert_eq!(ec.fields[0].entries[2].value.value, ConfigValue::Text("NG".into()));
        assert_eq!(ec.fields[0].entries[3].process.as_deref(), Some("CrudeOilDewatering"));
        assert!(ec.audit.is_empty());
    }

    #[test]
    fn zero_is_raised_to_floor() {
        let ec = build(&config(SCHEMA), &[set("F", Some(1.0), Some(0.0), None)]).unwrap();
        assert_eq!(ec.fields[0].entries[1].value.value, ConfigValue::Number(0.00001));
    }

    #[test]
    fn missing_value_uses_default_and_is_audited() {
        let ec = build(&config(SCHEMA), &[set("F", Some(1.0), None, None)]).unwrap();
        let gor = &ec.fields[0].entries[1];
        assert!(gor.is_default);
        assert_eq!(gor.value.value, ConfigValue::Number(0.00001));
        assert!(gor.value.has(FlagKind::DefaultSubstituted));
        assert_eq!(ec.audit.len(), 1);
        assert_eq!(ec.audit[0].path, "GOR");
    }

    #[test]
    fn optional_path_without_value_is_omitted() {
        let ec = build(&config(SCHEMA), &[set("F", Some(1.0), Some(5.0), None)]).unwrap();
        assert!(ec.fields[0].entries.iter().all(|e| e.path != "flood_gas_type"));
    }

    #[test]
    fn required_path_without_value_or_default_fails() {
        let err = build(&config(SCHEMA), &[set("Heritage", None, Some(5.0), None)]).unwrap_err();
        match err {
            ReconError::SchemaViolation { group, path } => {
                assert_eq!(group, "Heritage");
                assert_eq!(path, "oil_prod");
            }
            other => panic!("expected SchemaViolation, got {other}"),
        }
    }

    #[test]
    fn flags_travel_into_audit() {
        let mut s = set("F", Some(1.0), Some(5.0), None);
        s.parameters.get_mut("oil_prod").unwrap().value.flag(Flag::Missing {
            well: "W-002".into(),
            attribute: "oil".into(),
            source: Some("beta".into()),
        });
        let ec = build(&config(SCHEMA), &[s]).unwrap();
        assert_eq!(ec.audit.len(), 1);
        assert_eq!(ec.audit[0].group, "F");
        assert!(ec.fields[0].entries[0].value.has(FlagKind::Missing));
    }

    #[test]
    fn derived_schema_when_none_declared() {
        let ec = build(&config(""), &[set("F", Some(2.0), None, None)]).unwrap();
        let paths: Vec<&str> = ec.fields[0].entries.iter().map(|e| e.path.as_str()).collect();
        // GOR has no value and no default, so the optional path is dropped
        assert_eq!(paths, vec!["oil_prod"]);
        assert_eq!(ec.analysis.name, "wellset_run");
    }

    #[test]
    fn build_is_deterministic() {
        let sets = [
            set("A", Some(1.0), Some(2.0), Some("3")),
            set("B", Some(4.0), None, None),
        ];
        let config = config(SCHEMA);
        assert_eq!(build(&config, &sets).unwrap(), build(&config, &sets).unwrap());
    }
}
