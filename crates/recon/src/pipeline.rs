//! Stage orchestration: load → cohort → join → aggregate → build.
//!
//! Sources load in parallel; the join waits for all of them. A cancel check
//! sits between stages. Nothing here writes files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use crate::aggregate::{aggregate, to_canonical};
use crate::cohort::{self, Cohort};
use crate::config::PipelineConfig;
use crate::emissions;
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::join::reconcile;
use crate::loader::load_source;
use crate::model::{
    AggregateParameterSet, CanonicalWell, EmissionsConfig, Reconciliation, RunSummary,
    SourceRecords,
};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` if cancellation was requested before `stage`.
    pub fn check(&self, stage: &str) -> Result<(), ReconError> {
        if self.is_cancelled() {
            return Err(ReconError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

/// CSV text for one configured source, already decoded.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub csv_data: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub loaded: Vec<SourceRecords>,
    pub cohort: Cohort,
    pub reconciliation: Reconciliation,
    pub wells: Vec<CanonicalWell>,
    pub parameter_sets: Vec<AggregateParameterSet>,
    pub emissions: EmissionsConfig,
    pub summary: RunSummary,
}

/// Parse every configured source concurrently. Output is in source-name
/// order regardless of scheduling.
pub fn load_all(
    config: &PipelineConfig,
    inputs: &[SourceInput],
) -> Result<Vec<SourceRecords>, ReconError> {
    for input in inputs {
        if !config.sources.contains_key(&input.name) {
            return Err(ReconError::ConfigValidation(format!(
                "input for unknown source '{}'",
                input.name
            )));
        }
    }
    let jobs = config
        .sources
        .iter()
        .map(|(name, source)| {
            let input = inputs.iter().find(|i| &i.name == name).ok_or_else(|| {
                ReconError::ConfigValidation(format!("source '{name}' has no input"))
            })?;
            Ok((name.as_str(), source, input.csv_data.as_str()))
        })
        .collect::<Result<Vec<_>, ReconError>>()?;

    jobs.par_iter()
        .map(|(name, source, data)| load_source(name, data, source))
        .collect()
}

/// Load sources and evaluate the cohort criteria.
pub fn select_cohort(
    config: &PipelineConfig,
    inputs: &[SourceInput],
    cancel: &CancelToken,
) -> Result<(Vec<SourceRecords>, Cohort), ReconError> {
    let table = config.units.table();
    cancel.check("load")?;
    let loaded = load_all(config, inputs)?;
    cancel.check("cohort")?;
    let cohort = cohort::select(config, &loaded, &table)?;
    Ok((loaded, cohort))
}

/// Run every stage and return the in-memory result.
pub fn run(
    config: &PipelineConfig,
    inputs: &[SourceInput],
    cancel: &CancelToken,
) -> Result<PipelineOutput, ReconError> {
    let _span = tracing::info_span!("pipeline", run = config.name.as_str()).entered();
    let table = config.units.table();

    let (loaded, cohort) = select_cohort(config, inputs, cancel)?;

    cancel.check("join")?;
    let reconciliation = reconcile(config, &cohort, &loaded, &table)?;

    cancel.check("aggregate")?;
    let wells = to_canonical(config, &reconciliation, &table)?;
    let parameter_sets = aggregate(config, &wells, &table)?;

    cancel.check("serialize")?;
    let emissions = emissions::build(config, &parameter_sets)?;

    let reports: Vec<_> = loaded.iter().map(|s| s.report.clone()).collect();
    let summary = compute_summary(
        &config.name,
        &reports,
        &cohort,
        &reconciliation,
        &parameter_sets,
        &emissions,
    );
    info!(
        cohort = summary.cohort_size,
        groups = summary.groups,
        conflicts = summary.conflicting_attributes,
        missing = summary.missing_attributes,
        "pipeline complete"
    );

    Ok(PipelineOutput {
        loaded,
        cohort,
        reconciliation,
        wells,
        parameter_sets,
        emissions,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name = "Pipe"

[sources.alpha]
file = "alpha.csv"
identifier_column = "well"
identifier_format = "label"
[sources.alpha.attributes]
oil_prod = { column = "oil", unit = "bbl/day" }

[sources.beta]
file = "beta.csv"
identifier_column = "Well ID"
identifier_format = "label"
[sources.beta.attributes]
oil_prod = { column = "Oil (m3/d)", unit = "m3/day" }

[precedence]
default = ["alpha", "beta"]

[units.canonical]
oil_prod = "bbl/d"

[[aggregates]]
name = "oil_prod"
kind = "sum"
attribute = "oil_prod"
"#;

    fn inputs() -> Vec<SourceInput> {
        vec![
            SourceInput {
                name: "beta".into(),
                csv_data: "Well ID,Oil (m3/d)\nW-001,15.9\n".into(),
            },
            SourceInput {
                name: "alpha".into(),
                csv_data: "well,oil\nW-001,100\nW-002,50\n".into(),
            },
        ]
    }

    #[test]
    fn run_end_to_end() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let out = run(&config, &inputs(), &CancelToken::new()).unwrap();
        assert_eq!(out.loaded[0].source, "alpha");
        assert_eq!(out.cohort.len(), 2);
        assert!(out.reconciliation.conflicts.is_empty());
        let total = out.parameter_sets[0].parameters["oil_prod"].value.value.unwrap();
        assert!((total - 150.0).abs() < 1e-9);
        assert_eq!(out.emissions.fields[0].name, "Pipe");
        assert_eq!(out.summary.missing_attributes, 1);
    }

    #[test]
    fn cancelled_before_first_stage() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let cancel = CancelToken::new();
        cancel.clone().cancel();
        let err = run(&config, &inputs(), &cancel).unwrap_err();
        match err {
            ReconError::Cancelled { stage } => assert_eq!(stage, "load"),
            other => panic!("expected Cancelled, got {other}"),
        }
    }

    #[test]
    fn missing_input_is_config_error() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let err = run(&config, &inputs()[..1], &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("'alpha' has no input"));
    }

    #[test]
    fn unknown_input_is_config_error() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let mut ins = inputs();
        ins.push(SourceInput {
            name: "gamma".into(),
            csv_data: String::new(),
        });
        assert!(run(&config, &ins, &CancelToken::new()).is_err());
    }
}
