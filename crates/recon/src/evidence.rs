use crate::cohort::Cohort;
use crate::model::{
    AggregateParameterSet, EmissionsConfig, FlagKind, LoadReport, Reconciliation, RunSummary,
};

/// Compute skip/flag counts for one run.
pub fn compute_summary(
    run_name: &str,
    reports: &[LoadReport],
    cohort: &Cohort,
    reconciliation: &Reconciliation,
    sets: &[AggregateParameterSet],
    emissions: &EmissionsConfig,
) -> RunSummary {
    let missing_attributes = reconciliation
        .wells
        .iter()
        .flat_map(|w| w.flags())
        .filter(|f| f.kind() == FlagKind::Missing)
        .count();

    let params = sets.iter().flat_map(|s| s.parameters.values());
    let mut defaults_substituted = 0;
    let mut insufficient_data = 0;
    for p in params {
        if p.value.has(FlagKind::DefaultSubstituted) {
            defaults_substituted += 1;
        }
        if p.value.has(FlagKind::InsufficientData) {
            insufficient_data += 1;
        }
    }
    // Model defaults used for paths with no value at all
    defaults_substituted += emissions
        .fields
        .iter()
        .flat_map(|f| f.entries.iter())
        .filter(|e| e.is_default)
        .count();

    RunSummary {
        run_name: run_name.to_string(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        sources: reports.to_vec(),
        rows_skipped: reports.iter().map(|r| r.rows_skipped).sum(),
        cohort_size: cohort.len(),
        wells_reconciled: reconciliation.wells.len() - reconciliation.missing_wells.len(),
        missing_wells: reconciliation.missing_wells.clone(),
        conflicting_attributes: reconciliation.conflicts.len(),
        missing_attributes,
        defaults_substituted,
        insufficient_data,
        groups: sets.len(),
        config_sha256: None,
    }
}
