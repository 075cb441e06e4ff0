//! `wellset run|validate|cohort`: config-driven pipeline commands.
//!
//! Every artifact is rendered in memory first and written only once the
//! whole run has succeeded, so an aborted run leaves earlier outputs intact.

use std::path::PathBuf;

use tracing::info;
use wellset_io::json::{to_pretty_bytes, SummaryDocument};
use wellset_recon::pipeline::{run, select_cohort, CancelToken, SourceInput};
use wellset_recon::RunSummary;

use crate::exit_codes::EXIT_FLAGS_STRICT;
use crate::{CliError, LoadedConfig};

pub struct RunArgs {
    pub config: PathBuf,
    pub output: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub field_index: Option<PathBuf>,
    pub json: bool,
    pub strict: bool,
}

/// Read every configured source file, resolving paths against the config.
fn read_inputs(loaded: &LoadedConfig) -> Result<Vec<SourceInput>, CliError> {
    loaded
        .config
        .sources
        .iter()
        .map(|(name, source)| {
            let path = loaded.base_dir.join(&source.file);
            let csv_data = wellset_io::csv::read_file_as_utf8(&path).map_err(|e| {
                CliError::io(format!("source '{name}': {e}"))
                    .with_hint("source paths resolve against the config file's directory")
            })?;
            Ok(SourceInput {
                name: name.clone(),
                csv_data,
            })
        })
        .collect()
}

fn print_summary(s: &RunSummary) {
    eprintln!(
        "{}: {} wells in cohort ({} reconciled, {} missing), {} groups; {} conflicts, {} missing attributes, {} defaults, {} insufficient",
        s.run_name,
        s.cohort_size,
        s.wells_reconciled,
        s.missing_wells.len(),
        s.groups,
        s.conflicting_attributes,
        s.missing_attributes,
        s.defaults_substituted,
        s.insufficient_data,
    );
    if s.rows_skipped > 0 {
        eprintln!("skipped {} source rows (see summary for reasons)", s.rows_skipped);
    }
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&args.config)?;
    let output = &loaded.config.output;

    // Resolve outputs before reading any data
    let xml_path = loaded
        .resolve(args.output, output.config.as_deref())
        .ok_or_else(|| {
            CliError::args("no output path for the model config")
                .with_hint("pass --output or set [output] config")
        })?;
    let summary_path = loaded.resolve(args.summary, output.summary.as_deref());
    let index_path = loaded.resolve(args.field_index, output.field_index.as_deref());

    let inputs = read_inputs(&loaded)?;
    let result = run(&loaded.config, &inputs, &CancelToken::new())?;

    // Render everything before touching the filesystem
    let xml = if xml_path.exists() {
        // Update an existing model file in place, keeping what we don't own
        let existing = wellset_io::csv::read_file_as_utf8(&xml_path).map_err(CliError::io)?;
        info!(path = %xml_path.display(), "merging into existing model config");
        wellset_io::xml::merge_emissions_config(&existing, &result.emissions).map_err(|e| {
            CliError::io(format!("{}: {e}", xml_path.display()))
                .with_hint("move the file aside to write a fresh one")
        })?
    } else {
        wellset_io::xml::render_emissions_config(&result.emissions).map_err(CliError::io)?
    };
    let mut summary = result.summary.clone();
    summary.config_sha256 = Some(wellset_io::sha256_hex(&xml));
    let doc = SummaryDocument {
        summary: &summary,
        conflicts: &result.reconciliation.conflicts,
        audit: &result.emissions.audit,
    };
    let summary_json = to_pretty_bytes(&doc).map_err(CliError::io)?;
    let index = match index_path {
        Some(path) => {
            let bytes = wellset_io::csv::field_index_bytes(
                &result.emissions,
                &output.field_index_paths,
            )
            .map_err(CliError::io)?;
            Some((path, bytes))
        }
        None => None,
    };

    wellset_io::atomic::write_atomic(&xml_path, &xml).map_err(CliError::io)?;
    info!(path = %xml_path.display(), "wrote model config");
    if let Some(path) = summary_path {
        wellset_io::atomic::write_atomic(&path, &summary_json).map_err(CliError::io)?;
        info!(path = %path.display(), "wrote run summary");
    }
    if let Some((path, bytes)) = index {
        wellset_io::atomic::write_atomic(&path, &bytes).map_err(CliError::io)?;
        info!(path = %path.display(), "wrote field index");
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&summary_json).trim_end());
    }
    print_summary(&summary);

    if args.strict && summary.has_flags() {
        return Err(CliError {
            code: EXIT_FLAGS_STRICT,
            message: "run raised data-quality flags (--strict)".into(),
            hint: Some("see the audit section of the run summary".into()),
        });
    }
    Ok(())
}

pub fn cmd_validate(config: PathBuf) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config)?;
    let c = &loaded.config;
    eprintln!(
        "{}: valid ({} sources, {} aggregates, {} model parameters)",
        c.name,
        c.sources.len(),
        c.aggregates.len(),
        c.model.parameters.len(),
    );
    Ok(())
}

pub fn cmd_cohort(config: PathBuf, json: bool) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config)?;
    let inputs = read_inputs(&loaded)?;
    let (_, cohort) = select_cohort(&loaded.config, &inputs, &CancelToken::new())?;

    if json {
        let value = serde_json::json!({
            "cohort_size": cohort.len(),
            "wells": cohort.wells,
        });
        let text = serde_json::to_string_pretty(&value)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{text}");
    } else {
        for well in cohort.iter() {
            println!("{well}");
        }
    }
    eprintln!("{}: {} wells selected", loaded.config.name, cohort.len());
    Ok(())
}
