//! `wellset pivot`: long-format model results → wide summary table.

use std::path::PathBuf;

use tracing::info;
use wellset_recon::postprocess::{parse_long_rows, pivot};

use crate::{CliError, LoadedConfig};

pub fn cmd_pivot(
    config: PathBuf,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config)?;
    let pp = &loaded.config.postprocess;

    let input = loaded.resolve(input, pp.input.as_deref()).ok_or_else(|| {
        CliError::args("no result file to pivot").with_hint("pass --input or set [postprocess] input")
    })?;
    let output = loaded.resolve(output, pp.output.as_deref()).ok_or_else(|| {
        CliError::args("no summary output path")
            .with_hint("pass --output or set [postprocess] output")
    })?;

    let text = wellset_io::csv::read_file_as_utf8(&input).map_err(CliError::io)?;
    let rows = parse_long_rows(&text, pp)?;
    let table = pivot(&rows, pp)?;

    wellset_io::csv::export_summary_table(&table, &output).map_err(CliError::io)?;
    info!(path = %output.display(), "wrote summary table");
    eprintln!(
        "pivot: {} rows → {} entities × {} metrics",
        rows.len(),
        table.rows.len(),
        table.columns.len()
    );
    Ok(())
}
