//! Long-to-wide result pivot.
//!
//! One row per entity, one column per metric. A repeated (entity, metric)
//! pair is an error, never last-write-wins.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::PostprocessConfig;
use crate::error::ReconError;
use crate::model::{LongResultRow, SummaryColumn, SummaryRow, SummaryTable};

const RESULTS: &str = "results";

/// Parse the model's long-format result file.
///
/// The unit column is optional; rows with an empty value cell carry no
/// measurement and are dropped.
pub fn parse_long_rows(
    csv_data: &str,
    pp: &PostprocessConfig,
) -> Result<Vec<LongResultRow>, ReconError> {
    let csv_err = |message: String| ReconError::Csv {
        source_name: RESULTS.into(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_err(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| {
        find(name).ok_or_else(|| ReconError::SchemaMismatch {
            source_name: RESULTS.into(),
            column: name.into(),
        })
    };

    let entity_idx = required(&pp.entity_column)?;
    let metric_idx = required(&pp.metric_column)?;
    let value_idx = required(&pp.value_column)?;
    let unit_idx = find(&pp.unit_column);

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_err(e.to_string()))?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let raw_value = cell(value_idx);
        if raw_value.is_empty() {
            debug!(line = line + 2, "empty value cell");
            continue;
        }
        let value = raw_value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| csv_err(format!("line {}: value '{raw_value}' is not a number", line + 2)))?;

        rows.push(LongResultRow {
            entity: cell(entity_idx).to_string(),
            metric: cell(metric_idx).to_string(),
            value,
            unit: unit_idx.map(cell).unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

/// Pivot long rows into a summary table.
pub fn pivot(rows: &[LongResultRow], pp: &PostprocessConfig) -> Result<SummaryTable, ReconError> {
    let mut cells: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    let mut units: BTreeMap<&str, &str> = BTreeMap::new();

    // Duplicates take priority over unit disagreements anywhere in the input
    for row in rows {
        let entity = cells.entry(&row.entity).or_default();
        if let Some(&first) = entity.get(row.metric.as_str()) {
            return Err(ReconError::DuplicateCell {
                row: row.entity.clone(),
                column: row.metric.clone(),
                first,
                second: row.value,
            });
        }
        entity.insert(&row.metric, row.value);
    }

    for row in rows {
        match units.get(row.metric.as_str()) {
            Some(&unit) if unit != row.unit => {
                return Err(ReconError::MixedUnits {
                    metric: row.metric.clone(),
                    first: unit.to_string(),
                    second: row.unit.clone(),
                });
            }
            Some(_) => {}
            None => {
                units.insert(&row.metric, &row.unit);
            }
        }
    }

    let declared: BTreeSet<&str> = pp.metrics.iter().map(String::as_str).collect();
    let mut order: Vec<&str> = pp
        .metrics
        .iter()
        .map(String::as_str)
        .filter(|m| units.contains_key(m))
        .collect();
    for metric in units.keys().filter(|m| !declared.contains(*m)) {
        if pp.strict_metrics {
            return Err(ReconError::SchemaMismatch {
                source_name: RESULTS.into(),
                column: metric.to_string(),
            });
        }
        order.push(*metric);
    }

    let columns: Vec<SummaryColumn> = order
        .iter()
        .map(|m| SummaryColumn {
            metric: m.to_string(),
            label: pp.labels.get(*m).cloned().unwrap_or_else(|| m.to_string()),
            unit: units[m].to_string(),
        })
        .collect();

    let rows: Vec<SummaryRow> = cells
        .into_iter()
        .map(|(entity, values)| SummaryRow {
            entity: entity.to_string(),
            cells: order.iter().map(|m| values.get(m).copied()).collect(),
        })
        .collect();

    info!(rows = rows.len(), columns = columns.len(), "pivoted results");
    Ok(SummaryTable {
        entity_header: pp.entity_column.clone(),
        columns,
        rows,
    })
}
