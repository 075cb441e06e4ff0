//! Dataset loader: CSV text + source descriptor → `WellRecord`s.
//!
//! Row-level problems skip the row and are counted in the `LoadReport`.
//! Only a missing configured column fails the whole file.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::ReconError;
use crate::identifier::normalize;
use crate::model::{LoadReport, Measured, SourceRecords, WellRecord};
use crate::units::normalize_unit;

/// Parse a numeric cell. Empty → `Ok(None)`; thousands separators allowed.
fn parse_number(raw: &str) -> Result<Option<f64>, ()> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or(())
}

/// Byte offset and line count of the preamble above the header line.
fn preamble(
    source_name: &str,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<(usize, usize), ReconError> {
    let marker = source.header_marker.as_deref().map(str::trim);
    if source.header_row.is_none() && marker.is_none() {
        return Ok((0, 0));
    }
    let is_header = |n: usize, line: &str| match (source.header_row, marker) {
        (Some(row), _) => n + 1 == row.max(1),
        (None, Some(marker)) => line
            .trim_start_matches('\u{feff}')
            .trim_start()
            .trim_start_matches('"')
            .starts_with(marker),
        (None, None) => n == 0,
    };

    let mut offset = 0;
    for (n, line) in csv_data.split_inclusive('\n').enumerate() {
        if is_header(n, line) {
            return Ok((offset, n));
        }
        offset += line.len();
    }
    match (source.header_row, &source.header_marker) {
        (Some(row), _) => Err(ReconError::Csv {
            source_name: source_name.into(),
            message: format!("header row {row} is past the end of the file"),
        }),
        (None, marker) => Err(ReconError::SchemaMismatch {
            source_name: source_name.into(),
            column: marker.clone().unwrap_or_default(),
        }),
    }
}

/// Load one source's CSV text.
pub fn load_source(
    source_name: &str,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<SourceRecords, ReconError> {
    let (start, skipped_lines) = preamble(source_name, csv_data, source)?;
    if skipped_lines > 0 {
        debug!(source = source_name, lines = skipped_lines, "skipped preamble");
    }
    let first_data_line = skipped_lines + 2;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data[start..].as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Csv {
            source_name: source_name.into(),
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let idx = |name: &str| -> Result<usize, ReconError> {
        headers.iter().position(|h| h == name.trim()).ok_or_else(|| {
            ReconError::SchemaMismatch {
                source_name: source_name.into(),
                column: name.into(),
            }
        })
    };

    let id_idx = idx(&source.identifier_column)?;
    let date_idx = match source.date_column {
        Some(ref col) => Some(idx(col)?),
        None => None,
    };
    let filter_idx = match source.filter {
        Some(ref filter) => Some(idx(&filter.column)?),
        None => None,
    };
    let attr_cols: Vec<(&String, usize, String)> = source
        .attributes
        .iter()
        .map(|(name, col)| Ok((name, idx(&col.column)?, normalize_unit(&col.unit))))
        .collect::<Result<_, ReconError>>()?;
    let desc_cols: Vec<(&String, usize)> = source
        .descriptors
        .iter()
        .map(|(name, col)| Ok((name, idx(col)?)))
        .collect::<Result<_, ReconError>>()?;

    let mut report = LoadReport {
        source: source_name.to_string(),
        ..LoadReport::default()
    };
    let mut records = Vec::new();

    'rows: for (line, record) in reader.records().enumerate() {
        report.rows_read += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!(source = source_name, line = line + first_data_line, error = %e, "unreadable row");
                report.skip("unreadable_row");
                continue;
            }
        };
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        if let (Some(ref filter), Some(fi)) = (&source.filter, filter_idx) {
            if !filter.values.iter().any(|v| v == cell(fi)) {
                report.skip("filtered");
                continue;
            }
        }

        let raw_id = cell(id_idx);
        if raw_id.is_empty() {
            report.skip("empty_identifier");
            continue;
        }
        let identifier = match normalize(raw_id, source.identifier_format, source.label_width, source_name) {
            Ok(id) => id,
            Err(e) => {
                debug!(source = source_name, line = line + first_data_line, "{e}");
                report.skip(e.kind());
                continue;
            }
        };

        let period = match date_idx.map(cell) {
            None | Some("") => None,
            Some(s) => match NaiveDate::parse_from_str(s, &source.date_format) {
                Ok(d) => Some(d),
                Err(_) => {
                    debug!(source = source_name, line = line + first_data_line, value = s, "invalid date");
                    report.skip("invalid_date");
                    continue;
                }
            },
        };

        let mut attributes = BTreeMap::new();
        for (name, i, unit) in &attr_cols {
            match parse_number(cell(*i)) {
                Ok(Some(value)) => {
                    attributes.insert(
                        (*name).clone(),
                        Measured {
                            value,
                            unit: unit.clone(),
                        },
                    );
                }
                Ok(None) => {}
                Err(()) => {
                    debug!(
                        source = source_name,
                        line = line + first_data_line,
                        attribute = name.as_str(),
                        value = cell(*i),
                        "invalid number"
                    );
                    report.skip("invalid_number");
                    continue 'rows;
                }
            }
        }

        let descriptors = desc_cols
            .iter()
            .filter(|(_, i)| !cell(*i).is_empty())
            .map(|(name, i)| ((*name).clone(), cell(*i).to_string()))
            .collect();

        records.push(WellRecord {
            source: source_name.to_string(),
            identifier,
            raw_identifier: raw_id.to_string(),
            period,
            attributes,
            descriptors,
        });
    }

    report.rows_kept = records.len();
    info!(
        source = source_name,
        rows_read = report.rows_read,
        rows_kept = report.rows_kept,
        rows_skipped = report.rows_skipped,
        reasons = ?report.skip_reasons,
        "loaded source"
    );

    Ok(SourceRecords {
        source: source_name.to_string(),
        records,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeColumn, RowFilter};
    use crate::identifier::IdentifierFormat;

    fn source() -> SourceConfig {
        SourceConfig {
            file: "wells.csv".into(),
            identifier_column: "CPA Well ID".into(),
            identifier_format: IdentifierFormat::Uwi,
            label_width: 3,
            date_column: Some("Date Well Spudded".into()),
            date_format: "%Y-%m-%d".into(),
            descriptors: BTreeMap::from([
                ("province".into(), "Area".into()),
                ("formation".into(), "Prod./Inject. Frmtn".into()),
            ]),
            attributes: BTreeMap::from([(
                "gor".into(),
                AttributeColumn {
                    column: "First 12 mo. Ave GOR (m3/m3)".into(),
                    unit: "m3/m3".into(),
                },
            )]),
            filter: None,
            header_row: None,
            header_marker: None,
        }
    }

    const CSV: &str = "\
CPA Well ID,Date Well Spudded,Area,Prod./Inject. Frmtn,First 12 mo. Ave GOR (m3/m3)
100/01-34-039-24W4/00,2012-03-04,AB,TRmontney,120.5
100013503924W400,2013-05-06,AB,Dduvernay,
bogus,2013-05-06,AB,Dduvernay,80
100/01-36-039-24W4/00,not-a-date,BC,TRmontney,80
100/01-35-039-24W4/02,2014-01-01,BC,TRmontney,n/a
,2014-01-01,BC,TRmontney,1
100/02-35-039-24W4/00,2015-01-01,SK,Mbakken_M,\"1,250\"
";

    #[test]
    fn load_normalizes_identifiers_and_counts_skips() {
        let out = load_source("geoscout", CSV, &source()).unwrap();
        assert_eq!(out.report.rows_read, 7);
        assert_eq!(out.report.rows_kept, 3);
        assert_eq!(out.report.rows_skipped, 4);
        assert_eq!(out.report.skip_reasons["malformed_identifier"], 1);
        assert_eq!(out.report.skip_reasons["invalid_date"], 1);
        assert_eq!(out.report.skip_reasons["invalid_number"], 1);
        assert_eq!(out.report.skip_reasons["empty_identifier"], 1);

        let ids: Vec<&str> = out.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["100013403924W400", "100013503924W400", "100023503924W400"]);
        assert_eq!(out.records[0].attributes["gor"].value, 120.5);
        assert_eq!(out.records[0].attributes["gor"].unit, "m3/m3");
        assert_eq!(out.records[0].descriptors["province"], "AB");
        assert_eq!(out.records[0].period, NaiveDate::from_ymd_opt(2012, 3, 4));
    }

    #[test]
    fn empty_numeric_cell_is_absent_not_skipped() {
        let out = load_source("geoscout", CSV, &source()).unwrap();
        assert!(!out.records[1].attributes.contains_key("gor"));
    }

    #[test]
    fn thousands_separator_is_accepted() {
        let out = load_source("geoscout", CSV, &source()).unwrap();
        assert_eq!(out.records[2].attributes["gor"].value, 1250.0);
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let mut src = source();
        src.attributes.insert(
            "oil".into(),
            AttributeColumn {
                column: "Oil (m3/d)".into(),
                unit: "m3/d".into(),
            },
        );
        let err = load_source("geoscout", CSV, &src).unwrap_err();
        match err {
            ReconError::SchemaMismatch { column, .. } => assert_eq!(column, "Oil (m3/d)"),
            other => panic!("expected SchemaMismatch, got {other}"),
        }
    }

    #[test]
    fn filtered_rows_are_read_and_counted() {
        let mut src = source();
        src.filter = Some(RowFilter {
            column: "Area".into(),
            values: vec!["AB".into()],
        });
        let out = load_source("geoscout", CSV, &src).unwrap();
        assert_eq!(out.report.rows_read, 7);
        assert_eq!(out.report.rows_kept, 2);
        assert_eq!(out.report.skip_reasons["filtered"], 4);
        assert_eq!(out.report.skip_reasons["malformed_identifier"], 1);
        assert_eq!(out.report.rows_kept + out.report.rows_skipped, out.report.rows_read);
    }

    const EXPORT: &str = "\
geoScout export Jan-2020

Sort Format Well ID (Long),CPA Well ID,Date Well Spudded,Area,Prod./Inject. Frmtn,First 12 mo. Ave GOR (m3/m3)
00/01-34-039-24W4/0,100/01-34-039-24W4/00,2012-03-04,AB,TRmontney,120.5
00/01-35-039-24W4/0,100/01-35-039-24W4/00,2013-05-06,AB,Dduvernay,
";

    #[test]
    fn header_marker_skips_export_preamble() {
        let mut src = source();
        src.header_marker = Some("Sort Format Well ID (Long)".into());
        let out = load_source("geoscout", EXPORT, &src).unwrap();
        assert_eq!(out.report.rows_read, 2);
        assert_eq!(out.records[0].identifier, "100013403924W400");
        assert_eq!(out.records[0].attributes["gor"].value, 120.5);
    }

    #[test]
    fn header_row_skips_fixed_preamble() {
        let mut src = source();
        src.header_row = Some(3);
        let out = load_source("geoscout", EXPORT, &src).unwrap();
        assert_eq!(out.report.rows_kept, 2);
    }

    #[test]
    fn preamble_without_header_setting_is_schema_mismatch() {
        let err = load_source("geoscout", EXPORT, &source()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[test]
    fn absent_header_marker_is_schema_mismatch() {
        let mut src = source();
        src.header_marker = Some("UWI (Long)".into());
        match load_source("geoscout", EXPORT, &src).unwrap_err() {
            ReconError::SchemaMismatch { column, .. } => assert_eq!(column, "UWI (Long)"),
            other => panic!("expected SchemaMismatch, got {other}"),
        }
    }
}
