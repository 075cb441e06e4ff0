// CSV input decoding and summary/index export

use std::io::Read;
use std::path::Path;

use wellset_recon::model::SummaryTable;
use wellset_recon::EmissionsConfig;

use crate::atomic::write_atomic;

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(decode(bytes))
}

fn decode(bytes: Vec<u8>) -> String {
    // Try UTF-8 first; on failure, recover the buffer from the error
    let mut text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            // Fall back to Windows-1252 (vendor exports are often cp1252)
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            tracing::debug!("input is not UTF-8, decoded as windows-1252");
            decoded.into_owned()
        }
    };
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    text
}

fn render(records: Vec<Vec<String>>) -> Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(Vec::new());
    for record in &records {
        writer.write_record(record).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// Wide summary table as CSV. Absent cells are empty.
pub fn summary_table_bytes(table: &SummaryTable) -> Result<Vec<u8>, String> {
    let mut records = Vec::with_capacity(table.rows.len() + 1);

    let mut header = vec![table.entity_header.clone()];
    header.extend(table.columns.iter().map(|c| c.label.clone()));
    records.push(header);

    for row in &table.rows {
        let mut record = vec![row.entity.clone()];
        record.extend(
            row.cells
                .iter()
                .map(|cell| cell.map(|v| v.to_string()).unwrap_or_default()),
        );
        records.push(record);
    }
    render(records)
}

pub fn export_summary_table(table: &SummaryTable, path: &Path) -> Result<(), String> {
    write_atomic(path, &summary_table_bytes(table)?)
}

/// Field index: a `name` row listing every group, then one row per
/// requested parameter path with each group's value.
pub fn field_index_bytes(config: &EmissionsConfig, paths: &[String]) -> Result<Vec<u8>, String> {
    let mut records = Vec::with_capacity(paths.len() + 1);

    let mut header = vec!["name".to_string()];
    header.extend(config.fields.iter().map(|f| f.name.clone()));
    records.push(header);

    for path in paths {
        let mut record = vec![path.clone()];
        for field in &config.fields {
            let value = field
                .entries
                .iter()
                .find(|e| &e.path == path)
                .map(|e| e.value.value.to_string())
                .unwrap_or_default();
            record.push(value);
        }
        records.push(record);
    }
    render(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    use wellset_recon::model::{
        AnalysisBlock, ConfigEntry, ConfigValue, FieldBlock, Flagged, SummaryColumn, SummaryRow,
    };

    fn entry(path: &str, value: ConfigValue) -> ConfigEntry {
        ConfigEntry {
            path: path.into(),
            process: None,
            is_default: false,
            value: Flagged::clean(value),
        }
    }

    #[test]
    fn utf8_passes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wells.csv");
        fs::write(&path, "uwi,Operator\n1,Société\n").unwrap();
        assert_eq!(read_file_as_utf8(&path).unwrap(), "uwi,Operator\n1,Société\n");
    }

    #[test]
    fn windows_1252_is_decoded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wells.csv");
        // 0xE9 is 'é' in cp1252 and invalid as a lone UTF-8 byte
        fs::write(&path, b"uwi,Operator\n1,Soci\xe9t\xe9\n").unwrap();
        assert_eq!(read_file_as_utf8(&path).unwrap(), "uwi,Operator\n1,Société\n");
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wells.csv");
        fs::write(&path, "\u{feff}uwi\n1\n").unwrap();
        assert!(read_file_as_utf8(&path).unwrap().starts_with("uwi"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_file_as_utf8(Path::new("/nonexistent/wells.csv")).unwrap_err();
        assert!(err.contains("/nonexistent/wells.csv"), "{err}");
    }

    #[test]
    fn summary_table_layout() {
        let table = SummaryTable {
            entity_header: "field".into(),
            columns: vec![
                SummaryColumn {
                    metric: "total".into(),
                    label: "Total CI (gCO2e/MJ)".into(),
                    unit: "g/MJ".into(),
                },
                SummaryColumn {
                    metric: "flaring".into(),
                    label: "flaring".into(),
                    unit: "g/MJ".into(),
                },
            ],
            rows: vec![
                SummaryRow {
                    entity: "KAYBOB".into(),
                    cells: vec![Some(9.5), None],
                },
                SummaryRow {
                    entity: "PEMBINA".into(),
                    cells: vec![Some(11.02), Some(0.4)],
                },
            ],
        };
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        export_summary_table(&table, &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "field,Total CI (gCO2e/MJ),flaring\nKAYBOB,9.5,\nPEMBINA,11.02,0.4\n"
        );
    }

    #[test]
    fn field_index_layout() {
        let config = EmissionsConfig {
            analysis: AnalysisBlock {
                name: "FUSE_run".into(),
                attributes: vec![],
            },
            fields: vec![
                FieldBlock {
                    name: "KAYBOB".into(),
                    entries: vec![
                        entry("API", ConfigValue::Number(38.8)),
                        entry("num_prod_wells", ConfigValue::Number(2.0)),
                    ],
                },
                FieldBlock {
                    name: "PEMBINA".into(),
                    entries: vec![entry("API", ConfigValue::Number(32.0))],
                },
            ],
            audit: vec![],
        };
        let paths = vec!["API".to_string(), "num_prod_wells".to_string()];
        let bytes = field_index_bytes(&config, &paths).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "name,KAYBOB,PEMBINA\nAPI,38.8,32\nnum_prod_wells,2,\n"
        );
    }
}
