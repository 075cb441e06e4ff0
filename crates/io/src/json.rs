// JSON export of the run summary

use serde::Serialize;
use wellset_recon::model::AuditEntry;
use wellset_recon::{Flag, RunSummary};

/// Summary file contents: counts plus the audit trail behind them.
#[derive(Debug, Serialize)]
pub struct SummaryDocument<'a> {
    #[serde(flatten)]
    pub summary: &'a RunSummary,
    pub conflicts: &'a [Flag],
    pub audit: &'a [AuditEntry],
}

/// Pretty JSON with a trailing newline.
pub fn to_pretty_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, String> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
    bytes.push(b'\n');
    Ok(bytes)
}
