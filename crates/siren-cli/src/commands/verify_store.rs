use super::{json_pretty, Failure, EXIT_STORE_ERROR, EXIT_SUCCESS};
use siren_core::CoreError;
use siren_store::{verify_store_integrity, FileStore};
use std::path::Path;

pub fn run(store: &Path, json: bool) -> Result<u8, Failure> {
    let store = FileStore::open_existing(store).map_err(CoreError::from)?;
    let report = verify_store_integrity(&store).map_err(CoreError::from)?;

    if json {
        let payload = serde_json::json!({
            "checked": report.checked(),
            "incidents": report.incidents_checked,
            "ambulances": report.ambulances_checked,
            "items": report.items_checked,
            "passed": report.passed,
            "pending_wal": report.pending_wal,
            "failed": report.failed.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: {}/{} records passed",
            report.passed,
            report.checked()
        );
        if report.pending_wal > 0 {
            println!("  incomplete WAL entries: {}", report.pending_wal);
        }
        for f in &report.failed {
            println!("  FAIL {}: {}", f.row, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
