use super::{json_pretty, Failure, EXIT_SUCCESS, STORE_CONFIG};
use siren_core::Dispatcher;
use siren_schema::SirenConfig;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_atomic(dest: &Path, content: &str) -> Result<(), String> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| format!("write temp file: {e}"))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| format!("write temp file: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("fsync temp file: {e}"))?;
    tmp.persist(dest)
        .map_err(|e| format!("persist config: {}", e.error))?;
    Ok(())
}

/// Provision the store and pin the effective config next to it.
///
/// The store's `siren.toml` is only written when missing, or with `--force`,
/// so later commands see the same fleet and restock policy.
pub fn run(store: &Path, config: &SirenConfig, force: bool, json: bool) -> Result<u8, Failure> {
    let dispatcher = Dispatcher::open(store, config)?;
    let report = dispatcher.provision(config)?;

    let dest = store.join(STORE_CONFIG);
    let wrote_config = force || !dest.exists();
    if wrote_config {
        let body = config
            .canonical_toml()
            .map_err(|e| format!("serialize config: {e}"))?;
        write_atomic(&dest, &body)?;
    }

    if json {
        let payload = serde_json::json!({
            "store": store.display().to_string(),
            "units_created": report.units_created,
            "items_created": report.items_created,
            "config_written": wrote_config,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if report.is_empty() {
            println!("store already provisioned at {}", store.display());
        } else {
            println!(
                "provisioned {} unit(s) and {} item(s) at {}",
                report.units_created.len(),
                report.items_created.len(),
                store.display()
            );
        }
        if wrote_config {
            println!("wrote {}", dest.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
