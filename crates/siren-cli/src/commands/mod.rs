pub mod completions;
pub mod incident;
pub mod init;
pub mod maintain;
pub mod status;
pub mod stock;
pub mod verify_store;

use siren_core::{CoreError, Dispatcher, ErrorKind};
use siren_schema::{parse_config_file, KeyError, SirenConfig};
use siren_store::StoreError;
use std::path::{Path, PathBuf};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_REJECTED: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_EXHAUSTED: u8 = 4;

/// Config file name inside the store directory, written by `siren init`.
pub const STORE_CONFIG: &str = "siren.toml";

/// A failed command: what to print and which exit code to leave with.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl Failure {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "kind": self.kind,
            "message": self.message,
        })
    }
}

pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::RejectedTransition | ErrorKind::InvalidArgument => EXIT_REJECTED,
        ErrorKind::InventoryExhausted => EXIT_EXHAUSTED,
        ErrorKind::PersistenceFault => EXIT_STORE_ERROR,
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let kind = e.kind();
        Self {
            code: exit_code(kind),
            kind: Some(kind),
            message: e.to_string(),
        }
    }
}

impl From<KeyError> for Failure {
    fn from(e: KeyError) -> Self {
        CoreError::from(e).into()
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            kind: None,
            message,
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// `--config` wins; otherwise the store's own `siren.toml`; otherwise defaults.
pub fn config_path(store: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let in_store = store.join(STORE_CONFIG);
    in_store.is_file().then_some(in_store)
}

pub fn load_config(store: &Path, explicit: Option<&Path>) -> Result<SirenConfig, Failure> {
    match config_path(store, explicit) {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            parse_config_file(&path).map_err(|e| CoreError::from(e).into())
        }
        None => Ok(SirenConfig::default()),
    }
}

/// Open a store created earlier by `siren init`. A missing store is a store
/// error, not an invitation to create an empty one.
pub fn open_dispatcher(store: &Path, config: &SirenConfig) -> Result<Dispatcher, Failure> {
    Dispatcher::open_existing(store, config).map_err(|e| {
        let missing = matches!(e, CoreError::Persistence(StoreError::Unavailable(_)));
        let mut failure = Failure::from(e);
        if missing {
            failure.message.push_str("; run `siren init` first");
        }
        failure
    })
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "IDLE" | "CLOSED" => Style::new().green().apply_to(status).to_string(),
        "PENDING" => Style::new().yellow().apply_to(status).to_string(),
        "DISPATCHED" => Style::new().cyan().apply_to(status).to_string(),
        "ON_SCENE" => Style::new().cyan().bold().apply_to(status).to_string(),
        "TRANSPORTING" => Style::new().magenta().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn format_level(value: f64) -> String {
    use console::Style;
    let text = format!("{value:>5.1}");
    if value <= 25.0 {
        Style::new().red().apply_to(text).to_string()
    } else {
        text
    }
}
