mod config_cmd;
mod record;
mod status;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use record::RecordCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use dualstore_core::{BackendStatus, DataHandler, Envelope, Record, StoreError};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// A failure already printed to stdout as a JSON envelope.
#[derive(Debug)]
pub struct Reported;

impl std::fmt::Display for Reported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request failed")
    }
}

impl std::error::Error for Reported {}

/// Prints an operation result. JSON output is always an envelope.
pub(crate) fn emit<T: Serialize>(
    format: OutputFormat,
    result: Result<T, StoreError>,
    text: impl FnOnce(&T),
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            let failed = result.is_err();
            println!(
                "{}",
                serde_json::to_string_pretty(&Envelope::from_result(result))?
            );
            if failed {
                return Err(Box::new(Reported));
            }
        }
        OutputFormat::Text => text(&result?),
    }
    Ok(())
}

/// Keeps the discovery result reported during `init`.
#[derive(Default)]
pub struct StatusRecorder {
    status: Mutex<Option<BackendStatus>>,
}

impl StatusRecorder {
    pub fn status(&self) -> Option<BackendStatus> {
        self.status.lock().ok().and_then(|s| s.clone())
    }

    /// Prints the offline notice to stderr, if discovery failed.
    pub fn warn_if_offline(&self) {
        if let Some(BackendStatus::Unreachable { message }) = self.status() {
            eprintln!("Note: {}", message);
        }
    }
}

impl DataHandler for StatusRecorder {
    fn on_data_changed(&self, records: &[Record]) {
        tracing::debug!("Collection now holds {} record(s)", records.len());
    }

    fn on_backend_status(&self, status: &BackendStatus) {
        if let Ok(mut slot) = self.status.lock() {
            *slot = Some(status.clone());
        }
    }
}
