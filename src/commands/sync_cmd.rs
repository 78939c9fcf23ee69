//! Re-sync the local mirror with the backend store.

use clap::Args;
use dualstore_core::DataStore;

use super::{emit, OutputFormat};

/// Push pending records and merge the backend collection
#[derive(Args)]
pub struct SyncCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SyncCommand {
    pub async fn run(&self, store: &DataStore) -> Result<(), Box<dyn std::error::Error>> {
        let result = store.sync().await;
        emit(self.format, result, |report| {
            println!("Sync complete.");
            println!("  pushed:  {}", report.pushed);
            if report.failed > 0 {
                println!("  failed:  {} (still pending)", report.failed);
            }
            println!("  adopted: {}", report.adopted);
            println!("  dropped: {}", report.dropped);
        })
    }
}
