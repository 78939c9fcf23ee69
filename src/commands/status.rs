//! Connection and mirror summary.

use clap::Args;
use dualstore_core::{BackendStatus, DataStore, Envelope, SyncPolicy};
use serde::Serialize;

use super::{OutputFormat, StatusRecorder};
use crate::config::Config;

/// Show backend connection and record counts
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct StatusReport {
    policy: SyncPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendStatus>,
    candidates: Vec<String>,
    mirror_dir: String,
    records: usize,
    pending: usize,
}

impl StatusCommand {
    pub async fn run(
        &self,
        store: &DataStore,
        recorder: &StatusRecorder,
        candidates: Vec<String>,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let records = store.records().await;
        let report = StatusReport {
            policy: store.policy(),
            backend: recorder.status(),
            candidates,
            mirror_dir: config.mirror_dir.value.display().to_string(),
            records: records.len(),
            pending: records.iter().filter(|r| r.is_pending()).count(),
        };

        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&Envelope::ok_with_data(report))?
                );
            }
            OutputFormat::Text => print_report(&report),
        }
        Ok(())
    }
}

fn print_report(report: &StatusReport) {
    println!("Status");
    println!("======");
    println!();
    println!("Policy:  {}", report.policy);

    match &report.backend {
        Some(BackendStatus::Connected { base_url, kind }) => {
            println!("Backend: connected to {} ({})", base_url, kind);
        }
        Some(BackendStatus::Unreachable { message }) => {
            println!("Backend: unreachable");
            println!("  {}", message);
            println!("  Tried:");
            for url in &report.candidates {
                println!("    {}", url);
            }
        }
        None => println!("Backend: not used"),
    }

    println!("Mirror:  {}", report.mirror_dir);
    println!();
    println!("Records: {}", report.records);
    if report.policy == SyncPolicy::Hybrid {
        println!("Pending: {} (not yet on the backend)", report.pending);
    }
}
