use clap::Subcommand;
use dualstore_core::{DataStore, Payload, Record};
use serde_json::Value;
use std::io::{self, Write};

use super::{emit, OutputFormat};

#[derive(Subcommand)]
pub enum RecordCommand {
    /// List records
    List {
        /// Only records of this type
        #[arg(long = "type", short = 't')]
        record_type: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Create a record
    Create {
        /// Record type (e.g. client, order)
        #[arg(long = "type", short = 't')]
        record_type: String,

        /// Payload field (can be repeated). Values that parse as JSON keep their type.
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Payload as a JSON object, merged before --field values
        #[arg(long)]
        json: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Merge fields into an existing record
    Update {
        /// Local id or backend id
        key: String,

        /// Payload field (can be repeated)
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Patch as a JSON object, merged before --field values
        #[arg(long)]
        json: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a record
    Delete {
        /// Local id or backend id
        key: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove every record from the local mirror
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl RecordCommand {
    pub async fn run(&self, store: &DataStore) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            RecordCommand::List {
                record_type,
                format,
            } => {
                let result = match record_type {
                    Some(t) => store.read(t).await,
                    None => Ok(store.records().await),
                };
                emit(*format, result, |records| print_table(records))
            }
            RecordCommand::Create {
                record_type,
                fields,
                json,
                format,
            } => {
                let payload = build_payload(fields, json.as_deref())?;
                let result = store.create(record_type, payload).await;
                emit(*format, result, |record| {
                    println!("Created {} {}", record.record_type, record.id);
                })
            }
            RecordCommand::Update {
                key,
                fields,
                json,
                format,
            } => {
                let patch = build_payload(fields, json.as_deref())?;
                let result = store.update(key, patch).await;
                emit(*format, result, |record| {
                    println!("Updated {} {}", record.record_type, record.id);
                })
            }
            RecordCommand::Delete { key, format } => {
                let result = store.delete(key).await;
                emit(*format, result, |record| {
                    println!("Deleted {} {}", record.record_type, record.id);
                })
            }
            RecordCommand::Clear { force, format } => {
                // Confirm unless --force is used
                if !force {
                    print!("Remove all records from the local mirror? [y/N] ");
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Clear cancelled.");
                        return Ok(());
                    }
                }

                let result = store.clear().await;
                emit(*format, result, |_| println!("Mirror cleared."))
            }
        }
    }
}

fn print_table(records: &[Record]) {
    if records.is_empty() {
        println!("No records found.");
        return;
    }

    println!("{:<15}  {:<8}  {:<12}  FIELDS", "ID", "BACKEND", "TYPE");
    println!("{}", "-".repeat(60));
    for record in records {
        let backend = record
            .backend_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<15}  {:<8}  {:<12}  {}",
            record.id,
            backend,
            record.record_type,
            Value::Object(record.payload.clone())
        );
    }
}

/// Builds a payload from a JSON object and `key=value` pairs.
fn build_payload(fields: &[String], json: Option<&str>) -> Result<Payload, String> {
    let mut payload = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err("--json must be a JSON object".to_string()),
            Err(e) => return Err(format!("Invalid --json: {}", e)),
        },
        None => Payload::new(),
    };

    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| format!("Invalid field '{}'. Expected KEY=VALUE", field))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid field '{}'. Key is empty", field));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        payload.insert(key.to_string(), value);
    }

    Ok(payload)
}
