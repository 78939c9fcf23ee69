use clap::{Parser, Subcommand};
use dualstore_core::{
    candidate_urls, DataHandler, DataStore, DiscoveryConfig, HttpBackend, LocalMirror,
    StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod commands;
mod config;

use commands::{
    ConfigCommand, RecordCommand, Reported, StatusCommand, StatusRecorder, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "dualstore")]
#[command(version)]
#[command(about = "Local-first record store with an optional backend", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Record(RecordCommand),

    /// Show backend connection and mirror state
    Status(StatusCommand),

    /// Push pending records and merge the backend collection
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        if !e.is::<Reported>() {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

/// A data store opened and initialised for one command.
struct Session {
    store: DataStore,
    recorder: Arc<StatusRecorder>,
    candidates: Vec<String>,
}

impl Session {
    async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let candidates = candidate_urls(&DiscoveryConfig {
            remote_url: config.remote_url.value.clone(),
            page_origin: None,
            backend_port: config.backend_port.value,
        });
        let backend =
            HttpBackend::with_timeout(Duration::from_secs(config.request_timeout_secs.value))?;
        let store = DataStore::new(
            StoreConfig {
                policy: config.policy.value,
                candidates: candidates.clone(),
            },
            LocalMirror::in_dir(config.mirror_dir.value.clone()),
            Arc::new(backend),
        );

        let recorder = Arc::new(StatusRecorder::default());
        let handler: Arc<dyn DataHandler> = recorder.clone();
        store.init(Some(handler)).await?;

        Ok(Self {
            store,
            recorder,
            candidates,
        })
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Record(cmd)) => {
            let session = Session::open(&config).await?;
            session.recorder.warn_if_offline();
            cmd.run(&session.store).await?;
        }
        Some(Commands::Status(cmd)) => {
            let session = Session::open(&config).await?;
            cmd.run(&session.store, &session.recorder, session.candidates, &config)
                .await?;
        }
        Some(Commands::Sync(cmd)) => {
            let session = Session::open(&config).await?;
            session.recorder.warn_if_offline();
            cmd.run(&session.store).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
