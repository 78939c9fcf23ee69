use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn print_value<T: std::fmt::Display>(name: &str, value: &ConfigValue<T>) {
    println!("{}: {}", name, value.value);
    println!("  source: {}", value.source);
    println!();
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "remote_url: {}",
                            config.remote_url.value.as_deref().unwrap_or("(none)")
                        );
                        println!("  source: {}", config.remote_url.source);
                        println!();

                        print_value("backend_port", &config.backend_port);
                        println!("mirror_dir: {}", config.mirror_dir.value.display());
                        println!("  source: {}", config.mirror_dir.source);
                        println!();
                        print_value("policy", &config.policy);
                        print_value("request_timeout_secs", &config.request_timeout_secs);
                    }
                }
                Ok(())
            }
        }
    }
}
