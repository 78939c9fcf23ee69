use dualstore_core::{SyncPolicy, DEFAULT_BACKEND_PORT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Client configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Backend URL tried before the loopback guesses
    pub remote_url: ConfigValue<Option<String>>,
    /// Port the backend store listens on
    pub backend_port: ConfigValue<u16>,
    /// Directory holding the local mirror blob
    pub mirror_dir: ConfigValue<PathBuf>,
    pub policy: ConfigValue<SyncPolicy>,
    /// Per-request timeout for backend calls
    pub request_timeout_secs: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    remote_url: Option<String>,
    backend_port: Option<u16>,
    mirror_dir: Option<PathBuf>,
    policy: Option<String>,
    request_timeout_secs: Option<u64>,
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key, raw.to_string()))
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut remote_url = ConfigValue::new(None, ConfigSource::Default);
        let mut backend_port = ConfigValue::new(DEFAULT_BACKEND_PORT, ConfigSource::Default);
        let mut mirror_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut policy = ConfigValue::new(SyncPolicy::default(), ConfigSource::Default);
        let mut request_timeout_secs =
            ConfigValue::new(DEFAULT_TIMEOUT_SECS, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(url) = file_config.remote_url {
                remote_url = ConfigValue::new(Some(url), ConfigSource::File);
            }
            if let Some(port) = file_config.backend_port {
                backend_port = ConfigValue::new(port, ConfigSource::File);
            }
            if let Some(dir) = file_config.mirror_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                mirror_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(raw) = file_config.policy {
                policy = ConfigValue::new(parse_value("policy", &raw)?, ConfigSource::File);
            }
            if let Some(secs) = file_config.request_timeout_secs {
                request_timeout_secs = ConfigValue::new(secs, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("DUALSTORE_REMOTE_URL") {
            let url = Some(url).filter(|u| !u.trim().is_empty());
            remote_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(raw) = std::env::var("DUALSTORE_BACKEND_PORT") {
            backend_port = ConfigValue::new(
                parse_value("backend_port", &raw)?,
                ConfigSource::Environment,
            );
        }
        if let Ok(dir) = std::env::var("DUALSTORE_MIRROR_DIR") {
            mirror_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(raw) = std::env::var("DUALSTORE_POLICY") {
            policy = ConfigValue::new(parse_value("policy", &raw)?, ConfigSource::Environment);
        }

        Ok(Self {
            remote_url,
            backend_port,
            mirror_dir,
            policy,
            request_timeout_secs,
            config_file,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/dualstore/
    /// - macOS: ~/Library/Application Support/dualstore/
    /// - Windows: %APPDATA%/dualstore/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dualstore")
    }

    /// Default data directory, where the mirror lives unless configured.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dualstore")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, raw) => {
                write!(f, "Invalid value for {}: '{}'", key, raw)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.config_file.is_none());
        assert_eq!(config.request_timeout_secs.value, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.request_timeout_secs.source, ConfigSource::Default);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "request_timeout_secs: 3").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.request_timeout_secs.value, 3);
        assert_eq!(config.request_timeout_secs.source, ConfigSource::File);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_mirror_dir_resolves_against_config_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "mirror_dir: mirror\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.mirror_dir.value, temp_dir.path().join("mirror"));
        assert_eq!(config.mirror_dir.source, ConfigSource::File);
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "remote_url: http://from-file:3000").unwrap();

        std::env::set_var("DUALSTORE_REMOTE_URL", "http://from-env:3000");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.remote_url.value.as_deref(),
            Some("http://from-env:3000")
        );
        assert_eq!(config.remote_url.source, ConfigSource::Environment);

        // Clean up
        std::env::remove_var("DUALSTORE_REMOTE_URL");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_parse_value() {
        let policy: SyncPolicy = parse_value("policy", "local-only").unwrap();
        assert_eq!(policy, SyncPolicy::LocalOnly);

        let err = parse_value::<u16>("backend_port", "not-a-port").unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for backend_port: 'not-a-port'");
    }
}
