use std::net::SocketAddr;
use std::path::PathBuf;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::{to_env_var, ConfigError};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct GatewaySettings {
    /// Base URL of the local model daemon.
    #[serde(default = "default_local_host")]
    pub local_host: String,
    /// Base URL of the cloud API.
    #[serde(default = "default_cloud_host")]
    pub cloud_host: String,
    /// Cloud credential. Absence is not a startup error; it surfaces
    /// per-request as a missing-credential failure.
    #[serde(default)]
    pub cloud_api_key: Option<String>,
    /// Directory for persisted histories; platform data dir when unset.
    #[serde(default)]
    pub memory_dir: Option<String>,
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default = "default_trim_budget")]
    pub trim_budget: usize,
    #[serde(default = "default_recall_window")]
    pub recall_window: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            local_host: default_local_host(),
            cloud_host: default_cloud_host(),
            cloud_api_key: None,
            memory_dir: None,
            default_agent: default_agent(),
            trim_budget: default_trim_budget(),
            recall_window: default_recall_window(),
        }
    }
}

impl GatewaySettings {
    pub fn memory_path(&self) -> PathBuf {
        match &self.memory_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("parley")
                .join("memory"),
        }
    }

    /// The configured credential, falling back to the conventional env var.
    pub fn api_key(&self) -> Option<String> {
        self.cloud_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_local_host() -> String {
    parley::backends::local::LOCAL_HOST.to_string()
}

fn default_cloud_host() -> String {
    parley::backends::cloud::CLOUD_HOST.to_string()
}

fn default_agent() -> String {
    "Scribe".to_string()
}

fn default_trim_budget() -> usize {
    parley::history::DEFAULT_TRIM_BUDGET
}

fn default_recall_window() -> usize {
    parley::history::DEFAULT_RECALL_WINDOW
}
