use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:20000".parse().expect("default listen address")
}

fn default_max_connections() -> usize {
    1000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub format: Option<LogFormat>,
    #[serde(default)]
    pub targets: Option<Vec<LogTarget>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some(LogLevel::Info),
            format: Some(LogFormat::Text),
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]),
        }
    }
}

/// External image transform invoked for intercepted responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Argv template for the transform command. The tokens `{input}` and
    /// `{output}` are replaced per invocation with the captured image
    /// path and the expected result path. Empty means no transform is
    /// configured.
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the relay listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Upper bound on concurrently served client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Optional deadline for the upstream connect and response head.
    /// Unset means the relay waits as long as the origin does.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Directory for temporary image stores; the system temp directory
    /// when unset.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
            connect_timeout_secs: None,
            spool_dir: None,
            transform: TransformConfig::default(),
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("failed to read {}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path, e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ProxyError::Config(format!("failed to write {}: {}", path, e)))?;
        Ok(())
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
