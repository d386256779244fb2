//! File based configuration: where to consume from, where to publish to, and how to log.
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration file {path} not found: no such file or directory")]
    NotFound { path: PathBuf },
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse JSON configuration {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to parse YAML configuration {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct FlattenersConfig {
    #[serde(rename = "brokerAddress")]
    pub broker_address: String,
    #[serde(rename = "inputTopics")]
    pub input_topics: Vec<String>,
    /// Publish order, not a priority.
    #[serde(rename = "destinationTopics", default)]
    pub destination_topics: Vec<String>,
}

impl FlattenersConfig {
    fn validate(&self) -> Result<(), String> {
        if self.broker_address.trim().is_empty() {
            return Err("brokerAddress must not be empty".to_string());
        }
        if self.input_topics.is_empty() {
            return Err("inputTopics must contain at least one topic".to_string());
        }
        if let Some(topic) = self
            .input_topics
            .iter()
            .chain(&self.destination_topics)
            .find(|t| t.trim().is_empty())
        {
            return Err(format!("topic names must not be empty, got {topic:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl From<&str> for LogLevel {
    /// Unrecognized levels fall back to `Info`.
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "fatal" => LogLevel::Fatal,
            "panic" => LogLevel::Panic,
            _ => LogLevel::Info,
        }
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        LogLevel::from(value.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "Trace",
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Warn => "Warn",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
            LogLevel::Panic => "Panic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Empty means stdout.
    #[serde(rename = "logFilePath")]
    pub log_file_path: String,
    #[serde(rename = "logLevel")]
    pub log_level: LogLevel,
}

pub fn load_flatteners_config(path: impl AsRef<Path>) -> Result<FlattenersConfig, SettingsError> {
    trace!("Setting up flatteners config...");
    let (path, config): (_, FlattenersConfig) = read_config(path.as_ref())?;
    config
        .validate()
        .map_err(|reason| SettingsError::Invalid { path, reason })?;
    trace!("Setting up flatteners config finished");
    Ok(config)
}

pub fn load_log_config(path: impl AsRef<Path>) -> Result<LogConfig, SettingsError> {
    let (_, config) = read_config(path.as_ref())?;
    Ok(config)
}

fn read_config<T: DeserializeOwned>(path: &Path) -> Result<(PathBuf, T), SettingsError> {
    let path = std::path::absolute(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let contents = match std::fs::read(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(SettingsError::NotFound { path }),
        Err(source) => return Err(SettingsError::Io { path, source }),
    };

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    );

    let config = if is_yaml {
        serde_yaml::from_slice(&contents).map_err(|source| SettingsError::Yaml {
            path: path.clone(),
            source,
        })?
    } else {
        serde_json::from_slice(&contents).map_err(|source| SettingsError::Json {
            path: path.clone(),
            source,
        })?
    };

    Ok((path, config))
}
