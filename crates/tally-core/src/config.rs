//! Service configuration
//!
//! Resolution order (later wins):
//! 1. Embedded defaults (`config/tally.toml`, compiled into the binary)
//! 2. Override file: `--config <path>` or `~/.local/share/tally/config.toml`
//! 3. Environment variables
//!
//! Environment variables:
//! - `TALLY_CHUNK_SIZE`: line items per committed chunk
//! - `CLASSIFIER`: `ml` or `fallback`
//! - `ML_MODELS_PATH`: directory holding the model artifacts
//! - `ML_INFERENCE_TIMEOUT_SECS`: per-chunk inference timeout
//! - `RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USERNAME`, `RABBITMQ_PASSWORD`,
//!   `RABBITMQ_VHOST`, `RABBITMQ_QUEUE_NAME`, `RABBITMQ_TIMEOUT_SECS`
//! - `IDENTITY_SERVICE_URL`, `IDENTITY_SERVICE_TIMEOUT`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/tally.toml");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { chunk_size: 500 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Ml,
    Fallback,
}

impl std::str::FromStr for ClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ml" => Ok(Self::Ml),
            "fallback" | "simple" => Ok(Self::Fallback),
            _ => Err(format!("Unknown classifier: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub models_path: PathBuf,
    pub inference_timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Ml,
            models_path: PathBuf::from("models"),
            inference_timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs.max(1))
    }
}

/// Message broker (RabbitMQ HTTP API) settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Publishing is disabled when unset
    pub host: Option<String>,
    pub scheme: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub queue_name: String,
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: None,
            scheme: "http".to_string(),
            port: 15672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            queue_name: "batch_processed".to_string(),
            timeout_secs: 5,
        }
    }
}

impl BrokerConfig {
    pub fn base_url(&self) -> Option<String> {
        self.host
            .as_ref()
            .map(|host| format!("{}://{}:{}", self.scheme, host, self.port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Token validation is disabled when unset
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 5,
        }
    }
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Full service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub pipeline: PipelineConfig,
    pub classifier: ClassifierConfig,
    pub broker: BrokerConfig,
    pub identity: IdentityConfig,
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config.toml"))
}

impl ServiceConfig {
    /// Load file config (override first, then embedded defaults) and apply
    /// process environment overrides
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(override_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load file config without looking at the environment
    pub fn load_file(override_path: Option<&Path>) -> Result<Self> {
        let path = match override_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => default_config_path().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading config override");
                let content = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::parse(&content)
            }
            None => Self::parse(DEFAULT_CONFIG),
        }
    }

    /// Parse TOML; missing keys take their defaults
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_size == 0 {
            return Err(Error::Config("pipeline.chunk_size must be at least 1".to_string()));
        }
        if self.broker.queue_name.trim().is_empty() {
            return Err(Error::Config("broker.queue_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply environment overrides from a variable lookup
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        fn number<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .parse()
                .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
        }

        if let Some(v) = get("TALLY_CHUNK_SIZE") {
            self.pipeline.chunk_size = number("TALLY_CHUNK_SIZE", v)?;
        }

        if let Some(v) = get("CLASSIFIER") {
            self.classifier.kind = v.parse().map_err(Error::Config)?;
        }
        if let Some(v) = get("ML_MODELS_PATH") {
            self.classifier.models_path = PathBuf::from(v);
        }
        if let Some(v) = get("ML_INFERENCE_TIMEOUT_SECS") {
            self.classifier.inference_timeout_secs = number("ML_INFERENCE_TIMEOUT_SECS", v)?;
        }

        if let Some(v) = get("RABBITMQ_HOST") {
            self.broker.host = Some(v);
        }
        if let Some(v) = get("RABBITMQ_PORT") {
            self.broker.port = number("RABBITMQ_PORT", v)?;
        }
        if let Some(v) = get("RABBITMQ_USERNAME") {
            self.broker.username = v;
        }
        if let Some(v) = get("RABBITMQ_PASSWORD") {
            self.broker.password = v;
        }
        if let Some(v) = get("RABBITMQ_VHOST") {
            self.broker.vhost = v;
        }
        if let Some(v) = get("RABBITMQ_QUEUE_NAME") {
            self.broker.queue_name = v;
        }
        if let Some(v) = get("RABBITMQ_TIMEOUT_SECS") {
            self.broker.timeout_secs = number("RABBITMQ_TIMEOUT_SECS", v)?;
        }

        if let Some(v) = get("IDENTITY_SERVICE_URL") {
            self.identity.url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = get("IDENTITY_SERVICE_TIMEOUT") {
            // Accepts "5" as well as "5.0"
            let secs: f64 = number("IDENTITY_SERVICE_TIMEOUT", v)?;
            self.identity.timeout_secs = secs.ceil().max(1.0) as u64;
        }

        self.validate()
    }

    /// Render as TOML with secrets masked
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut masked = self.clone();
        if !masked.broker.password.is_empty() {
            masked.broker.password = "********".to_string();
        }
        toml::to_string_pretty(&masked)
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config = ServiceConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = ServiceConfig::parse(
            r#"
            [pipeline]
            chunk_size = 100

            [broker]
            host = "rabbit.internal"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.chunk_size, 100);
        assert_eq!(config.broker.queue_name, "batch_processed");
        assert_eq!(
            config.broker.base_url().as_deref(),
            Some("http://rabbit.internal:15672")
        );
        assert_eq!(config.classifier.kind, ClassifierKind::Ml);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ServiceConfig::parse("[pipeline]\nchunk_size = 0\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(env(&[
                ("TALLY_CHUNK_SIZE", "250"),
                ("CLASSIFIER", "fallback"),
                ("ML_MODELS_PATH", "/srv/models"),
                ("RABBITMQ_HOST", "localhost"),
                ("RABBITMQ_PORT", "15673"),
                ("RABBITMQ_QUEUE_NAME", "insights"),
                ("IDENTITY_SERVICE_URL", "http://identity:8000/"),
                ("IDENTITY_SERVICE_TIMEOUT", "2.5"),
            ]))
            .unwrap();

        assert_eq!(config.pipeline.chunk_size, 250);
        assert_eq!(config.classifier.kind, ClassifierKind::Fallback);
        assert_eq!(config.classifier.models_path, PathBuf::from("/srv/models"));
        assert_eq!(config.broker.base_url().as_deref(), Some("http://localhost:15673"));
        assert_eq!(config.broker.queue_name, "insights");
        assert_eq!(config.identity.url.as_deref(), Some("http://identity:8000"));
        assert_eq!(config.identity.timeout_secs, 3);
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env(env(&[("RABBITMQ_PORT", "amqp")]))
            .unwrap_err();
        assert!(err.to_string().contains("RABBITMQ_PORT"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = ServiceConfig::default();
        config.apply_env(env(&[("RABBITMQ_HOST", "  ")])).unwrap();
        assert!(config.broker.host.is_none());
    }

    #[test]
    fn test_missing_override_file() {
        let err = ServiceConfig::load_file(Some(Path::new("/nonexistent/tally.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "[classifier]\nkind = \"fallback\"\n").unwrap();
        let config = ServiceConfig::load_file(Some(&path)).unwrap();
        assert_eq!(config.classifier.kind, ClassifierKind::Fallback);
    }

    #[test]
    fn test_masked_toml() {
        let rendered = ServiceConfig::default().to_masked_toml().unwrap();
        assert!(rendered.contains("********"));
        assert!(!rendered.contains("password = \"guest\""));
    }
}
