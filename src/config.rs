//! TOML configuration parsing, environment overrides, and validation.
//!
//! Configuration is layered: built-in defaults, then an optional TOML
//! file, then `LOOM_*` environment variables. Every knob has a default,
//! so the engine starts with no config file at all.
//!
//! # Environment overrides
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `LOOM_BIND_ADDR` / `LOOM_BIND_PORT` | `server.bind_addr` / `server.bind_port` |
//! | `LOOM_REQUEST_TIMEOUT_MS` | `server.request_timeout_ms` |
//! | `LOOM_MAX_INFLIGHT` | `server.max_inflight` |
//! | `LOOM_CONFIDENCE_THRESHOLD` | `engine.confidence_threshold` |
//! | `LOOM_MAX_ALTERNATIVES` | `engine.max_alternatives` |
//! | `LOOM_MODEL_NAME` | `embedding.model` |
//! | `LOOM_VECTOR_DIM` | `embedding.dims` |
//! | `LOOM_ARTIFACT` | `index.artifact` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::embedding::Preprocessing;
use crate::models::MAX_ALTERNATIVES_RANGE;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// Per-request wall-clock budget for `/classify`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Bound on concurrent in-flight classifications; excess requests are
    /// rejected as `overloaded` rather than queued.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            request_timeout_ms: default_request_timeout_ms(),
            max_inflight: default_max_inflight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    7700
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_max_inflight() -> usize {
    64
}

impl ServerConfig {
    /// The socket address string the gateway binds to.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }
}

/// Defaults applied to classification requests that omit the knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_alternatives: default_max_alternatives(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_max_alternatives() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hashed"` (default, offline) or `"local"` (fastembed feature).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name for the `local` provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimension for the `hashed` provider; the `local` provider
    /// derives it from the model.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_true")]
    pub lowercase: bool,
    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
    /// Input truncation in characters (0 = unlimited).
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            lowercase: true,
            collapse_whitespace: true,
            max_chars: default_max_chars(),
        }
    }
}

fn default_provider() -> String {
    "hashed".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_true() -> bool {
    true
}
fn default_max_chars() -> usize {
    512
}

impl EmbeddingConfig {
    /// The text normalisation policy these settings describe.
    pub fn preprocessing(&self) -> Preprocessing {
        Preprocessing {
            lowercase: self.lowercase,
            collapse_whitespace: self.collapse_whitespace,
            max_chars: self.max_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Default artifact path for startup load and `/reload-patterns`
    /// requests that do not name a source.
    #[serde(default = "default_artifact")]
    pub artifact: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            artifact: default_artifact(),
        }
    }
}

fn default_artifact() -> PathBuf {
    PathBuf::from("assets/patterns.loom.json")
}

/// Loads configuration: defaults, optionally overlaid with a TOML file,
/// then `LOOM_*` environment variables, then validated.
///
/// A `None` path means "no config file"; a named file that is missing or
/// malformed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(addr) = std::env::var("LOOM_BIND_ADDR") {
        config.server.bind_addr = addr;
    }
    if let Some(port) = parse_env("LOOM_BIND_PORT")? {
        config.server.bind_port = port;
    }
    if let Some(timeout) = parse_env("LOOM_REQUEST_TIMEOUT_MS")? {
        config.server.request_timeout_ms = timeout;
    }
    if let Some(max_inflight) = parse_env("LOOM_MAX_INFLIGHT")? {
        config.server.max_inflight = max_inflight;
    }
    if let Some(threshold) = parse_env("LOOM_CONFIDENCE_THRESHOLD")? {
        config.engine.confidence_threshold = threshold;
    }
    if let Some(max_alternatives) = parse_env("LOOM_MAX_ALTERNATIVES")? {
        config.engine.max_alternatives = max_alternatives;
    }
    if let Ok(model) = std::env::var("LOOM_MODEL_NAME") {
        config.embedding.model = model;
    }
    if let Some(dims) = parse_env("LOOM_VECTOR_DIM")? {
        config.embedding.dims = dims;
    }
    if let Ok(artifact) = std::env::var("LOOM_ARTIFACT") {
        config.index.artifact = PathBuf::from(artifact);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw
                .parse()
                .map_err(|e| anyhow::anyhow!("{name}={raw} is invalid: {e}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.server.request_timeout_ms == 0 {
        anyhow::bail!("server.request_timeout_ms must be > 0");
    }
    if config.server.max_inflight == 0 {
        anyhow::bail!("server.max_inflight must be > 0");
    }

    if !(0.0..=1.0).contains(&config.engine.confidence_threshold) {
        anyhow::bail!("engine.confidence_threshold must be in [0.0, 1.0]");
    }
    let (min, max) = MAX_ALTERNATIVES_RANGE;
    if config.engine.max_alternatives < min || config.engine.max_alternatives > max {
        anyhow::bail!("engine.max_alternatives must be in [{min}, {max}]");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hashed" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashed or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.server.bind(), "127.0.0.1:7700");
        assert_eq!(config.server.request_timeout_ms, 2000);
        assert_eq!(config.server.max_inflight, 64);
        assert_eq!(config.engine.confidence_threshold, 0.5);
        assert_eq!(config.engine.max_alternatives, 3);
        assert_eq!(config.embedding.provider, "hashed");
        assert_eq!(config.embedding.dims, 384);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind_port = 9000

            [engine]
            confidence_threshold = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind_port, 9000);
        assert_eq!(config.server.bind_addr, "127.0.0.1");
        assert_eq!(config.engine.confidence_threshold, 0.25);
        assert_eq!(config.engine.max_alternatives, 3);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = Config::default();
        config.engine.confidence_threshold = 1.5;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.engine.max_alternatives = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.server.max_inflight = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.provider = "quantum".to_string();
        assert!(validate(&config).is_err());
    }
}
