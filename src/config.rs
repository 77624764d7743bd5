//! Runtime configuration: connection parameters, the delta-ratio policy,
//! and the cache/metrics backend selections, all overridable by `DG_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// S3 endpoint URL override, for MinIO/LocalStack/other S3-compatible hosts.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,

    /// Delta/file size ratio above which a delta is still stored but a
    /// policy-violation warning is attached to the put summary.
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    /// Directory backing the filesystem reference cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_cache_memory_size_mb")]
    pub cache_memory_size_mb: usize,

    #[serde(default)]
    pub metrics: MetricsBackend,

    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    #[default]
    Logging,
    Noop,
    Cloudwatch,
}

fn default_force_path_style() -> bool {
    false
}

fn default_max_ratio() -> f64 {
    0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/.deltaglider/reference_cache")
}

fn default_cache_memory_size_mb() -> usize {
    100
}

fn default_metrics_namespace() -> String {
    "DeltaGlider".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: None,
            profile: None,
            force_path_style: default_force_path_style(),
            max_ratio: default_max_ratio(),
            log_level: default_log_level(),
            cache_backend: CacheBackend::default(),
            cache_dir: default_cache_dir(),
            cache_memory_size_mb: default_cache_memory_size_mb(),
            metrics: MetricsBackend::default(),
            metrics_namespace: default_metrics_namespace(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Layer `DG_*` environment variables on top of defaults. Malformed
    /// values for a given key are ignored rather than rejected, so a typo
    /// in an optional override never blocks startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DG_ENDPOINT_URL") {
            config.endpoint_url = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_REGION") {
            config.region = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_PROFILE") {
            config.profile = Some(v);
        }
        if let Ok(v) = std::env::var("DG_FORCE_PATH_STYLE") {
            config.force_path_style = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("DG_MAX_RATIO") {
            if let Ok(parsed) = v.parse() {
                config.max_ratio = parsed;
            }
        }
        if let Ok(v) = std::env::var("DG_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("DG_CACHE_BACKEND") {
            config.cache_backend = match v.as_str() {
                "memory" => CacheBackend::Memory,
                _ => CacheBackend::Filesystem,
            };
        }
        if let Ok(v) = std::env::var("DG_CACHE_DIR") {
            config.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DG_CACHE_MEMORY_SIZE_MB") {
            if let Ok(parsed) = v.parse() {
                config.cache_memory_size_mb = parsed;
            }
        }
        if let Ok(v) = std::env::var("DG_METRICS") {
            config.metrics = match v.as_str() {
                "noop" => MetricsBackend::Noop,
                "cloudwatch" => MetricsBackend::Cloudwatch,
                _ => MetricsBackend::Logging,
            };
        }
        if let Ok(v) = std::env::var("DG_METRICS_NAMESPACE") {
            config.metrics_namespace = v;
        }

        config
    }

    /// Config file named by `DG_CONFIG` (or conventional locations) if
    /// present, else environment variables.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("DG_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["deltaglider.toml", "/etc/deltaglider/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.max_ratio, 0.5);
        assert_eq!(config.cache_backend, CacheBackend::Filesystem);
        assert_eq!(config.metrics, MetricsBackend::Logging);
        assert_eq!(config.metrics_namespace, "DeltaGlider");
    }

    #[test]
    fn parses_memory_backend_from_toml() {
        let toml = r#"
            cache_backend = "memory"
            cache_memory_size_mb = 256
            max_ratio = 0.3
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.cache_memory_size_mb, 256);
        assert_eq!(config.max_ratio, 0.3);
    }
}
