use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (the small MiniLM sentence encoder, 384 dimensions)
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Texts per encoder call during ingestion
const DEFAULT_BATCH_SIZE: usize = 32;
/// Width of the hashing encoder when no model is used
const DEFAULT_HASHING_DIMENSIONS: usize = 384;

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_RESULT_LIMIT: usize = 10;
const DEFAULT_COVER_TIMEOUT_SECS: u64 = 5;
/// Covers smaller than this are almost always "no image" placeholders
const DEFAULT_MIN_COVER_BYTES: u64 = 1000;

/// Configuration for the text encoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2"), or "hashing" for the model-free encoder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Number of texts encoded per model call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Vector width used by the hashing encoder
    #[serde(default = "default_hashing_dimensions")]
    pub hashing_dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            hashing_dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_hashing_dimensions() -> usize {
    DEFAULT_HASHING_DIMENSIONS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Largest accepted CSV upload
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result count when a request doesn't specify one
    #[serde(default = "default_result_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

fn default_result_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverProxyConfig {
    #[serde(default = "default_cover_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_min_cover_bytes")]
    pub min_image_bytes: u64,
}

impl Default for CoverProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_COVER_TIMEOUT_SECS,
            min_image_bytes: DEFAULT_MIN_COVER_BYTES,
        }
    }
}

fn default_cover_timeout_secs() -> u64 {
    DEFAULT_COVER_TIMEOUT_SECS
}

fn default_min_cover_bytes() -> u64 {
    DEFAULT_MIN_COVER_BYTES
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cover_proxy: CoverProxyConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if emb.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if emb.hashing_dimensions == 0 || emb.hashing_dimensions > u16::MAX as usize {
            bail!(
                "embedding.hashing_dimensions must be between 1 and {}, got {}",
                u16::MAX,
                emb.hashing_dimensions
            );
        }

        if self.search.default_limit == 0 {
            bail!("search.default_limit must be greater than 0");
        }

        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            bail!(
                "server.listen must be an address like 0.0.0.0:8080, got '{}'",
                self.server.listen
            );
        }

        if self.cover_proxy.timeout_secs == 0 {
            bail!("cover_proxy.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            log::info!("Writing default config to {}", config_path.display());
            write_atomic(&config_path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())
    }

    /// Where books.json and vectors.bin live.
    pub fn data_dir(&self) -> PathBuf {
        self.base_path.join("data")
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let temp_path = path.with_extension("yaml.tmp");
    std::fs::write(&temp_path, data)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.data_dir(), dir.path().join("data"));
    }

    #[test]
    fn test_partial_config_gets_defaults_and_is_resaved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "embedding:\n  model: hashing\n  hashing_dimensions: 64\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.embedding.model, "hashing");
        assert_eq!(config.embedding.hashing_dimensions, 64);
        assert_eq!(config.embedding.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.cover_proxy.min_image_bytes, DEFAULT_MIN_COVER_BYTES);

        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("batch_size"));
        assert!(saved.contains("default_limit"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "embedding:\n  batch_size: 0\n").unwrap();
        assert!(Config::load_with(dir.path()).is_err());

        std::fs::write(dir.path().join(CONFIG_FILE), "server:\n  listen: nowhere\n").unwrap();
        assert!(Config::load_with(dir.path()).is_err());

        std::fs::write(dir.path().join(CONFIG_FILE), "search:\n  default_limit: 0\n").unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "embedding: [not, a, map\n").unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }
}
