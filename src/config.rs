//! Configuration for the retrieval core and CLI
//!
//! Loads configuration from reflect_rag.yml, `.env` and environment variables

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::analysis::embeddings::EmbeddingBackend;
use crate::error::{Error, Result};
use crate::retrieval::RetrievalStrategy;

/// Default constants (fallback if reflect_rag.yml not found)
pub const CONFIG_FILE: &str = "reflect_rag.yml";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_LOCAL_DIMENSION: usize = 256;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    storage: Option<StorageConfig>,
    embedding: Option<EmbeddingConfig>,
    retrieval: Option<RetrievalConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageConfig {
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingConfig {
    provider: Option<String>,
    model: Option<String>,
    url: Option<String>,
    dimension: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    top_k: Option<String>,
    strategy: Option<String>,
    synonyms_path: Option<String>,
    last_week_only: Option<bool>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// Model name; `None` means the provider's default
    pub model: Option<String>,
    /// Base URL of an Ollama-compatible server
    pub url: String,
    /// Vector size of the local hashing embedder
    pub dimension: usize,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingSettings,
    pub top_k: usize,
    pub strategy: RetrievalStrategy,
    /// Optional YAML synonym table replacing the built-in one
    pub synonyms_path: Option<PathBuf>,
    /// Restrict the corpus to the previous calendar week
    pub last_week_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from reflect_rag.yml or use defaults
    /// Environment variables take precedence over reflect_rag.yml string values
    pub fn new() -> Self {
        for path in [PathBuf::from(CONFIG_FILE), Path::new("..").join(CONFIG_FILE)] {
            if !path.is_file() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(err) => warn!(path = %path.display(), "Ignoring invalid config file: {}", err),
            }
        }

        Self::load_dotenv();
        Self::from_yaml(YamlConfig::default()).unwrap_or_else(|err| {
            warn!("Falling back to default configuration: {}", err);
            Self::defaults()
        })
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.trim().is_empty() {
                return Some(env_val);
            }
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    /// Resolve an integer value from string config or env var
    fn resolve_env_usize(value: Option<String>, env_key: &str) -> Option<usize> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    if let Ok(parsed) = env_val.trim().parse::<usize>() {
                        return Some(parsed);
                    }
                }
            }
            // Explicit numbers in YAML win over the environment
            if let Ok(parsed) = v.trim().parse::<usize>() {
                return Some(parsed);
            }
        }
        std::env::var(env_key)
            .ok()
            .and_then(|env_val| env_val.trim().parse::<usize>().ok())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        Self::from_yaml(yaml)
    }

    fn from_yaml(yaml: YamlConfig) -> Result<Self> {
        let storage = yaml.storage.unwrap_or_default();
        let embedding = yaml.embedding.unwrap_or_default();
        let retrieval = yaml.retrieval.unwrap_or_default();

        let data_dir = Self::resolve_env_string(storage.data_dir, "RAG_DATA_DIR")
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let backend = match Self::resolve_env_string(embedding.provider, "EMBEDDING_PROVIDER") {
            Some(raw) => raw.parse::<EmbeddingBackend>().map_err(|e| {
                Error::Config(format!("embedding.provider / EMBEDDING_PROVIDER: {}", e))
            })?,
            None => EmbeddingBackend::Auto,
        };

        let strategy = match retrieval.strategy {
            Some(raw) => raw
                .parse::<RetrievalStrategy>()
                .map_err(|e| Error::Config(e.to_string()))?,
            None => RetrievalStrategy::Hybrid,
        };

        let top_k = Self::resolve_env_usize(retrieval.top_k, "RAG_TOP_K").unwrap_or(DEFAULT_TOP_K);

        let config = Self {
            data_dir: PathBuf::from(data_dir),
            embedding: EmbeddingSettings {
                backend,
                model: Self::resolve_env_string(embedding.model, "EMBEDDING_MODEL"),
                url: Self::resolve_env_string(embedding.url, "OLLAMA_URL")
                    .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                dimension: embedding.dimension.unwrap_or(DEFAULT_LOCAL_DIMENSION),
            },
            top_k,
            strategy,
            synonyms_path: retrieval.synonyms_path.map(PathBuf::from),
            last_week_only: retrieval.last_week_only.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create config with built-in defaults (fallback)
    pub fn defaults() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            embedding: EmbeddingSettings {
                backend: EmbeddingBackend::Auto,
                model: None,
                url: DEFAULT_OLLAMA_URL.to_string(),
                dimension: DEFAULT_LOCAL_DIMENSION,
            },
            top_k: DEFAULT_TOP_K,
            strategy: RetrievalStrategy::Hybrid,
            synonyms_path: None,
            last_week_only: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".into()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const MANAGED_VARS: &[&str] = &[
        "RAG_DATA_DIR",
        "EMBEDDING_PROVIDER",
        "EMBEDDING_MODEL",
        "OLLAMA_URL",
        "RAG_TOP_K",
    ];

    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn unset(key: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => std::env::set_var(&self.key, value),
                None => std::env::remove_var(&self.key),
            }
        }
    }

    fn clear_envs() -> Vec<EnvGuard> {
        MANAGED_VARS.iter().map(|k| EnvGuard::unset(k)).collect()
    }

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();
        file
    }

    #[test]
    fn defaults_have_expected_values() {
        let config = Config::defaults();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.strategy, RetrievalStrategy::Hybrid);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Auto);
        assert_eq!(config.embedding.url, DEFAULT_OLLAMA_URL);
        assert!(config.synonyms_path.is_none());
        assert!(!config.last_week_only);
    }

    #[test]
    fn loads_all_sections_from_yaml() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guards = clear_envs();

        let file = write_config(
            r#"
storage:
  data_dir: /var/lib/journal
embedding:
  provider: ollama
  model: nomic-embed-text
  url: http://ollama:11434
  dimension: 64
retrieval:
  top_k: 8
  strategy: graph
  synonyms_path: synonyms.yml
  last_week_only: true
"#,
        );

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/journal"));
        assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
        assert_eq!(config.embedding.model.as_deref(), Some("nomic-embed-text"));
        assert_eq!(config.embedding.url, "http://ollama:11434");
        assert_eq!(config.embedding.dimension, 64);
        assert_eq!(config.top_k, 8);
        assert_eq!(config.strategy, RetrievalStrategy::GraphOnly);
        assert_eq!(config.synonyms_path, Some(PathBuf::from("synonyms.yml")));
        assert!(config.last_week_only);
    }

    #[test]
    fn env_overrides_string_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();
        let _guards = vec![
            EnvGuard::set("RAG_DATA_DIR", "/tmp/override"),
            EnvGuard::set("EMBEDDING_PROVIDER", "local"),
        ];

        let file = write_config(
            r#"
storage:
  data_dir: ./data
embedding:
  provider: openai
"#,
        );

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
        assert_eq!(config.embedding.backend, EmbeddingBackend::Local);
    }

    #[test]
    fn resolves_placeholders_from_environment() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();
        let _guards = vec![
            EnvGuard::set("JOURNAL_ROOT", "/srv/journal"),
            EnvGuard::set("JOURNAL_TOP_K", "12"),
        ];

        let file = write_config(
            r#"
storage:
  data_dir: ${JOURNAL_ROOT}
retrieval:
  top_k: ${JOURNAL_TOP_K}
"#,
        );

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/journal"));
        assert_eq!(config.top_k, 12);
    }

    #[test]
    fn numeric_yaml_values_take_priority_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();
        let _guards = vec![EnvGuard::set("RAG_TOP_K", "99")];

        let explicit = write_config("retrieval:\n  top_k: 3\n");
        assert_eq!(Config::load_from_file(explicit.path()).unwrap().top_k, 3);

        let implicit = write_config("retrieval:\n  strategy: hybrid\n");
        assert_eq!(Config::load_from_file(implicit.path()).unwrap().top_k, 99);
    }

    #[test]
    fn unresolved_placeholder_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();

        let file = write_config("storage:\n  data_dir: ${REFLECT_RAG_UNSET_VAR}\n");
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn rejects_unknown_provider() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();

        let file = write_config("embedding:\n  provider: telepathy\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_unknown_provider_from_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();
        let _guards = vec![EnvGuard::set("EMBEDDING_PROVIDER", "telepathy")];

        let file = write_config("retrieval:\n  top_k: 4\n");
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("EMBEDDING_PROVIDER"));

        // Without a config file the bad value drops back to the built-in defaults.
        let config = Config::new();
        assert_eq!(config.embedding.backend, EmbeddingBackend::Auto);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn rejects_zero_top_k() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_envs();

        let file = write_config("retrieval:\n  top_k: 0\n");
        assert!(Config::load_from_file(file.path()).is_err());
    }

    #[test]
    fn load_from_file_fails_on_missing_file() {
        let result = Config::load_from_file("/nonexistent/path/reflect_rag.yml");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_from_file_fails_on_invalid_yaml() {
        let file = write_config("{ invalid yaml [");
        assert!(Config::load_from_file(file.path()).is_err());
    }
}
