//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars (nested keys split on `__`, e.g.
//! `APP_EMBEDDING__BASE_URL`). Settings are read once at startup and passed
//! to each component by value; nothing reads configuration afterwards.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{DEFAULT_TOP_K, MAX_TOP_K, MIN_TOP_K};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub retrieval: RetrievalSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.generation.validate()?;
        self.retrieval.validate()?;
        self.store.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingApi {
    Ollama,
    OpenAi,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub api: EmbeddingApi,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            api: EmbeddingApi::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 5,
            api_key: None,
        }
    }
}

impl EmbeddingSettings {
    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig("embedding.dimension must be > 0".into()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("embedding.timeout_secs must be > 0".into()));
        }
        if self.api != EmbeddingApi::Fake && self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("embedding.model is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationApi {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Deployment switch for the generative backend. When false the composer
    /// always answers extractively and never calls out.
    pub enabled: bool,
    pub api: GenerationApi,
    pub base_url: String,
    /// Fixed model; when unset the Ollama backend picks from `preferred_models`.
    pub model: Option<String>,
    pub preferred_models: Vec<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: f32,
    /// Generated answers shorter than this are treated as failures.
    pub min_answer_chars: usize,
    pub api_key: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api: GenerationApi::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: None,
            preferred_models: ["phi3", "mistral", "llama3", "phi", "gemma:2b", "gemma", "llama2", "neural-chat"]
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            timeout_secs: 25,
            temperature: 0.5,
            max_tokens: 500,
            top_p: 0.85,
            min_answer_chars: 100,
            api_key: None,
        }
    }
}

impl GenerationSettings {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("generation.timeout_secs must be > 0".into()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("generation.max_tokens must be > 0".into()));
        }
        if self.api == GenerationApi::OpenAi && self.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
            return Err(Error::InvalidConfig("generation.model is required for the openai api".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    /// Maximum characters per bullet in extractive answers.
    pub snippet_chars: usize,
    pub store_timeout_secs: u64,
    /// Append related terms to the query text before embedding.
    pub expand_query: bool,
    /// Topic → related terms. Empty uses the built-in table.
    pub expansions: BTreeMap<String, Vec<String>>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            max_top_k: MAX_TOP_K,
            snippet_chars: 300,
            store_timeout_secs: 10,
            expand_query: false,
            expansions: BTreeMap::new(),
        }
    }
}

impl RetrievalSettings {
    fn validate(&self) -> Result<()> {
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&self.max_top_k) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.max_top_k must be within [{MIN_TOP_K}, {MAX_TOP_K}], got {}",
                self.max_top_k
            )));
        }
        if !(MIN_TOP_K..=self.max_top_k).contains(&self.default_top_k) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.default_top_k must be within [{MIN_TOP_K}, {}], got {}",
                self.max_top_k, self.default_top_k
            )));
        }
        if self.snippet_chars == 0 {
            return Err(Error::InvalidConfig("retrieval.snippet_chars must be > 0".into()));
        }
        if self.store_timeout_secs == 0 {
            return Err(Error::InvalidConfig("retrieval.store_timeout_secs must be > 0".into()));
        }
        if let Some(topic) = self.expansions.keys().find(|t| t.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!("retrieval.expansions has a blank topic {topic:?}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    LanceDb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// LanceDB directory, or the JSON snapshot file for the memory backend
    /// (empty keeps the memory store purely in-process).
    pub path: String,
    pub table: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { backend: StoreBackend::LanceDb, path: "./data/lancedb".to_string(), table: "scripture_chunks".to_string() }
    }
}

impl StoreSettings {
    fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::LanceDb && (self.path.trim().is_empty() || self.table.trim().is_empty()) {
            return Err(Error::InvalidConfig("store.path and store.table are required for lancedb".into()));
        }
        Ok(())
    }

    pub fn resolved_path(&self, base: &Path) -> Option<PathBuf> {
        if self.path.trim().is_empty() {
            None
        } else {
            Some(resolve_with_base(base, &self.path))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let s = Settings::default();
        s.validate().expect("defaults are valid");
        assert_eq!(s.retrieval.default_top_k, 10);
        assert_eq!(s.retrieval.max_top_k, 50);
        assert!(s.generation.enabled);
    }

    #[test]
    fn rejects_out_of_range_top_k() {
        let mut s = Settings::default();
        s.retrieval.max_top_k = 80;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));

        let mut s = Settings::default();
        s.retrieval.default_top_k = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn openai_generation_requires_model() {
        let mut s = Settings::default();
        s.generation.api = GenerationApi::OpenAi;
        assert!(s.validate().is_err());
        s.generation.model = Some("gpt-4o-mini".into());
        assert!(s.validate().is_ok());
        s.generation.enabled = false;
        s.generation.model = None;
        assert!(s.validate().is_ok(), "disabled backend is not validated");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let base = Path::new("/srv/insight");
        assert_eq!(resolve_with_base(base, "data/db"), PathBuf::from("/srv/insight/data/db"));
        assert_eq!(resolve_with_base(base, "/var/db"), PathBuf::from("/var/db"));
    }

    #[test]
    fn files_and_env_layer_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [embedding]
                model = "mxbai-embed-large"
                dimension = 1024

                [store]
                backend = "memory"
                path = ""
                "#,
            )?;
            jail.create_file(
                "config.test.toml",
                r#"
                [retrieval]
                snippet_chars = 120
                expand_query = true

                [retrieval.expansions]
                anger = ["krodh", "patience"]
                "#,
            )?;
            jail.set_env("APP_RETRIEVAL__DEFAULT_TOP_K", "5");
            jail.set_env("APP_GENERATION__ENABLED", "false");

            let settings = Config::load_for_env("test")
                .and_then(|c| c.settings())
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.embedding.model, "mxbai-embed-large");
            assert_eq!(settings.embedding.dimension, 1024);
            assert_eq!(settings.embedding.api, EmbeddingApi::Ollama);
            assert_eq!(settings.store.backend, StoreBackend::Memory);
            assert_eq!(settings.retrieval.snippet_chars, 120);
            assert_eq!(settings.retrieval.default_top_k, 5);
            assert!(settings.retrieval.expand_query);
            assert_eq!(settings.retrieval.expansions["anger"], ["krodh", "patience"]);
            assert!(!settings.generation.enabled);
            Ok(())
        });
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[retrieval]\ndefault_top_k = 60\n")?;
            let result = Config::load_for_env("dev").and_then(|c| c.settings());
            assert!(matches!(result, Err(Error::InvalidConfig(_))));
            Ok(())
        });
    }
}
