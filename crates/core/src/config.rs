use crate::chunking::ChunkingConfig;
use crate::error::{IndexError, Result};
use crate::retrieval::RetrievalConfig;
use crate::retry::CallPolicy;
use crate::summarize::ModelCallSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Explicit model identifiers and limits. Every model call receives its id from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub summary_model: String,
    pub synthesis_model: String,
    pub suggestion_model: String,
    pub embedding_model: String,
    pub summary_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub suggestion_max_tokens: u32,
    /// Summarizer input limit in chars; longer files keep their head.
    pub file_input_chars: usize,
    /// Total chars of file summaries handed to the synthesizer.
    pub synthesis_input_chars: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            summary_model: "gemini-1.5-flash".to_string(),
            synthesis_model: "gemini-1.5-pro".to_string(),
            suggestion_model: "gemini-1.5-flash".to_string(),
            embedding_model: "embedding-001".to_string(),
            summary_max_tokens: 512,
            synthesis_max_tokens: 4_096,
            suggestion_max_tokens: 256,
            file_input_chars: 30_000,
            synthesis_input_chars: 120_000,
        }
    }
}

impl ModelsConfig {
    pub fn summary_settings(&self, policy: CallPolicy) -> ModelCallSettings {
        ModelCallSettings {
            model_id: self.summary_model.clone(),
            max_tokens: self.summary_max_tokens,
            input_chars: self.file_input_chars,
            policy,
        }
    }

    pub fn synthesis_settings(&self, policy: CallPolicy) -> ModelCallSettings {
        ModelCallSettings {
            model_id: self.synthesis_model.clone(),
            max_tokens: self.synthesis_max_tokens,
            input_chars: self.synthesis_input_chars,
            policy,
        }
    }

    pub fn suggestion_settings(&self, policy: CallPolicy) -> ModelCallSettings {
        ModelCallSettings {
            model_id: self.suggestion_model.clone(),
            max_tokens: self.suggestion_max_tokens,
            input_chars: self.synthesis_input_chars,
            policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Per-file chains allowed in flight at once.
    pub max_concurrency: usize,
    /// Files beyond this count are skipped and reported as overflow.
    pub max_files: usize,
    pub suggestion_count: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_files: 2_000,
            suggestion_count: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub models: ModelsConfig,
    pub calls: CallPolicy,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Defaults when `path` is `None`.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.calls.max_attempts == 0 {
            return Err(IndexError::InvalidConfig(
                "calls.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.calls.timeout.is_zero() {
            return Err(IndexError::InvalidConfig(
                "calls.timeout must be positive".to_string(),
            ));
        }
        if self.indexing.max_concurrency == 0 {
            return Err(IndexError::InvalidConfig(
                "indexing.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.indexing.max_files == 0 {
            return Err(IndexError::InvalidConfig(
                "indexing.max_files must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(IndexError::InvalidConfig(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.models.file_input_chars == 0 || self.models.synthesis_input_chars == 0 {
            return Err(IndexError::InvalidConfig(
                "model input limits must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("summary_model", &self.models.summary_model),
            ("synthesis_model", &self.models.synthesis_model),
            ("suggestion_model", &self.models.suggestion_model),
            ("embedding_model", &self.models.embedding_model),
        ] {
            if value.trim().is_empty() {
                return Err(IndexError::InvalidConfig(format!("models.{name} is empty")));
            }
        }
        Ok(())
    }
}
