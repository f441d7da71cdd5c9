use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunk;

/// Top-level application configuration loaded from TOML.
///
/// The pipeline groups are flattened so the file reads as
/// `[extraction]`, `[cleaning]`, `[chunking]`, `[enrichment]`, `[indexing]`
/// next to the app-level `[db]`, `[storage]`, and `[server]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Directory holding the raw bulletin files. Discovery scans it; extraction
/// reads from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7419".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// All stage options in one flat value.
///
/// Passed by value into every stage invocation — never read from global
/// state — so concurrent or repeated runs with different settings cannot
/// leak into each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// `"high_fidelity"` (slower, layout-aware) or `"fast"`.
    #[serde(default = "default_extractor")]
    pub extractor: String,
}

fn default_extractor() -> String {
    "high_fidelity".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub fix_encoding: bool,
    #[serde(default = "default_true")]
    pub normalize_unicode: bool,
    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
    #[serde(default = "default_true")]
    pub remove_artifacts: bool,
    #[serde(default = "default_true")]
    pub normalize_legal_text: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fix_encoding: true,
            normalize_unicode: true,
            normalize_whitespace: true,
            remove_artifacts: true,
            normalize_legal_text: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub detect_section_type: bool,
    #[serde(default = "default_true")]
    pub detect_amounts: bool,
    #[serde(default = "default_true")]
    pub detect_tables: bool,
    #[serde(default)]
    pub extract_entities: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detect_section_type: true,
            detect_amounts: true,
            detect_tables: true,
            extract_entities: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_true")]
    pub use_relational: bool,
    #[serde(default = "default_true")]
    pub use_fulltext: bool,
    #[serde(default)]
    pub use_vector: bool,
    /// Embedding model for the vector back-end. `"openai:<model>"` routes to
    /// the OpenAI API; any other name is a local fastembed model.
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            use_relational: true,
            use_fulltext: true,
            use_vector: false,
            embedding_model: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Validate a pipeline configuration independent of any file.
///
/// Rejects inconsistent chunking bounds (before a batch ever starts),
/// unknown extractor names, and a vector back-end with no model.
pub fn validate_pipeline(pipeline: &PipelineConfig) -> Result<()> {
    chunk::validate(&pipeline.chunking).map_err(anyhow::Error::new)?;

    match pipeline.extraction.extractor.as_str() {
        "high_fidelity" | "fast" => {}
        other => anyhow::bail!(
            "Unknown extractor: '{}'. Must be high_fidelity or fast.",
            other
        ),
    }

    if pipeline.indexing.use_vector
        && pipeline
            .indexing
            .embedding_model
            .as_deref()
            .unwrap_or("")
            .is_empty()
    {
        anyhow::bail!("indexing.embedding_model must be set when use_vector = true");
    }

    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate_pipeline(&config.pipeline)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_pipeline(&PipelineConfig::default()).unwrap();
    }

    #[test]
    fn rejects_min_chunk_above_chunk_size() {
        let mut p = PipelineConfig::default();
        p.chunking.min_chunk_size = 5000;
        p.chunking.chunk_size = 4000;
        assert!(validate_pipeline(&p).is_err());
    }

    #[test]
    fn rejects_unknown_extractor() {
        let mut p = PipelineConfig::default();
        p.extraction.extractor = "ocr".to_string();
        assert!(validate_pipeline(&p).is_err());
    }

    #[test]
    fn rejects_vector_without_model() {
        let mut p = PipelineConfig::default();
        p.indexing.use_vector = true;
        assert!(validate_pipeline(&p).is_err());
        p.indexing.embedding_model = Some("all-minilm-l6-v2".to_string());
        validate_pipeline(&p).unwrap();
    }

    #[test]
    fn parses_full_toml() {
        let toml_str = r#"
            [db]
            path = "/tmp/gaceta.sqlite"

            [storage]
            root = "/tmp/bulletins"

            [server]
            bind = "127.0.0.1:7419"

            [extraction]
            extractor = "fast"

            [cleaning]
            enabled = true
            normalize_legal_text = false

            [chunking]
            chunk_size = 2000
            chunk_overlap = 100
            min_chunk_size = 50

            [enrichment]
            detect_tables = false

            [indexing]
            use_relational = true
            use_fulltext = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pipeline.extraction.extractor, "fast");
        assert!(!config.pipeline.cleaning.normalize_legal_text);
        assert!(config.pipeline.cleaning.fix_encoding);
        assert_eq!(config.pipeline.chunking.chunk_size, 2000);
        assert!(!config.pipeline.enrichment.detect_tables);
        assert!(!config.pipeline.indexing.use_fulltext);
        assert!(!config.pipeline.indexing.use_vector);
    }
}
