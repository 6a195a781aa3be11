//! TOML configuration.
//!
//! The configuration is loaded once at process start and passed by reference
//! (or `Arc`) into every component. Credentials are never read from the file;
//! they come from the environment (`WP_APP_PASSWORD`, `OPENAI_API_KEY`,
//! `PINECONE_API_KEY`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub kb: KbConfig,
    pub cms: CmsConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KbConfig {
    pub root: PathBuf,
    #[serde(default = "default_mapping_file")]
    pub mapping_file: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Path segment used for public knowledge-base URLs (`/<prefix>/<slug>/`).
    #[serde(default = "default_link_prefix")]
    pub link_prefix: String,
}

fn default_mapping_file() -> String {
    "kb_sync_mapping.json".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_link_prefix() -> String {
    "kb".to_string()
}

impl KbConfig {
    /// Absolute location of the identity map file.
    pub fn mapping_path(&self) -> PathBuf {
        self.root.join(&self.mapping_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CmsConfig {
    pub site_url: String,
    #[serde(default)]
    pub username: String,
    /// REST base of the knowledge content type (`/wp-json/wp/v2/<post_type>`).
    #[serde(default = "default_post_type")]
    pub post_type: String,
    #[serde(default = "default_topic_taxonomy")]
    pub topic_taxonomy: String,
    #[serde(default = "default_tag_taxonomy")]
    pub tag_taxonomy: String,
    #[serde(default = "default_cms_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
}

fn default_post_type() -> String {
    "knowledge".to_string()
}
fn default_topic_taxonomy() -> String {
    "knowledge_topics".to_string()
}
fn default_tag_taxonomy() -> String {
    "knowledge_tag".to_string()
}
fn default_cms_timeout() -> u64 {
    30
}
fn default_lookup_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    /// Try the CMS topic endpoint before falling back to `topic_mapping`.
    #[serde(default = "default_true")]
    pub fetch_remote: bool,
    /// Path pattern → fine-grained topic ID. Longest matching pattern wins.
    #[serde(default)]
    pub topic_mapping: BTreeMap<String, u64>,
    /// Top-level folder → coarse parent topic ID.
    #[serde(default)]
    pub parent_topics: BTreeMap<String, u64>,
    #[serde(default)]
    pub default_topic_id: u64,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            fetch_remote: true,
            topic_mapping: BTreeMap::new(),
            parent_topics: BTreeMap::new(),
            default_topic_id: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Data-plane host of the index, e.g. `https://kb-abc123.svc.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Write one vector per `##` section instead of one per document.
    #[serde(default = "default_true")]
    pub chunk_documents: bool,
    #[serde(default = "default_metadata_text_limit")]
    pub metadata_text_limit: usize,
    #[serde(default = "default_post_type_label")]
    pub post_type: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            host: None,
            namespace: None,
            chunk_documents: true,
            metadata_text_limit: 8000,
            post_type: default_post_type_label(),
            timeout_secs: 30,
        }
    }
}

fn default_metadata_text_limit() -> usize {
    8000
}
fn default_post_type_label() -> String {
    "knowledge_base".to_string()
}

impl IndexConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_high_threshold() -> f32 {
    0.70
}
fn default_low_threshold() -> f32 {
    0.55
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Parse configuration text without touching the filesystem.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    if let Ok(root) = std::env::var("KB_ROOT") {
        if config.kb.root.as_os_str().is_empty() {
            config.kb.root = PathBuf::from(root);
        }
    }
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.kb.root.as_os_str().is_empty() {
        bail!("kb.root is not configured. Set it in the config file or as KB_ROOT.");
    }
    if !config.kb.root.is_dir() {
        bail!(
            "kb.root does not exist or is not a directory: {}",
            config.kb.root.display()
        );
    }
    if config.cms.site_url.trim().is_empty() {
        bail!("cms.site_url must be set");
    }

    // Validate search
    let s = &config.search;
    if s.top_k == 0 {
        bail!("search.top_k must be >= 1");
    }
    for (name, v) in [
        ("high_threshold", s.high_threshold),
        ("low_threshold", s.low_threshold),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("search.{} must be in [0.0, 1.0]", name);
        }
    }
    if s.low_threshold > s.high_threshold {
        bail!("search.low_threshold must not exceed search.high_threshold");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }

    // Validate index
    match config.index.provider.as_str() {
        "disabled" => {}
        "pinecone" => {
            if config.index.host.as_deref().unwrap_or("").trim().is_empty() {
                bail!("index.host must be set when provider is 'pinecone'");
            }
        }
        other => bail!(
            "Unknown index provider: '{}'. Must be disabled or pinecone.",
            other
        ),
    }

    Ok(())
}

/// Read a required credential from the environment.
pub fn credential(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", var),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(root: &Path) -> String {
        format!(
            r#"[kb]
root = "{}"

[cms]
site_url = "https://example.com"
username = "agents"
"#,
            root.display()
        )
    }

    #[test]
    fn test_defaults_applied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = parse_config(&minimal(tmp.path())).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.kb.mapping_file, "kb_sync_mapping.json");
        assert_eq!(config.kb.include_globs, vec!["**/*.md".to_string()]);
        assert_eq!(config.cms.post_type, "knowledge");
        assert_eq!(config.search.top_k, 5);
        assert!((config.search.high_threshold - 0.70).abs() < 1e-6);
        assert!(config.index.chunk_documents);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.kb.mapping_path(), tmp.path().join("kb_sync_mapping.json"));
    }

    #[test]
    fn test_taxonomy_tables() {
        let tmp = tempfile::TempDir::new().unwrap();
        let text = format!(
            "{}\n[taxonomy]\ndefault_topic_id = 9\nfetch_remote = false\n\n[taxonomy.topic_mapping]\n\"AI/models\" = 12\n\n[taxonomy.parent_topics]\nAI = 3\n",
            minimal(tmp.path())
        );
        let config = parse_config(&text).unwrap();
        assert_eq!(config.taxonomy.default_topic_id, 9);
        assert!(!config.taxonomy.fetch_remote);
        assert_eq!(config.taxonomy.topic_mapping["AI/models"], 12);
        assert_eq!(config.taxonomy.parent_topics["AI"], 3);
    }

    #[test]
    fn test_missing_root_rejected() {
        let config = parse_config(&minimal(Path::new("/definitely/not/here"))).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let text = format!(
            "{}\n[search]\nhigh_threshold = 0.5\nlow_threshold = 0.6\n",
            minimal(tmp.path())
        );
        let config = parse_config(&text).unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("low_threshold"), "{}", err);
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let tmp = tempfile::TempDir::new().unwrap();
        let text = format!("{}\n[embedding]\nprovider = \"openai\"\n", minimal(tmp.path()));
        let config = parse_config(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_pinecone_requires_host() {
        let tmp = tempfile::TempDir::new().unwrap();
        let text = format!("{}\n[index]\nprovider = \"pinecone\"\n", minimal(tmp.path()));
        let config = parse_config(&text).unwrap();
        assert!(validate(&config).is_err());
    }
}
