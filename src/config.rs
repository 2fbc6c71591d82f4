//! TOML configuration parsing and credential resolution.
//!
//! The configuration is read exactly once at startup. Secrets are never kept
//! in the file: each section names the environment variable that holds its
//! credential (`api_key_env`), and [`Config::resolve_env`] copies those values
//! (plus a handful of deployment overrides) into the in-memory config.
//!
//! ```toml
//! [generation]
//! endpoint = "https://llm.internal/generate"
//! api_key_env = "LLM_API_KEY"
//!
//! [embedding]
//! candidates = ["openai", "local"]
//!
//! [delivery]
//! domain = "mg.example.com"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub leads: LeadsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub branding: BrandingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Storage ============

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/readiness.sqlite")
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Knowledge-base snippets retrieved per survey question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Snippets retrieved for the service-capability context.
    #[serde(default = "default_service_k")]
    pub service_k: usize,
    #[serde(default = "default_service_namespace")]
    pub service_namespace: String,
    #[serde(default = "default_service_query")]
    pub service_query: String,
    /// Company text is cut to this many characters before prompting.
    #[serde(default = "default_max_company_chars")]
    pub max_company_chars: usize,
    /// Served when a query arrives before any index was built.
    #[serde(default = "default_fallback_context")]
    pub fallback_context: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            service_k: default_service_k(),
            service_namespace: default_service_namespace(),
            service_query: default_service_query(),
            max_company_chars: default_max_company_chars(),
            fallback_context: default_fallback_context(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_service_k() -> usize {
    5
}
fn default_service_namespace() -> String {
    "provider".to_string()
}
fn default_service_query() -> String {
    "AI consulting services and capabilities".to_string()
}
fn default_max_company_chars() -> usize {
    2000
}
fn default_fallback_context() -> Vec<String> {
    vec![
        "We provide AI implementation consulting and training services.".to_string(),
        "Engagements typically start with a readiness assessment and a prioritized roadmap."
            .to_string(),
        "Change management and AI literacy programs help teams adopt new tools safely."
            .to_string(),
    ]
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Providers tried in order at startup; the first that answers a probe
    /// embedding wins. An empty list selects the keyword tier directly.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    #[serde(default = "default_remote_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            model: default_remote_model(),
            dims: None,
            local_model: default_local_model(),
            ollama_url: default_ollama_url(),
            ollama_model: default_ollama_model(),
            api_key_env: default_embedding_key_env(),
            base_url: default_openai_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_candidates() -> Vec<String> {
    vec!["openai".to_string(), "local".to_string()]
}
fn default_remote_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_local_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Generation ============

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// `"completion"` (prompt in, text out) or `"chat"` (OpenAI-compatible).
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// Upper bound on insight generations in flight for one request.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            format: default_format(),
            api_key_env: default_llm_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            concurrency: default_concurrency(),
            api_key: None,
        }
    }
}

fn default_format() -> String {
    "completion".to_string()
}
fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}
fn default_concurrency() -> usize {
    4
}

// ============ Acquisition ============

#[derive(Debug, Deserialize, Clone)]
pub struct AcquireConfig {
    /// `"http"` (plain fetch) or `"chromium"` (headless browser, feature `browser`).
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_acquire_timeout")]
    pub timeout_secs: u64,
    /// Time given to script-driven pages to settle before reading the DOM.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            renderer: default_renderer(),
            timeout_secs: default_acquire_timeout(),
            settle_ms: default_settle_ms(),
            chrome_executable: None,
        }
    }
}

fn default_renderer() -> String {
    "http".to_string()
}
fn default_acquire_timeout() -> u64 {
    30
}
fn default_settle_ms() -> u64 {
    4000
}

// ============ Delivery ============

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_mailgun_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_mailgun_url")]
    pub base_url: String,
    #[serde(default = "default_sender_email")]
    pub sender_email: String,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_mailgun_key_env(),
            domain: None,
            base_url: default_mailgun_url(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            timeout_secs: default_delivery_timeout(),
            api_key: None,
        }
    }
}

fn default_mailgun_key_env() -> String {
    "MAILGUN_API_KEY".to_string()
}
fn default_mailgun_url() -> String {
    "https://api.mailgun.net/v3".to_string()
}
fn default_sender_email() -> String {
    "reports@example.com".to_string()
}
fn default_sender_name() -> String {
    "Readiness Reports".to_string()
}
fn default_delivery_timeout() -> u64 {
    30
}

// ============ Lead log ============

#[derive(Debug, Deserialize, Clone)]
pub struct LeadsConfig {
    #[serde(default)]
    pub sheet_id: Option<String>,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_sheet_range")]
    pub range: String,
    #[serde(default = "default_sheets_url")]
    pub base_url: String,
    #[serde(default = "default_leads_timeout")]
    pub timeout_secs: u64,
}

impl Default for LeadsConfig {
    fn default() -> Self {
        Self {
            sheet_id: None,
            credentials_file: default_credentials_file(),
            range: default_sheet_range(),
            base_url: default_sheets_url(),
            timeout_secs: default_leads_timeout(),
        }
    }
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("config/google_sheets_credentials.json")
}
fn default_sheet_range() -> String {
    "Sheet1!A1".to_string()
}
fn default_sheets_url() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_leads_timeout() -> u64 {
    15
}

// ============ Report ============

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Overrides the container/local default output directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Container path conventions (`/app/...`). Also set by `DOCKER_ENV`.
    #[serde(default)]
    pub container: bool,
    /// Write each artifact to the output directory in addition to returning it.
    #[serde(default = "default_true")]
    pub save: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            container: false,
            save: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl ReportConfig {
    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None if self.container => PathBuf::from("/app/generated_reports"),
            None => PathBuf::from("generated_reports"),
        }
    }

    /// Resolve a relative path the way the deployment expects: under `/app`
    /// inside a container, as-is locally.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if self.container && path.is_relative() {
            Path::new("/app").join(path)
        } else {
            path.to_path_buf()
        }
    }
}

// ============ Branding ============

#[derive(Debug, Deserialize, Clone)]
pub struct BrandingConfig {
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
    #[serde(default = "default_tagline")]
    pub tagline: String,
    #[serde(default = "default_contact_email")]
    pub email: String,
    #[serde(default = "default_phone")]
    pub phone: String,
    #[serde(default = "default_website")]
    pub website: String,
    #[serde(default = "default_consultation_link")]
    pub consultation_link: String,
    #[serde(default = "default_framework")]
    pub framework: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            provider_name: default_provider_name(),
            tagline: default_tagline(),
            email: default_contact_email(),
            phone: default_phone(),
            website: default_website(),
            consultation_link: default_consultation_link(),
            framework: default_framework(),
        }
    }
}

fn default_provider_name() -> String {
    "Readiness Partners".to_string()
}
fn default_tagline() -> String {
    "AI Implementation Intelligence Platform".to_string()
}
fn default_contact_email() -> String {
    "info@example.com".to_string()
}
fn default_phone() -> String {
    "+1 (555) 010-0000".to_string()
}
fn default_website() -> String {
    "www.example.com".to_string()
}
fn default_consultation_link() -> String {
    "https://www.example.com/consultation".to_string()
}
fn default_framework() -> String {
    "CARE Diagnostic Model".to_string()
}

// ============ Server ============

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
    "127.0.0.1:8000".to_string()
}

// ============ Loading ============

impl Config {
    /// A config with every section at its default, for tests and for
    /// commands that can run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Copy credentials and deployment overrides from the process
    /// environment. Called once, right after parsing.
    pub fn resolve_env(&mut self) {
        self.resolve_with(|key| std::env::var(key).ok());
    }

    fn resolve_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        self.generation.api_key = non_empty(&self.generation.api_key_env);
        self.embedding.api_key = non_empty(&self.embedding.api_key_env);
        self.delivery.api_key = non_empty(&self.delivery.api_key_env);

        if let Some(url) = non_empty("LLM_API_URL") {
            self.generation.endpoint = Some(url);
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.generation.model = Some(model);
        }
        if let Some(domain) = non_empty("MAILGUN_DOMAIN") {
            self.delivery.domain = Some(domain);
        }
        if let Some(url) = non_empty("MAILGUN_BASE_URL") {
            self.delivery.base_url = url;
        }
        if let Some(email) = non_empty("SENDER_EMAIL") {
            self.delivery.sender_email = email;
        }
        if let Some(name) = non_empty("SENDER_NAME") {
            self.delivery.sender_name = name;
        }
        if let Some(id) = non_empty("GOOGLE_SHEETS_ID") {
            self.leads.sheet_id = Some(id);
        }
        if let Some(path) = non_empty("GOOGLE_SHEETS_CREDENTIALS_FILE") {
            self.leads.credentials_file = PathBuf::from(path);
        }
        if lookup("DOCKER_ENV").is_some() {
            self.report.container = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_chars == 0 {
            bail!("chunking.chunk_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.chunk_chars {
            bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if self.generation.concurrency == 0 {
            bail!("generation.concurrency must be >= 1");
        }
        match self.generation.format.as_str() {
            "completion" | "chat" => {}
            other => bail!(
                "Unknown generation format: '{}'. Must be completion or chat.",
                other
            ),
        }
        match self.acquire.renderer.as_str() {
            "http" | "chromium" => {}
            other => bail!(
                "Unknown acquire renderer: '{}'. Must be http or chromium.",
                other
            ),
        }
        for candidate in &self.embedding.candidates {
            match candidate.as_str() {
                "openai" | "local" | "ollama" => {}
                other => bail!(
                    "Unknown embedding candidate: '{}'. Must be openai, local, or ollama.",
                    other
                ),
            }
        }
        Ok(())
    }
}

/// Read, parse, resolve and validate the configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.resolve_env();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_example_config_parses() {
        let config: Config =
            toml::from_str(include_str!("../config/readiness.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.fallback_context.len(), 3);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert!(config.generation.endpoint.is_none());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunking.chunk_chars, 500);
        assert_eq!(config.chunking.overlap_chars, 50);
        assert_eq!(config.generation.max_tokens, 300);
        assert_eq!(config.embedding.candidates, vec!["openai", "local"]);
        assert!(config.report.save);
        config.validate().unwrap();
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = Config::minimal();
        config.chunking.overlap_chars = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_candidate_rejected() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            candidates = ["faiss"]
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("faiss"));
    }

    #[test]
    fn test_env_resolution() {
        let env: HashMap<&str, &str> = [
            ("LLM_API_KEY", "llm-secret"),
            ("LLM_API_URL", "http://llm.local/generate"),
            ("MAILGUN_API_KEY", "key-123"),
            ("MAILGUN_DOMAIN", "mg.example.com"),
            ("OPENAI_API_KEY", "   "),
            ("DOCKER_ENV", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::minimal();
        config.resolve_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.generation.api_key.as_deref(), Some("llm-secret"));
        assert_eq!(
            config.generation.endpoint.as_deref(),
            Some("http://llm.local/generate")
        );
        assert_eq!(config.delivery.api_key.as_deref(), Some("key-123"));
        assert_eq!(config.delivery.domain.as_deref(), Some("mg.example.com"));
        assert!(config.embedding.api_key.is_none(), "blank values are unset");
        assert!(config.report.container);
    }

    #[test]
    fn test_container_paths() {
        let mut report = ReportConfig::default();
        assert_eq!(report.output_dir(), PathBuf::from("generated_reports"));
        report.container = true;
        assert_eq!(report.output_dir(), PathBuf::from("/app/generated_reports"));
        assert_eq!(
            report.resolve_path(Path::new("config/creds.json")),
            PathBuf::from("/app/config/creds.json")
        );
        assert_eq!(
            report.resolve_path(Path::new("/etc/creds.json")),
            PathBuf::from("/etc/creds.json")
        );
    }
}
