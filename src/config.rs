use crate::models::SamplingParams;
use crate::prompt::{PromptStyle, SampleKeying};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where completions come from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible completion server
    pub api_base: String,
    /// Environment variable holding the API key, if the server wants one
    #[serde(default)]
    pub env_var_api_key: Option<String>,
    /// Model name passed through to the server
    pub model: String,
    /// Per-call timeout; an expired call counts as an inference failure
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on backend calls in flight at once
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Stop strings / terminator tokens
    #[serde(default)]
    pub stop: Vec<String>,
}

/// Response cache settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    /// JSON file the cache is loaded from and flushed to; in-memory only when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub sample_keying: SampleKeying,
}

/// Self-consistency sampling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default = "default_samples_per_question")]
    pub samples_per_question: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Extra attempts for a sample whose backend call failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub prompt_style: PromptStyle,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_question: default_samples_per_question(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            prompt_style: PromptStyle::default(),
        }
    }
}

impl SamplingConfig {
    pub fn params(&self, stop: &[String]) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop: stop.to_vec(),
        }
    }
}

/// Bootstrap estimator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapSettings {
    #[serde(default = "default_resamples")]
    pub resamples: usize,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    /// Fixed seed for reproducible intervals
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            resamples: default_resamples(),
            confidence_level: default_confidence_level(),
            seed: None,
        }
    }
}

/// Evaluation run settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Fixed-column question CSV
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Evaluate only the first N questions
    #[serde(default)]
    pub limit: Option<usize>,
    /// Optional local path to store the run summary as JSON
    #[serde(default)]
    pub storage_path: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset_path: None,
            max_workers: default_max_workers(),
            limit: None,
            storage_path: None,
        }
    }
}

/// Inference endpoint settings
#[derive(Debug, Clone, Deserialize, Serialize)]
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

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_samples_per_question() -> usize {
    5
}

fn default_temperature() -> f32 {
    0.4
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    256
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_resamples() -> usize {
    100_000
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_max_workers() -> usize {
    4
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sampling.samples_per_question == 0 {
            anyhow::bail!("sampling.samples_per_question must be at least 1");
        }
        if self.sampling.temperature < 0.0 {
            anyhow::bail!("sampling.temperature must not be negative");
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            anyhow::bail!("sampling.top_p must be in (0, 1]");
        }
        if self.sampling.max_tokens == 0 {
            anyhow::bail!("sampling.max_tokens must be at least 1");
        }
        if self.backend.max_concurrent_requests == 0 {
            anyhow::bail!("backend.max_concurrent_requests must be at least 1");
        }
        if self.backend.timeout_secs == 0 {
            anyhow::bail!("backend.timeout_secs must be at least 1");
        }
        if self.run.max_workers == 0 {
            anyhow::bail!("run.max_workers must be at least 1");
        }
        if self.bootstrap.resamples == 0 {
            anyhow::bail!("bootstrap.resamples must be at least 1");
        }
        let level = self.bootstrap.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            anyhow::bail!("bootstrap.confidence_level must be in (0, 1), got {}", level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[backend]
api_base = "http://localhost:8000/v1"
env_var_api_key = "VLLM_API_KEY"
model = "meta-llama/Llama-3.1-8B-Instruct"
timeout_secs = 60
max_concurrent_requests = 2
stop = ["<|eot_id|>"]

[cache]
path = "/tmp/lookup.json"
sample_keying = "shared"

[sampling]
samples_per_question = 7
temperature = 0.6
top_p = 0.95
max_tokens = 128
max_retries = 3
retry_delay_ms = 250
prompt_style = "direct"

[bootstrap]
resamples = 5000
confidence_level = 0.9
seed = 42

[run]
dataset_path = "dataset/mmlu.csv"
max_workers = 8
limit = 100
storage_path = "/tmp/summary.json"

[server]
bind = "127.0.0.1:9000"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.backend.model, "meta-llama/Llama-3.1-8B-Instruct");
        assert_eq!(config.backend.env_var_api_key.as_deref(), Some("VLLM_API_KEY"));
        assert_eq!(config.backend.max_concurrent_requests, 2);
        assert_eq!(config.backend.stop, vec!["<|eot_id|>".to_string()]);
        assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/lookup.json")));
        assert_eq!(config.cache.sample_keying, SampleKeying::Shared);
        assert_eq!(config.sampling.samples_per_question, 7);
        assert_eq!(config.sampling.prompt_style, PromptStyle::Direct);
        assert_eq!(config.sampling.max_retries, 3);
        assert_eq!(config.sampling.retry_delay_ms, 250);
        assert_eq!(config.bootstrap.resamples, 5000);
        assert_eq!(config.bootstrap.seed, Some(42));
        assert_eq!(config.run.max_workers, 8);
        assert_eq!(config.run.limit, Some(100));
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_config_defaults() {
        let toml_content = r#"
[backend]
api_base = "http://localhost:8000/v1"
model = "local"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.backend.timeout_secs, 120);
        assert_eq!(config.backend.max_concurrent_requests, 4);
        assert!(config.backend.env_var_api_key.is_none());
        assert!(config.cache.path.is_none());
        assert_eq!(config.cache.sample_keying, SampleKeying::PerSample);
        assert_eq!(config.sampling.samples_per_question, 5);
        assert_eq!(config.sampling.temperature, 0.4);
        assert_eq!(config.sampling.top_p, 0.9);
        assert_eq!(config.sampling.max_tokens, 256);
        assert_eq!(config.sampling.prompt_style, PromptStyle::ChainOfThought);
        assert_eq!(config.sampling.retry_delay_ms, 500);
        assert_eq!(config.bootstrap.resamples, 100_000);
        assert_eq!(config.bootstrap.confidence_level, 0.95);
        assert_eq!(config.run.max_workers, 4);
        assert_eq!(config.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_serve_only_config_uses_run_defaults() {
        let toml_content = r#"
[backend]
api_base = "http://localhost:8000/v1"
model = "local"

[server]
bind = "127.0.0.1:8080"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.run.max_workers, 4);
        assert!(config.run.dataset_path.is_none());
        assert!(config.run.limit.is_none());
        assert!(config.run.storage_path.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_run_config_default_matches_serde_default() {
        let from_empty: RunConfig = toml::from_str("").unwrap();
        assert_eq!(RunConfig::default().max_workers, from_empty.max_workers);
    }

    #[test]
    fn test_config_rejects_bad_confidence_level() {
        let toml_content = r#"
[backend]
api_base = "http://localhost:8000/v1"
model = "local"

[bootstrap]
confidence_level = 1.5
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("confidence_level"));
    }

    #[test]
    fn test_config_rejects_zero_samples() {
        let toml_content = r#"
[backend]
api_base = "http://localhost:8000/v1"
model = "local"

[sampling]
samples_per_question = 0
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_sampling_params_from_config() {
        let sampling = SamplingConfig::default();
        let params = sampling.params(&["</s>".to_string()]);
        assert_eq!(params.temperature, 0.4);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.stop, vec!["</s>".to_string()]);
    }
}
