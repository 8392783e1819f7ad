use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::models::SamplingParams;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateCompletionRequest, CreateCompletionRequestArgs, Stop},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// The opaque generation capability: prompt in, one completion out
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier reported to endpoint clients
    fn model_id(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String>;
}

/// Builds the backend; the gateway invokes it at most once per process
#[async_trait]
pub trait BackendLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Backend>, GatewayError>;
}

/// Backend driving an OpenAI-compatible text-completion server (vLLM, llama.cpp, ...)
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.api_base);

        if let Some(var) = &config.env_var_api_key {
            let api_key = std::env::var(var)
                .with_context(|| format!("Environment variable {} not found", var))?;
            openai_config = openai_config.with_api_key(api_key);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        })
    }

    fn build_request(&self, prompt: &str, params: &SamplingParams) -> Result<CreateCompletionRequest> {
        let mut args = CreateCompletionRequestArgs::default();
        args.model(&self.model)
            .prompt(prompt.to_string())
            .temperature(params.temperature)
            .top_p(params.top_p)
            .max_tokens(u16::try_from(params.max_tokens).unwrap_or(u16::MAX));

        if !params.stop.is_empty() {
            args.stop(Stop::StringArray(params.stop.clone()));
        }

        args.build().context("Failed to build completion request")
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String> {
        let request = self.build_request(prompt, params)?;
        let response = self
            .client
            .completions()
            .create(request)
            .await
            .context("Completion request failed")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .context("Completion response contained no choices")
    }
}

/// Loads an [`OpenAiBackend`] from configuration
pub struct OpenAiLoader {
    config: BackendConfig,
}

impl OpenAiLoader {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendLoader for OpenAiLoader {
    async fn load(&self) -> Result<Arc<dyn Backend>, GatewayError> {
        info!(
            "Connecting to completion backend {} (model {})",
            self.config.api_base, self.config.model
        );
        let backend = OpenAiBackend::new(&self.config).map_err(|e| {
            GatewayError::Initialization {
                message: format!("{:#}", e),
            }
        })?;
        Ok(Arc::new(backend))
    }
}
