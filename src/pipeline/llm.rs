//! VLM-backed [`FieldExtractor`]: one chat call per page image.
//!
//! Prompt text lives in [`crate::prompts`]; reply parsing lives in
//! [`crate::pipeline::parse`]. This module only builds the request, calls the
//! provider, and maps failures into [`ExtractionError`].
//!
//! ## Retries
//!
//! The pipeline does not retry pages. `VlmExtractor` can retry transport
//! failures itself when `max_retries > 0`, with exponential backoff
//! (`retry_backoff_ms * 2^(attempt - 1)`). An answer that arrives but cannot be
//! parsed is never retried: the model saw the page and gave its reading.

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, PipelineError};
use crate::page::{Fields, PageImage};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::parse::parse_fields;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Per-request knobs taken from [`PipelineConfig`].
#[derive(Debug, Clone)]
struct RequestSettings {
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl RequestSettings {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Extracts [`Fields`] by sending the page to a vision language model.
pub struct VlmExtractor {
    provider: Arc<dyn LLMProvider>,
    settings: RequestSettings,
}

impl VlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            settings: RequestSettings::from_config(config),
        }
    }

    /// Resolve a provider from `config` and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl FieldExtractor for VlmExtractor {
    async fn extract(&self, image: &PageImage) -> Result<Fields, ExtractionError> {
        let start = Instant::now();
        // The image carries all the content; the user turn only needs to exist.
        let messages = vec![
            ChatMessage::system(self.settings.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![to_image_data(image)]),
        ];
        let settings = &self.settings;
        let options = settings.options();

        let mut last_err = String::new();
        for attempt in 0..=settings.max_retries {
            if attempt > 0 {
                let backoff = settings.backoff(attempt);
                warn!(
                    "Retry {}/{} after {}ms",
                    attempt,
                    settings.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return parse_fields(&response.content);
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!("Attempt {} failed: {}", attempt + 1, last_err);
                }
            }
        }

        Err(ExtractionError::Service(last_err))
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most to least specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` and `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}
