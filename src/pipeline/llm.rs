//! VLM interaction: send one page to the vision model and parse its reply.
//!
//! All prompt text lives in [`crate::prompts`]. The provider is reached
//! through the [`VisionModel`] trait so the pipeline can run against a
//! scripted model in tests; [`ProviderModel`] is the production
//! implementation over an `edgequake_llm` provider.
//!
//! ## Failure isolation
//!
//! [`extract_page`] never fails. Encoding errors, provider errors, timeouts
//! and unparseable replies all become a [`PageError`], which is logged and
//! replaced by [`RawPageData::fallback`] in exactly one place.

use crate::config::{ExtractionConfig, MAX_BACKOFF_MS, MAX_RETRIES_LIMIT};
use crate::error::{BillExtractError, PageError};
use crate::output::TokenUsage;
use crate::pipeline::encode::encode_page;
use crate::pipeline::normalize::RawPageData;
use crate::prompts::{page_instruction, SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Model used when only an OpenAI key is available.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Everything the model needs to extract one page.
pub struct PageRequest {
    pub page_num: usize,
    pub system_prompt: String,
    pub instruction: String,
    pub image: ImageData,
    pub options: CompletionOptions,
}

/// The model's raw text reply and the tokens it cost.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// A failed model call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// A vision-capable completion backend.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Short label for logs, e.g. `openai/gpt-4o`.
    fn label(&self) -> String;

    async fn complete(&self, request: &PageRequest) -> Result<ModelReply, ModelError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the provider named by `config` (or the environment).
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, BillExtractError> {
        resolve_provider(config).map(Self::new)
    }
}

#[async_trait]
impl VisionModel for ProviderModel {
    fn label(&self) -> String {
        format!("{}/{}", self.provider.name(), self.provider.model())
    }

    /// ## Message Layout
    ///
    /// 1. **System message** — the extraction prompt (or configured override)
    /// 2. **User message** — "Extract line items for Page N." plus the page image
    async fn complete(&self, request: &PageRequest) -> Result<ModelReply, ModelError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user_with_images(request.instruction.as_str(), vec![request.image.clone()]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&request.options))
            .await
            .map_err(|e| ModelError(e.to_string()))?;

        Ok(ModelReply {
            usage: usage_from_counts(
                response.prompt_tokens as u64,
                response.completion_tokens as u64,
                response.total_tokens as u64,
            ),
            content: response.content,
        })
    }
}

/// Token usage from provider counts. The provider's own total wins (it can
/// include cached or reasoning tokens); a zero total means it was not reported.
fn usage_from_counts(input: u64, output: u64, reported_total: u64) -> TokenUsage {
    let total = match reported_total {
        0 => input + output,
        reported => reported,
    };
    TokenUsage {
        total,
        input,
        output,
    }
}

/// Raw model output for one page plus its token usage.
///
/// `usage` is `None` when the page fell back.
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub raw: RawPageData,
    pub usage: Option<TokenUsage>,
}

impl PageExtraction {
    fn fallback() -> Self {
        Self {
            raw: RawPageData::fallback(),
            usage: None,
        }
    }
}

/// Extract one page. Always returns a value; failures degrade to the fallback.
pub async fn extract_page(
    model: &dyn VisionModel,
    page_num: usize,
    image: DynamicImage,
    config: &ExtractionConfig,
) -> PageExtraction {
    match try_extract_page(model, page_num, image, config).await {
        Ok((raw, usage)) => PageExtraction {
            raw,
            usage: Some(usage),
        },
        Err(e) => {
            warn!("{} — substituting an empty page", e);
            PageExtraction::fallback()
        }
    }
}

async fn try_extract_page(
    model: &dyn VisionModel,
    page_num: usize,
    image: DynamicImage,
    config: &ExtractionConfig,
) -> Result<(RawPageData, TokenUsage), PageError> {
    let quality = config.jpeg_quality;
    let encode_err = |detail: String| PageError::EncodeFailed {
        page: page_num,
        detail,
    };
    let image = tokio::task::spawn_blocking(move || encode_page(&image, quality))
        .await
        .map_err(|e| encode_err(format!("encode task panicked: {e}")))?
        .map_err(|e| encode_err(e.to_string()))?;

    let request = PageRequest {
        page_num,
        system_prompt: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
        instruction: page_instruction(page_num),
        image,
        options: build_options(config),
    };

    let reply = call_with_retry(model, &request, config).await?;
    let raw = RawPageData::parse(page_num, &reply.content)?;
    Ok((raw, reply.usage))
}

/// Delay before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`,
/// saturating at [`MAX_BACKOFF_MS`].
pub(crate) fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base_ms.checked_mul(factor))
        .map_or(MAX_BACKOFF_MS, |ms| ms.min(MAX_BACKOFF_MS))
}

/// Call the model, retrying provider failures and timeouts with exponential
/// backoff. At most [`MAX_RETRIES_LIMIT`] retries are made whatever the config
/// says, so the time spent on one page stays bounded.
async fn call_with_retry(
    model: &dyn VisionModel,
    request: &PageRequest,
    config: &ExtractionConfig,
) -> Result<ModelReply, PageError> {
    let page_num = request.page_num;
    let start = Instant::now();
    let max_retries = config.max_retries.min(MAX_RETRIES_LIMIT);
    let mut last_err: Option<PageError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_delay_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let err = match timeout(
            Duration::from_secs(config.api_timeout_secs),
            model.complete(request),
        )
        .await
        {
            Ok(Ok(reply)) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    reply.usage.input,
                    reply.usage.output,
                    start.elapsed()
                );
                return Ok(reply);
            }
            Ok(Err(e)) => PageError::ProviderFailed {
                page: page_num,
                retries: attempt,
                detail: e.to_string(),
            },
            Err(_) => PageError::Timeout {
                page: page_num,
                secs: config.api_timeout_secs,
            },
        };

        warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, err);
        if !err.is_retryable() {
            return Err(err);
        }
        last_err = Some(err);
    }

    Err(last_err.unwrap_or(PageError::ProviderFailed {
        page: page_num,
        retries: max_retries,
        detail: "Unknown error".to_string(),
    }))
}

/// Build `CompletionOptions` from the extraction config.
///
/// JSON-object mode and a zero default temperature keep replies parseable and
/// repeatable.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        response_format: Some("json_object".to_string()),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BillExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BillExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Named provider** (`config.provider_name`) with `config.model`
///    (default [`DEFAULT_MODEL`]); the factory reads that provider's API key.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **`OPENAI_API_KEY`** present → OpenAI with `config.model` or the default.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, BillExtractError> {
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BillExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
