//! Configuration types for bill extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is constructed once at
//! startup and shared read-only by every request.

use crate::error::BillExtractError;
use serde::{Deserialize, Serialize};

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound on `retry_backoff_ms`, and on any single backoff sleep.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Configuration for the extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use bill_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .model("gpt-4o")
///     .download_timeout_secs(10)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2400.
    ///
    /// Caps either dimension, scaling the other proportionally, so a poster-sized
    /// page cannot exhaust memory or blow past provider upload limits.
    pub max_rendered_pixels: u32,

    /// JPEG quality (1–100) used when encoding pages for the provider. Default: 85.
    pub jpeg_quality: u8,

    /// Number of pages sent to the provider at once. Default: 1 (sequential).
    ///
    /// Results are always aggregated in page order regardless of this value.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Sampling temperature for the completion. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a provider failure or timeout. Range: 0–10. Default: 0.
    ///
    /// Malformed JSON is never retried: it falls back to an empty page.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). At most
    /// 30 000; each doubled delay is also capped there. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses [`crate::prompts::SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Download timeout for the source document in seconds. Default: 10.
    pub download_timeout_secs: u64,

    /// Per-provider-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Largest accepted document in bytes. Default: 50 MiB.
    pub max_document_bytes: u64,

    /// Accept local paths and `file://` URIs as document references. Default: false.
    pub allow_local_files: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2400,
            jpeg_quality: 85,
            concurrency: 1,
            model: None,
            provider_name: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            system_prompt: None,
            download_timeout_secs: 10,
            api_timeout_secs: 60,
            max_document_bytes: 50 * 1024 * 1024,
            allow_local_files: false,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_document_bytes(mut self, bytes: u64) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    pub fn allow_local_files(mut self, v: bool) -> Self {
        self.config.allow_local_files = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, BillExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(BillExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(BillExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(BillExtractError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(BillExtractError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                c.temperature
            )));
        }
        if c.max_retries > MAX_RETRIES_LIMIT {
            return Err(BillExtractError::InvalidConfig(format!(
                "Max retries must be 0–{}, got {}",
                MAX_RETRIES_LIMIT, c.max_retries
            )));
        }
        if c.retry_backoff_ms > MAX_BACKOFF_MS {
            return Err(BillExtractError::InvalidConfig(format!(
                "Retry backoff must be at most {}ms, got {}",
                MAX_BACKOFF_MS, c.retry_backoff_ms
            )));
        }
        if c.download_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(BillExtractError::InvalidConfig(
                "Timeouts must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}
