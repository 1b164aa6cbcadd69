//! HTTP server binary for bill-extract.
//!
//! A thin shim over the library crate that maps CLI flags (or their
//! environment variables) to `ExtractionConfig` and serves the router.

use anyhow::{Context, Result};
use bill_extract::{router, BillExtractor, ExtractionConfig};
use clap::Parser;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with an OpenAI key from the environment
  OPENAI_API_KEY=sk-... bill-extract

  # Another provider and model
  bill-extract --provider anthropic --model claude-sonnet-4-20250514

  # Call it
  curl -s localhost:8000/extract-bill-data \
       -H 'content-type: application/json' \
       -d '{"document": "https://example.com/bill.pdf"}'

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (read once at startup)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  RUST_LOG                Log filter, e.g. bill_extract=debug
"#;

#[derive(Parser, Debug)]
#[command(
    name = "bill-extract",
    version,
    about = "Extract bill line items from PDFs and images with a Vision Language Model",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "BILL_EXTRACT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "BILL_EXTRACT_PORT", default_value_t = 8000)]
    port: u16,

    /// LLM provider (openai, anthropic, gemini, ollama, ...). Auto-detected if omitted.
    #[arg(long, env = "BILL_EXTRACT_PROVIDER")]
    provider: Option<String>,

    /// Model ID. Defaults to gpt-4o for OpenAI.
    #[arg(short, long, env = "BILL_EXTRACT_MODEL")]
    model: Option<String>,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "BILL_EXTRACT_DPI", default_value_t = 200)]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "BILL_EXTRACT_MAX_PIXELS", default_value_t = 2400)]
    max_pixels: u32,

    /// JPEG quality for page images sent to the model (1–100).
    #[arg(long, env = "BILL_EXTRACT_JPEG_QUALITY", default_value_t = 85)]
    jpeg_quality: u8,

    /// Pages sent to the model at once (results stay in page order).
    #[arg(short, long, env = "BILL_EXTRACT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Max LLM output tokens per page.
    #[arg(long, env = "BILL_EXTRACT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per page on provider failure or timeout.
    #[arg(long, env = "BILL_EXTRACT_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "BILL_EXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Document download timeout in seconds.
    #[arg(long, env = "BILL_EXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 10)]
    download_timeout: u64,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "BILL_EXTRACT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Largest accepted document in bytes.
    #[arg(long, env = "BILL_EXTRACT_MAX_DOCUMENT_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_document_bytes: u64,

    /// Accept local file paths as document references.
    #[arg(long, env = "BILL_EXTRACT_ALLOW_LOCAL_FILES")]
    allow_local_files: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BILL_EXTRACT_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ────────────────────────────────
    // Image documents still work without it, so a failure only disables PDFs.
    match tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None)) {
        Ok(path) => info!("PDFium library: {}", path.display()),
        Err(e) => warn!("PDFium unavailable, PDF documents will fail: {}", e),
    }

    // ── Build extractor ──────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let extractor =
        BillExtractor::from_config(config).context("Failed to configure the LLM provider")?;

    // ── Serve ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Server listening on {}", addr);
    info!("  POST /extract-bill-data");
    info!("  GET  /health");

    axum::serve(listener, router(Arc::new(extractor)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .jpeg_quality(cli.jpeg_quality)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .max_document_bytes(cli.max_document_bytes)
        .allow_local_files(cli.allow_local_files);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
