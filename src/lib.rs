//! # bill-extract
//!
//! Extract line items from bills and invoices (PDF or image) with a Vision
//! Language Model, served over a single HTTP endpoint.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document URL
//!  │
//!  ├─ 1. Fetch      download the bytes (10 s timeout by default)
//!  ├─ 2. Render     PDF → one image per page via pdfium; images decode as one page
//!  ├─ 3. Encode     JPEG → base64 ImageData
//!  ├─ 4. VLM        one JSON-mode call per page, failures become empty pages
//!  ├─ 5. Normalise  drop summary rows, default and coerce fields
//!  └─ 6. Aggregate  pages in order + summed token usage
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bill_extract::{BillExtractor, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let extractor = BillExtractor::from_config(ExtractionConfig::default())?;
//!     let response = extractor.extract("https://example.com/bill.pdf").await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bill-extract` server binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::Aggregator;
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{BillExtractError, PageError};
pub use extract::BillExtractor;
pub use output::{ApiResponse, BillItem, ExtractionResult, PageKind, PageResult, TokenUsage};
pub use pipeline::llm::{ModelError, ModelReply, PageRequest, ProviderModel, VisionModel};
pub use server::router;
