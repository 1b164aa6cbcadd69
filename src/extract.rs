//! Full-document extraction: fetch → rasterise → per page (encode → model →
//! normalise) → aggregate.
//!
//! [`BillExtractor`] is built once at startup and shared by all requests. It
//! holds only immutable configuration and the model handle; every call to
//! [`BillExtractor::extract`] builds its own pipeline state.

use crate::aggregate::Aggregator;
use crate::config::ExtractionConfig;
use crate::error::BillExtractError;
use crate::output::{ApiResponse, PageResult};
use crate::pipeline::llm::{extract_page, ProviderModel, VisionModel};
use crate::pipeline::{fetch, normalize, render};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The extraction service: configuration plus a vision model.
#[derive(Clone)]
pub struct BillExtractor {
    config: Arc<ExtractionConfig>,
    model: Arc<dyn VisionModel>,
}

impl BillExtractor {
    pub fn new(config: ExtractionConfig, model: Arc<dyn VisionModel>) -> Self {
        Self {
            config: Arc::new(config),
            model,
        }
    }

    /// Build an extractor whose model is resolved from `config` and the
    /// process environment (API keys are read here, once).
    pub fn from_config(config: ExtractionConfig) -> Result<Self, BillExtractError> {
        let model = ProviderModel::from_config(&config)?;
        info!("Using vision model {}", model.label());
        Ok(Self::new(config, Arc::new(model)))
    }

    /// Extract line items from the referenced document.
    ///
    /// # Errors
    /// Only fetch and decode failures (and service faults such as a missing
    /// pdfium library) are returned. Per-page extraction failures are
    /// absorbed: the page comes back empty with type `Unknown`.
    pub async fn extract(&self, document: &str) -> Result<ApiResponse, BillExtractError> {
        let total_start = Instant::now();
        info!("Starting extraction: {}", document);

        // ── Step 1: Fetch ────────────────────────────────────────────────
        let bytes = fetch::fetch_document(document, &self.config).await?;

        // ── Step 2: Rasterise ────────────────────────────────────────────
        let is_pdf = fetch::is_pdf(document);
        let render_start = Instant::now();
        let pages = render::rasterize(bytes, is_pdf, &self.config).await?;
        info!(
            "Rasterised {} page(s) in {}ms",
            pages.len(),
            render_start.elapsed().as_millis()
        );

        // ── Step 3: Per-page extraction + aggregation ────────────────────
        let response = self.extract_pages(pages).await;

        info!(
            "Extraction complete: {} pages, {} items, {} tokens, {}ms total",
            response.result.pages.len(),
            response.result.total_item_count(),
            response.usage.total,
            total_start.elapsed().as_millis()
        );
        Ok(response)
    }

    /// Run the per-page stages over already rasterised pages.
    ///
    /// Up to `concurrency` model calls are in flight at once; `buffered`
    /// yields results in page order, so aggregation is always sequential.
    pub async fn extract_pages(&self, pages: Vec<DynamicImage>) -> ApiResponse {
        let page_count = pages.len();
        let mut results = stream::iter(pages.into_iter().enumerate().map(|(idx, image)| {
            let model = Arc::clone(&self.model);
            let config = Arc::clone(&self.config);
            let page_num = idx + 1;
            async move {
                let extraction = extract_page(model.as_ref(), page_num, image, &config).await;
                let page = PageResult {
                    page_number: page_num,
                    page_kind: extraction.raw.page_kind(),
                    items: normalize::normalize_items(page_num, &extraction.raw.items),
                };
                debug!(
                    "Page {}: {} item(s), type {}",
                    page_num,
                    page.items.len(),
                    page.page_kind
                );
                (page, extraction.usage)
            }
        }))
        .buffered(self.config.concurrency);

        let mut aggregator = Aggregator::with_capacity(page_count);
        while let Some((page, usage)) = results.next().await {
            aggregator.push(page, usage);
        }
        aggregator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PageKind, TokenUsage};
    use crate::pipeline::llm::{ModelError, ModelReply, PageRequest};
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use tokio::time::{sleep, Duration};

    /// Replies by page number; slower for earlier pages so that concurrent
    /// runs complete out of order.
    struct PageKeyed;

    #[async_trait]
    impl VisionModel for PageKeyed {
        fn label(&self) -> String {
            "page-keyed".into()
        }

        async fn complete(&self, request: &PageRequest) -> Result<ModelReply, ModelError> {
            let n = request.page_num;
            sleep(Duration::from_millis(40 / n as u64)).await;
            if n == 2 {
                return Err(ModelError("provider exploded".into()));
            }
            Ok(ModelReply {
                content: format!(
                    r#"{{"items":[{{"item_name":"Item {n}","item_amount":{n}}},{{"item_name":"Total","item_amount":99}}],"page_type":"Final Bill"}}"#
                ),
                usage: TokenUsage {
                    total: 10 * n as u64,
                    input: 7 * n as u64,
                    output: 3 * n as u64,
                },
            })
        }
    }

    fn pages(n: usize) -> Vec<DynamicImage> {
        (0..n)
            .map(|_| DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))))
            .collect()
    }

    async fn run(concurrency: usize) -> ApiResponse {
        let config = ExtractionConfig::builder()
            .concurrency(concurrency)
            .build()
            .unwrap();
        BillExtractor::new(config, Arc::new(PageKeyed))
            .extract_pages(pages(4))
            .await
    }

    #[tokio::test]
    async fn failed_page_is_isolated() {
        let response = run(1).await;
        let result = &response.result;
        assert_eq!(result.pages.len(), 4);

        assert_eq!(result.pages[1].page_kind, PageKind::Unknown);
        assert!(result.pages[1].items.is_empty());
        for idx in [0, 2, 3] {
            assert_eq!(result.pages[idx].page_kind, PageKind::FinalBill);
            assert_eq!(result.pages[idx].items.len(), 1, "Total row must be filtered");
        }

        // Pages 1, 3 and 4 contribute; page 2 adds nothing.
        assert_eq!(
            response.usage,
            TokenUsage {
                total: 80,
                input: 56,
                output: 24
            }
        );
        assert_eq!(result.total_item_count(), 3);
    }

    #[tokio::test]
    async fn concurrent_dispatch_keeps_page_order_and_totals() {
        let sequential = run(1).await;
        let concurrent = run(4).await;
        assert_eq!(sequential, concurrent);
        let numbers: Vec<usize> = concurrent.result.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }
}
