//! Collects per-page results into the response document.

use crate::output::{ApiResponse, ExtractionResult, PageResult, TokenUsage};

/// Accumulates pages (in page order) and their token usage.
#[derive(Debug, Default)]
pub struct Aggregator {
    pages: Vec<PageResult>,
    usage: TokenUsage,
}

impl Aggregator {
    pub fn with_capacity(pages: usize) -> Self {
        Self {
            pages: Vec::with_capacity(pages),
            usage: TokenUsage::default(),
        }
    }

    /// Add the next page. A page without usage (failed call) adds zero tokens.
    pub fn push(&mut self, page: PageResult, usage: Option<TokenUsage>) {
        debug_assert_eq!(
            page.page_number,
            self.pages.len() + 1,
            "pages must be pushed in document order"
        );
        if let Some(usage) = usage {
            self.usage += usage;
        }
        self.pages.push(page);
    }

    pub fn finish(self) -> ApiResponse {
        ApiResponse {
            success: true,
            usage: self.usage,
            result: ExtractionResult { pages: self.pages },
        }
    }
}
