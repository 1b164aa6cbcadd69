//! Error types for the bill-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BillExtractError`] — **Fatal** for one request: the document cannot be
//!   fetched or decoded, or the service itself is misconfigured. Returned as
//!   `Err(BillExtractError)` from [`crate::extract::BillExtractor::extract`]
//!   and mapped to an HTTP status by [`BillExtractError::status_code`].
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be extracted
//!   (provider outage, malformed JSON). It never leaves the pipeline; the
//!   page degrades to an empty `Unknown` page and the rest of the document
//!   is still processed.

use axum::http::StatusCode;
use thiserror::Error;

/// All request-fatal errors returned by the bill-extract library.
#[derive(Debug, Error)]
pub enum BillExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The document reference is empty or is not something we may fetch.
    #[error("Invalid document reference '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// Download failed: transport error, timeout or non-success status.
    #[error("Failed to download document: {reason}")]
    DocumentFetch { uri: String, reason: String },

    /// The document exceeds the configured size limit.
    #[error("Document '{uri}' is too large: {size} bytes (limit {limit})")]
    DocumentTooLarge { uri: String, size: u64, limit: u64 },

    // ── Decode errors ─────────────────────────────────────────────────────
    /// Bytes were fetched but are not a readable PDF or image.
    #[error("Unable to decode document: {detail}")]
    Decode { detail: String },

    // ── Service errors ────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error("Failed to bind to pdfium library: {0}")]
    PdfiumUnavailable(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillExtractError {
    /// HTTP status the endpoint answers with for this error.
    ///
    /// Input and decode failures are the caller's problem (4xx); everything
    /// else is a server fault.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::DocumentFetch { .. } | Self::DocumentTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PdfiumUnavailable(_)
            | Self::ProviderNotConfigured { .. }
            | Self::InvalidConfig(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the request rather than by the service.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// A non-fatal error for a single page.
///
/// Never propagated past [`crate::pipeline::llm::extract_page`]; it is logged
/// and replaced by the fallback page there.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// The page image could not be re-encoded for transport.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The provider call itself failed (network, rate limit, auth, ...).
    #[error("Page {page}: provider call failed after {retries} retries: {detail}")]
    ProviderFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The provider call exceeded the per-call timeout.
    #[error("Page {page}: provider call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The model answered with text that is not JSON.
    #[error("Page {page}: model returned invalid JSON: {detail}")]
    InvalidJson { page: usize, detail: String },

    /// The model answered with JSON of the wrong shape.
    #[error("Page {page}: unexpected response shape: {detail}")]
    UnexpectedShape { page: usize, detail: String },
}

impl PageError {
    /// Whether another attempt at the provider call could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderFailed { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_is_bad_request() {
        let e = BillExtractError::DocumentFetch {
            uri: "https://example.com/bill.pdf".into(),
            reason: "HTTP 404 Not Found".into(),
        };
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
        assert!(e.is_client_error());
        assert!(e.to_string().contains("404"), "got: {e}");
    }

    #[test]
    fn decode_error_is_client_error() {
        let e = BillExtractError::Decode {
            detail: "bad magic".into(),
        };
        assert_eq!(e.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(e.is_client_error());
    }

    #[test]
    fn internal_errors_are_server_faults() {
        assert!(!BillExtractError::Internal("boom".into()).is_client_error());
        assert!(!BillExtractError::PdfiumUnavailable("missing".into()).is_client_error());
    }

    #[test]
    fn only_transport_page_errors_are_retryable() {
        let timeout = PageError::Timeout { page: 2, secs: 60 };
        let json = PageError::InvalidJson {
            page: 2,
            detail: "expected value".into(),
        };
        assert!(timeout.is_retryable());
        assert!(!json.is_retryable());
        assert!(timeout.to_string().contains("Page 2"));
    }
}
