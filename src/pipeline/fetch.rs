//! Document acquisition: turn the caller's document reference into bytes.
//!
//! The reference is caller-supplied, so every failure here is a client error.
//! Network fetches are bounded by the configured download timeout; local
//! files are only read when the service explicitly allows it.

use crate::config::ExtractionConfig;
use crate::error::BillExtractError;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL we fetch over the network.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Whether the reference names a PDF, judged by a case-insensitive `.pdf`
/// suffix only. No content sniffing is done.
pub fn is_pdf(uri: &str) -> bool {
    uri.trim().to_lowercase().ends_with(".pdf")
}

/// Fetch the raw bytes of the referenced document.
pub async fn fetch_document(uri: &str, config: &ExtractionConfig) -> Result<Vec<u8>, BillExtractError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(BillExtractError::InvalidInput {
            input: uri.to_string(),
            reason: "document reference is empty".into(),
        });
    }

    if is_url(uri) {
        return download_url(uri, config).await;
    }

    if !config.allow_local_files {
        return Err(BillExtractError::InvalidInput {
            input: uri.to_string(),
            reason: "not an HTTP/HTTPS URL".into(),
        });
    }

    read_local(uri, config).await
}

/// Download a URL into memory.
async fn download_url(url: &str, config: &ExtractionConfig) -> Result<Vec<u8>, BillExtractError> {
    info!("Downloading document from: {}", url);
    let timeout_secs = config.download_timeout_secs;
    let fetch_err = |reason: String| BillExtractError::DocumentFetch {
        uri: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BillExtractError::Internal(format!("HTTP client: {e}")))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fetch_err(format!("timed out after {timeout_secs}s"))
        } else {
            fetch_err(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(fetch_err(format!("HTTP {}", response.status())));
    }

    // The header is only a hint; the running total below is what bounds memory.
    let declared = response.content_length();
    if let Some(len) = declared {
        check_size(url, len, config)?;
    }

    let mut bytes = Vec::with_capacity(declared.unwrap_or(0) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                fetch_err(format!("timed out after {timeout_secs}s"))
            } else {
                fetch_err(e.to_string())
            }
        })?;
        check_size(url, (bytes.len() + chunk.len()) as u64, config)?;
        bytes.extend_from_slice(&chunk);
    }

    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes)
}

/// Read a local path or `file://` URI.
async fn read_local(uri: &str, config: &ExtractionConfig) -> Result<Vec<u8>, BillExtractError> {
    let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
    info!("Reading local document: {}", path.display());

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| BillExtractError::DocumentFetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
    check_size(uri, bytes.len() as u64, config)?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

fn check_size(uri: &str, size: u64, config: &ExtractionConfig) -> Result<(), BillExtractError> {
    if size > config.max_document_bytes {
        return Err(BillExtractError::DocumentTooLarge {
            uri: uri.to_string(),
            size,
            limit: config.max_document_bytes,
        });
    }
    Ok(())
}
