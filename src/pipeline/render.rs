//! Page rasterisation: document bytes → ordered page images.
//!
//! PDFs go through pdfium, one image per page in document order. Anything
//! else is decoded by the `image` crate as a single standalone page.
//!
//! Decoding and rendering are CPU-bound (and pdfium wraps a C++ library with
//! thread-local state), so both run inside `tokio::task::spawn_blocking`.
//! Every page, rendered or decoded, fits within `max_rendered_pixels`.

use crate::config::ExtractionConfig;
use crate::error::BillExtractError;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Rasterise a fetched document into page images.
pub async fn rasterize(
    bytes: Vec<u8>,
    is_pdf: bool,
    config: &ExtractionConfig,
) -> Result<Vec<DynamicImage>, BillExtractError> {
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    tokio::task::spawn_blocking(move || {
        if !is_pdf {
            let img = decode_single_image(&bytes)?;
            return Ok(vec![fit_within(img, max_pixels)]);
        }
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| BillExtractError::PdfiumUnavailable(e.to_string()))?;
        render_pdf_blocking(&pdfium, &bytes, dpi, max_pixels)
    })
    .await
    .map_err(|e| BillExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Decode bytes as one standalone image (PNG, JPEG, WebP, TIFF, ...).
pub fn decode_single_image(bytes: &[u8]) -> Result<DynamicImage, BillExtractError> {
    let img = image::load_from_memory(bytes).map_err(|e| BillExtractError::Decode {
        detail: e.to_string(),
    })?;
    debug!("Decoded image → {}x{} px", img.width(), img.height());
    Ok(img)
}

/// Downscale `img` so neither side exceeds `max_dim`, keeping the aspect ratio.
fn fit_within(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);
    if largest <= max_dim {
        return img;
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, max_dim);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, max_dim);
    debug!("Downscaling image {}x{} → {}x{} px", w, h, new_w, new_h);
    img.resize_exact(new_w, new_h, FilterType::Triangle)
}

/// Blocking implementation of PDF page rendering.
pub(crate) fn render_pdf_blocking(
    pdfium: &Pdfium,
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, BillExtractError> {
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| BillExtractError::Decode {
            detail: format!("PDF could not be opened: {:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);
    if total_pages == 0 {
        return Err(BillExtractError::Decode {
            detail: "PDF has no pages".into(),
        });
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| BillExtractError::Decode {
                detail: format!("page {} could not be rendered: {:?}", idx + 1, e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(image);
    }

    Ok(results)
}
