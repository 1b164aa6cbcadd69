//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ render ──▶ encode ──▶ llm ──▶ normalize
//! (bytes)   (pages)    (base64)   (VLM)   (BillItems)
//! ```
//!
//! 1. [`fetch`]     — download the caller's document (bounded by a timeout)
//! 2. [`render`]    — PDF pages via pdfium in `spawn_blocking`, or one decoded image
//! 3. [`encode`]    — JPEG-encode and base64-wrap each page for the request body
//! 4. [`llm`]       — one VLM call per page; failures degrade to an empty page
//! 5. [`normalize`] — parse the reply, drop summary rows, default and coerce fields

pub mod encode;
pub mod fetch;
pub mod llm;
pub mod normalize;
pub mod render;
