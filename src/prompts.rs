//! Prompts sent to the vision model.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

/// Default system prompt for extracting line items from a bill page image.
///
/// The summary-row deny-list here is wider than the code-level filter in
/// [`crate::pipeline::normalize`]; both are applied.
pub const SYSTEM_PROMPT: &str = r#"You are an expert Invoice Data Extraction AI.
Tasks:
1. Extract line items from the bill image provided.
2. Output JSON with keys: "item_name", "item_amount" (net total for that line), "item_rate", "item_quantity".
3. Identify page type: "Bill Detail", "Final Bill", or "Pharmacy".

CRITICAL RULES TO AVOID DOUBLE COUNTING:
- ONLY extract physical goods or services provided.
- DO NOT extract rows labeled: "Subtotal", "Total", "GST", "VAT", "Tax", "Discount", "Balance Due", "Grand Total", or "Round Off".
- If a row is a summary of previous items, IGNORE IT.
- If quantity is missing, infer it as 1.0.

OUTPUT FORMAT:
- Return strict JSON only, with exactly this shape:
  {"items": [{"item_name": "...", "item_amount": 0.0, "item_rate": 0.0, "item_quantity": 1.0}], "page_type": "Bill Detail"}
- Numbers must be plain JSON numbers without currency symbols.
- Do NOT wrap the JSON in code fences or add commentary."#;

/// The per-page user instruction accompanying the page image.
pub fn page_instruction(page_num: usize) -> String {
    format!("Extract line items for Page {page_num}.")
}
