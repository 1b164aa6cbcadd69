//! Normalisation: untrusted model output → validated [`BillItem`]s.
//!
//! The model's reply is treated as a loosely typed JSON mapping. Nothing is
//! trusted: field presence, field types and number formatting are all checked
//! here, and a strongly typed `BillItem` is built only after defaulting and
//! coercion.
//!
//! ## Rule Order
//!
//! 1. Strip an outer code fence (models sometimes disobey the prompt)
//! 2. Parse the text as a JSON object → [`RawPageData`]
//! 3. Drop summary rows via the deny-list
//! 4. Default and coerce each remaining field

use crate::error::PageError;
use crate::output::{BillItem, PageKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Lower-cased substrings that mark a summary row rather than a line item.
pub const DENY_LIST: [&str; 3] = ["total", "subtotal", "amount due"];

/// Default name for an item the model did not name.
pub const UNKNOWN_NAME: &str = "Unknown";

/// One page of model output before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPageData {
    pub items: Vec<Value>,
    /// `None` when the model omitted the key.
    pub page_type: Option<String>,
}

impl RawPageData {
    /// What a page becomes when extraction fails.
    pub fn fallback() -> Self {
        Self {
            items: Vec::new(),
            page_type: Some(PageKind::Unknown.as_str().to_string()),
        }
    }

    /// Parse the raw text returned by the model for `page`.
    pub fn parse(page: usize, text: &str) -> Result<Self, PageError> {
        let json = strip_code_fence(text);
        let value: Value = serde_json::from_str(json).map_err(|e| PageError::InvalidJson {
            page,
            detail: e.to_string(),
        })?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(PageError::UnexpectedShape {
                    page,
                    detail: format!("expected a JSON object, got {}", json_kind(&other)),
                })
            }
        };

        let items = match take_items(&mut object) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(PageError::UnexpectedShape {
                    page,
                    detail: format!("\"items\" must be an array, got {}", json_kind(&other)),
                })
            }
        };

        let page_type = match object.get("page_type") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        Ok(Self { items, page_type })
    }

    /// The page classification.
    ///
    /// A page object without a `page_type` key counts as a bill detail page.
    pub fn page_kind(&self) -> PageKind {
        match &self.page_type {
            Some(label) => PageKind::from_label(label),
            None => PageKind::BillDetail,
        }
    }
}

fn take_items(object: &mut Map<String, Value>) -> Option<Value> {
    ["items", "bill_items", "line_items"]
        .iter()
        .find_map(|key| object.remove(*key))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap());

fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

// ── Rules 3–4: Filter and coerce ─────────────────────────────────────────────

/// Turn raw items into validated line items, preserving order.
pub fn normalize_items(page: usize, raw_items: &[Value]) -> Vec<BillItem> {
    raw_items
        .iter()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let Some(fields) = raw.as_object() else {
                warn!(
                    "Page {}: item {} is {}, not an object; skipped",
                    page,
                    idx,
                    json_kind(raw)
                );
                return None;
            };
            normalize_item(page, fields)
        })
        .collect()
}

/// Whether a declared item name marks a summary row.
pub fn is_summary_row(name: &str) -> bool {
    let lowered = name.to_lowercase();
    DENY_LIST.iter().any(|term| lowered.contains(term))
}

fn normalize_item(page: usize, fields: &Map<String, Value>) -> Option<BillItem> {
    let declared_name = declared_name(fields.get("item_name"));
    if is_summary_row(declared_name.as_deref().unwrap_or("")) {
        return None;
    }

    let name = declared_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());

    Some(BillItem {
        amount: numeric_field(page, &name, "item_amount", fields.get("item_amount"), 0.0),
        rate: numeric_field(page, &name, "item_rate", fields.get("item_rate"), 0.0),
        quantity: numeric_field(page, &name, "item_quantity", fields.get("item_quantity"), 1.0),
        name,
    })
}

fn declared_name(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Coerce one numeric field, substituting `default` (and logging) when the
/// value is absent, unparseable, negative or not finite.
fn numeric_field(page: usize, item: &str, field: &str, value: Option<&Value>, default: f64) -> f64 {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return default;
    };
    match coerce_number(value) {
        Some(n) if n.is_finite() && n >= 0.0 => n,
        _ => {
            warn!(
                "Page {}: item '{}' has unusable {} {}; using {}",
                page, item, field, value, default
            );
            default
        }
    }
}

static RE_CURRENCY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:₹|\$|€|£|rs\.?|inr)\s*").unwrap());

/// Lenient number parsing for model output such as `"1,250.00"` or `"₹ 50"`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = RE_CURRENCY_PREFIX.replace(s.trim(), "").replace(',', "");
            cleaned.trim().parse::<f64>().ok()
        }
        _ => None,
    }
}
