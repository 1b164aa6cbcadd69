//! Output types: extracted line items, pages, token usage and the response
//! document returned by the endpoint.
//!
//! Rust field names describe the domain; `serde` attributes produce the wire
//! names clients consume (`item_name`, `pagewise_line_items`, ...).

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign};

/// One purchased good or service extracted from a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    #[serde(rename = "item_name")]
    pub name: String,
    /// Net total for the line.
    #[serde(rename = "item_amount")]
    pub amount: f64,
    #[serde(rename = "item_rate")]
    pub rate: f64,
    #[serde(rename = "item_quantity")]
    pub quantity: f64,
}

/// Classification of a bill page, as reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageKind {
    #[serde(rename = "Bill Detail")]
    BillDetail,
    #[serde(rename = "Final Bill")]
    FinalBill,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl PageKind {
    /// Parse the model's free-form `page_type` label.
    ///
    /// Matching ignores case, surrounding whitespace and `_`/`-` separators.
    /// Anything unrecognised is [`PageKind::Unknown`].
    pub fn from_label(label: &str) -> Self {
        let normalised = label
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalised.as_str() {
            "bill detail" | "bill details" => Self::BillDetail,
            "final bill" => Self::FinalBill,
            "pharmacy" => Self::Pharmacy,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillDetail => "Bill Detail",
            Self::FinalBill => "Final Bill",
            Self::Pharmacy => "Pharmacy",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction result for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number, serialised as a string (`"page_no": "3"`).
    #[serde(rename = "page_no", with = "page_no")]
    pub page_number: usize,
    #[serde(rename = "page_type")]
    pub page_kind: PageKind,
    #[serde(rename = "bill_items")]
    pub items: Vec<BillItem>,
}

impl PageResult {
    /// The empty page substituted when extraction of a page fails.
    pub fn fallback(page_number: usize) -> Self {
        Self {
            page_number,
            page_kind: PageKind::Unknown,
            items: Vec::new(),
        }
    }
}

mod page_no {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(n: &usize, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&n.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Provider-billed token counts. Summed across pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "total_tokens")]
    pub total: u64,
    #[serde(rename = "input_tokens")]
    pub input: u64,
    #[serde(rename = "output_tokens")]
    pub output: u64,
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            total: self.total + rhs.total,
            input: self.input + rhs.input,
            output: self.output + rhs.output,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// All pages of one document.
///
/// The item count is always derived from `pages`; the wire field
/// `total_item_count` is computed on serialisation and ignored (recomputed)
/// on deserialisation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "ExtractionData")]
pub struct ExtractionResult {
    pub pages: Vec<PageResult>,
}

impl ExtractionResult {
    pub fn total_item_count(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }
}

/// Wire shape of [`ExtractionResult`].
#[derive(Serialize, Deserialize)]
struct ExtractionData {
    pagewise_line_items: Vec<PageResult>,
    #[serde(default)]
    total_item_count: usize,
}

impl From<ExtractionData> for ExtractionResult {
    fn from(data: ExtractionData) -> Self {
        Self {
            pages: data.pagewise_line_items,
        }
    }
}

impl Serialize for ExtractionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ExtractionData", 2)?;
        s.serialize_field("pagewise_line_items", &self.pages)?;
        s.serialize_field("total_item_count", &self.total_item_count())?;
        s.end()
    }
}

/// The response document for one extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(rename = "is_success")]
    pub success: bool,
    #[serde(rename = "token_usage")]
    pub usage: TokenUsage,
    #[serde(rename = "data")]
    pub result: ExtractionResult,
}
