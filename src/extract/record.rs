use crate::extract::weight::DEFAULT_WEIGHT_KG;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;

/// One extracted and enriched product.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source: String,
    pub title: String,
    /// Minor currency units (KRW has no subunit, so this is won).
    pub price: Option<u64>,
    pub images: Vec<String>,
    pub local_image_paths: Vec<PathBuf>,
    pub weight_raw: Option<String>,
    pub weight_kg: f64,
    pub detail_text: String,
    pub generation: Option<GenerationResult>,
    pub category: Option<CategoryChoice>,
    pub quote: Option<PriceQuote>,
}

impl ProductRecord {
    pub fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            title: String::new(),
            price: None,
            images: Vec::new(),
            local_image_paths: Vec::new(),
            weight_raw: None,
            weight_kg: DEFAULT_WEIGHT_KG,
            detail_text: String::new(),
            generation: None,
            category: None,
            quote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResult {
    pub refined_title: String,
    pub description: String,
    pub weight_kg: f64,
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryChoice {
    pub id: String,
    pub label: Option<String>,
    /// `request` when supplied by the caller, `model` when classified.
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub weight_kg: f64,
    pub shipping_sgd: f64,
    pub listing_price_sgd: f64,
}

/// What a single extraction strategy found. Every field is optional; an
/// absent field simply lets a later strategy fill it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialProduct {
    pub title: Option<String>,
    pub price: Option<u64>,
    pub images: Vec<String>,
    pub weight_raw: Option<String>,
    pub detail_text: Option<String>,
}

impl PartialProduct {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.price.is_none()
            && self.images.is_empty()
            && self.weight_raw.is_none()
            && self.detail_text.is_none()
    }
}

/// Trimmed text, or `None` when nothing is left.
pub fn non_empty(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Digits of a price label (`"12,900원"` → 12900). Decimal parts are dropped.
pub fn parse_price(raw: &str) -> Option<u64> {
    let integral = raw.trim().split('.').next().unwrap_or("");
    let digits: String = integral.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_price_handles_labels_and_decimals() {
        assert_eq!(parse_price("12,900원"), Some(12900));
        assert_eq!(parse_price("5000.00"), Some(5000));
        assert_eq!(parse_price("가격 문의"), None);
    }

    #[test]
    fn empty_record_uses_default_weight() {
        let record = ProductRecord::empty("https://example.com/p/1");
        assert!(record.title.is_empty());
        assert_eq!(record.weight_kg, DEFAULT_WEIGHT_KG);
        assert!(record.price.is_none());
    }
}
