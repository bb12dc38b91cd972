use crate::extract::ProductRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One product to extract and enrich.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemRequest {
    /// Page URL, `file://` URI or local path of a saved page.
    pub source: String,
    /// Skips classification when present.
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Overrides the configured credential for this request.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub sources: SourceList,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl BatchRequest {
    /// Per-item requests sharing the batch options, in input order.
    pub fn items(&self) -> Vec<ItemRequest> {
        self.sources
            .entries()
            .into_iter()
            .map(|source| ItemRequest {
                source,
                category_id: self.category_id.clone(),
                instructions: self.instructions.clone(),
                api_key: self.api_key.clone(),
                categories: self.categories.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceList {
    Single(String),
    Multiple(Vec<String>),
}

impl SourceList {
    /// Sources in input order. A single string holds one source per line;
    /// list entries are taken as given. Commas are never separators.
    pub fn entries(&self) -> Vec<String> {
        match self {
            SourceList::Single(value) => non_blank(value.lines()),
            SourceList::Multiple(values) => non_blank(values.iter().map(String::as_str)),
        }
    }
}

fn non_blank<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    entries
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Serialize, Clone)]
pub struct ItemResponse {
    pub record: ProductRecord,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SkippedItem {
    pub source: String,
    pub stage: String,
    pub error: String,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct BatchResponse {
    pub items: Vec<ItemResponse>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescribeRequest {
    pub title: String,
    /// Local image sent alongside the prompt.
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectCategoryRequest {
    pub title: String,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub price_krw: u64,
    #[serde(default)]
    pub weight_raw: Option<String>,
    /// Generated estimate, used when `weight_raw` does not parse.
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_string_is_split_on_lines() {
        let request: BatchRequest = serde_json::from_value(serde_json::json!({
            "sources": "https://a.example.com/1\n https://b.example.com/2 \n\n/tmp/saved, 500ml.html",
            "instructions": "짧게"
        }))
        .unwrap();
        let items = request.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].source, "/tmp/saved, 500ml.html");
        assert_eq!(items[1].instructions.as_deref(), Some("짧게"));
    }

    #[test]
    fn source_array_entries_are_taken_as_given() {
        let saved = "/tmp/saved/순한 샴푸, 500ml, 1개 - 쿠팡!.html";
        let request: BatchRequest = serde_json::from_value(serde_json::json!({
            "sources": ["https://a.example.com/1", "  ", format!(" {saved} "), "https://b.example.com/2|3"]
        }))
        .unwrap();
        let sources: Vec<String> = request.items().into_iter().map(|i| i.source).collect();
        assert_eq!(
            sources,
            vec!["https://a.example.com/1", saved, "https://b.example.com/2|3"]
        );
    }
}
