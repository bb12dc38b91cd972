use crate::extract::profiles::{IMAGE_ATTRIBUTES, SiteProfile};
use crate::extract::record::{PartialProduct, non_empty, parse_price};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

/// Read-only view of a loaded document handed to each strategy.
pub struct PageView<'a> {
    pub document: &'a Html,
    pub html: &'a str,
    pub profile: &'static SiteProfile,
}

/// One source of product data on a page. Strategies never fail: a field
/// they cannot find is left absent.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy should run given how many images are already known.
    fn applies(&self, _images_so_far: usize) -> bool {
        true
    }

    fn extract(&self, page: &PageView<'_>) -> PartialProduct;
}

/// The cascade in reliability order.
pub fn default_strategies(brute_force_threshold: usize) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(StructuredData),
        Box::new(MetaTags),
        Box::new(SiteSelectors),
        Box::new(BruteForce {
            threshold: brute_force_threshold,
        }),
    ]
}

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("ld+json selector"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("img selector"));
static IMAGE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>]+?\.(?:jpg|jpeg|png|gif|webp)"#).expect("image url regex")
});

/// JSON-LD `Product` blocks.
pub struct StructuredData;

impl ExtractionStrategy for StructuredData {
    fn name(&self) -> &'static str {
        "structured_data"
    }

    fn extract(&self, page: &PageView<'_>) -> PartialProduct {
        page.document
            .select(&LD_JSON)
            .filter_map(|script| {
                let text = script.text().collect::<String>();
                serde_json::from_str::<Value>(text.trim()).ok()
            })
            .find_map(|value| find_product(&value).map(product_from_json_ld))
            .unwrap_or_default()
    }
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(obj) => {
            if is_product_type(obj.get("@type")) {
                return Some(value);
            }
            obj.get("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn is_product_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(items)) => items.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    }
}

fn product_from_json_ld(product: &Value) -> PartialProduct {
    PartialProduct {
        title: product.get("name").and_then(Value::as_str).and_then(non_empty),
        price: product.get("offers").and_then(offer_price),
        images: product.get("image").map(json_images).unwrap_or_default(),
        weight_raw: product.get("weight").and_then(json_weight),
        detail_text: product
            .get("description")
            .and_then(Value::as_str)
            .and_then(non_empty),
    }
}

fn offer_price(offers: &Value) -> Option<u64> {
    let offer = match offers {
        Value::Array(items) => items.first()?,
        other => other,
    };
    ["price", "lowPrice"]
        .iter()
        .filter_map(|key| offer.get(*key))
        .find_map(|price| match price {
            Value::Number(n) => n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64),
            Value::String(s) => parse_price(s),
            _ => None,
        })
}

fn json_images(image: &Value) -> Vec<String> {
    match image {
        Value::String(s) => non_empty(s).into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(json_images).collect(),
        Value::Object(obj) => obj
            .get("url")
            .or_else(|| obj.get("contentUrl"))
            .map(json_images)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn json_weight(weight: &Value) -> Option<String> {
    match weight {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => {
            let value = obj.get("value").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })?;
            let unit = obj
                .get("unitText")
                .or_else(|| obj.get("unitCode"))
                .and_then(Value::as_str)
                .map(|unit| match unit {
                    "KGM" => "kg",
                    "GRM" => "g",
                    other => other,
                })
                .unwrap_or("");
            non_empty(format!("{value}{unit}"))
        }
        _ => None,
    }
}

/// Link-preview metadata (`og:*`, `product:price:amount`).
pub struct MetaTags;

impl ExtractionStrategy for MetaTags {
    fn name(&self) -> &'static str {
        "meta_tags"
    }

    fn extract(&self, page: &PageView<'_>) -> PartialProduct {
        let doc = page.document;
        PartialProduct {
            title: meta_content(doc, "og:title"),
            price: meta_content(doc, "product:price:amount").and_then(|p| parse_price(&p)),
            images: meta_content(doc, "og:image").into_iter().collect(),
            weight_raw: None,
            detail_text: meta_content(doc, "og:description"),
        }
    }
}

pub fn meta_content(doc: &Html, property: &str) -> Option<String> {
    let css = format!(r#"meta[property="{property}"], meta[name="{property}"]"#);
    let selector = Selector::parse(&css).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .find_map(non_empty)
}

/// Per-site CSS selector rules.
pub struct SiteSelectors;

impl ExtractionStrategy for SiteSelectors {
    fn name(&self) -> &'static str {
        "site_profile"
    }

    fn extract(&self, page: &PageView<'_>) -> PartialProduct {
        let profile = page.profile;
        let doc = page.document;
        let title = profile.title.iter().find_map(|css| first_text(doc, css));
        let price = profile
            .price
            .iter()
            .find_map(|css| first_text(doc, css).and_then(|text| parse_price(&text)));
        let mut images = Vec::new();
        for css in profile.gallery {
            images.extend(
                image_sources(doc, css)
                    .into_iter()
                    .map(|src| profile.rewrite_thumbnail(&src)),
            );
        }
        for css in profile.detail_images {
            images.extend(image_sources(doc, css));
        }
        PartialProduct {
            title,
            price,
            images,
            weight_raw: None,
            detail_text: None,
        }
    }
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).find_map(|el| non_empty(element_text(&el)))
}

pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn image_sources(doc: &Html, css: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    doc.select(&selector)
        .flat_map(|el| {
            // A selector may land on the wrapper rather than the img itself.
            if el.value().name() == "img" {
                vec![el]
            } else {
                el.select(&IMG).collect()
            }
        })
        .filter_map(|img| {
            IMAGE_ATTRIBUTES
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .find_map(non_empty)
        })
        .collect()
}

/// Last resort: image-looking URLs anywhere in the raw markup. Saved pages
/// often keep gallery URLs only inside inline scripts.
pub struct BruteForce {
    pub threshold: usize,
}

impl ExtractionStrategy for BruteForce {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn applies(&self, images_so_far: usize) -> bool {
        images_so_far < self.threshold
    }

    fn extract(&self, page: &PageView<'_>) -> PartialProduct {
        PartialProduct {
            images: IMAGE_URL
                .find_iter(page.html)
                .map(|m| m.as_str().to_string())
                .collect(),
            ..PartialProduct::default()
        }
    }
}
