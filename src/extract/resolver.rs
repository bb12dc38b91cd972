use crate::config::ExtractionPolicy;
use crate::extract::images::{ImageCollector, resolve_site_base};
use crate::extract::loader::LoadedPage;
use crate::extract::profiles::{SiteProfile, select_profile};
use crate::extract::record::{PartialProduct, ProductRecord, non_empty};
use crate::extract::strategies::{
    ExtractionStrategy, PageView, default_strategies, element_text, meta_content,
};
use crate::extract::weight::{is_weight_key, parse_weight_kg};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

static TABLE_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("table tr").expect("row selector"));
static ROW_KEY: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("th selector"));
static ROW_VALUE: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("td selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("title selector"));

/// What one strategy contributed to the merged record.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: &'static str,
    pub title: bool,
    pub price: bool,
    pub weight: bool,
    pub images_found: usize,
    pub images_added: usize,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: ProductRecord,
    pub profile: &'static SiteProfile,
    pub site_base: Option<String>,
    pub reports: Vec<StrategyReport>,
}

impl Resolution {
    /// Referer to present when fetching this page's assets.
    pub fn referer(&self) -> Option<String> {
        self.profile
            .referer
            .map(str::to_string)
            .or_else(|| self.site_base.as_ref().map(|base| format!("{base}/")))
    }
}

pub struct ExtractionResolver {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    policy: ExtractionPolicy,
}

impl ExtractionResolver {
    pub fn new(policy: ExtractionPolicy) -> Self {
        Self {
            strategies: default_strategies(policy.brute_force_threshold),
            policy,
        }
    }

    /// Runs every applicable strategy in order. Scalars keep the first value
    /// found; images accumulate across strategies.
    pub fn resolve(&self, page: &LoadedPage) -> Resolution {
        let document = Html::parse_document(&page.html);
        let profile_key = match &page.location {
            Some(url) => format!("{} {}", page.source, url),
            None => page.source.clone(),
        };
        let profile = select_profile(&profile_key);
        let title_hint = meta_content(&document, "og:title").or_else(|| {
            document
                .select(&TITLE)
                .next()
                .and_then(|el| non_empty(element_text(&el)))
        });
        let site_base = resolve_site_base(
            &document,
            page.location.as_ref(),
            profile,
            title_hint.as_deref(),
        );
        let mut collector = ImageCollector::new(
            site_base.clone(),
            page.location.clone(),
            self.policy.max_images,
        );

        let view = PageView {
            document: &document,
            html: &page.html,
            profile,
        };
        let mut merged = PartialProduct::default();
        let mut reports = Vec::new();
        for strategy in &self.strategies {
            if !strategy.applies(collector.len()) {
                debug!(target = "lister.extract", strategy = strategy.name(), images = collector.len(), "strategy_skipped");
                continue;
            }
            let found = strategy.extract(&view);
            let images_added = collector.extend(found.images.iter());
            reports.push(StrategyReport {
                strategy: strategy.name(),
                title: found.title.is_some(),
                price: found.price.is_some(),
                weight: found.weight_raw.is_some(),
                images_found: found.images.len(),
                images_added,
            });
            merge_scalars(&mut merged, found);
        }

        if merged.weight_raw.is_none() {
            merged.weight_raw = discover_weight(&document);
        }

        let mut record = ProductRecord::empty(&page.source);
        record.title = merged.title.unwrap_or_default();
        record.price = merged.price;
        record.weight_kg = parse_weight_kg(merged.weight_raw.as_deref());
        record.weight_raw = merged.weight_raw;
        record.detail_text = merged.detail_text.unwrap_or_default();
        record.images = collector.into_images();

        info!(
            target = "lister.extract",
            source = %page.source,
            profile = profile.name,
            title_found = !record.title.is_empty(),
            price = ?record.price,
            images = record.images.len(),
            weight = ?record.weight_raw,
            partial = page.navigation_failed(),
            "extraction_resolved"
        );

        Resolution {
            record,
            profile,
            site_base,
            reports,
        }
    }
}

fn merge_scalars(merged: &mut PartialProduct, found: PartialProduct) {
    if merged.title.is_none() {
        merged.title = found.title;
    }
    if merged.price.is_none() {
        merged.price = found.price;
    }
    if merged.weight_raw.is_none() {
        merged.weight_raw = found.weight_raw;
    }
    if merged.detail_text.is_none() {
        merged.detail_text = found.detail_text;
    }
}

/// First detail-table row whose key names a weight or capacity.
fn discover_weight(document: &Html) -> Option<String> {
    for row in document.select(&TABLE_ROW) {
        let (Some(key), Some(value)) = (row.select(&ROW_KEY).next(), row.select(&ROW_VALUE).next())
        else {
            continue;
        };
        let key_text = element_text(&key);
        if is_weight_key(&key_text) {
            let value = non_empty(element_text(&value));
            if value.is_some() {
                debug!(target = "lister.extract", key = %key_text, value = ?value, "weight_row_found");
                return value;
            }
        }
    }
    None
}

/// Writes the loaded markup for post-mortem debugging. Failures are logged only.
pub async fn write_snapshot(path: &Path, page: &LoadedPage) {
    if let Some(parent) = path.parent()
        && let Err(err) = tokio::fs::create_dir_all(parent).await
    {
        warn!(target = "lister.extract", error = %err, "snapshot_dir_failed");
        return;
    }
    let header = format!(
        "<!-- source: {} | navigation_error: {} -->\n",
        page.source,
        page.navigation_error.as_deref().unwrap_or("none")
    );
    match tokio::fs::write(path, format!("{header}{}", page.html)).await {
        Ok(()) => warn!(target = "lister.extract", path = %path.display(), "diagnostic_snapshot_written"),
        Err(err) => warn!(target = "lister.extract", error = %err, "snapshot_write_failed"),
    }
}
