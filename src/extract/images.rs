use crate::extract::profiles::{PROFILES, SiteProfile};
use crate::extract::strategies::meta_content;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Substrings marking decoration rather than product imagery.
pub const IMAGE_DENYLIST: &[&str] = &["logo", "icon", "blank", "placeholder", ".gif"];

static CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).expect("canonical selector"));

/// Ordered, deduplicated, capped gallery built from raw `src` values.
#[derive(Debug, Clone)]
pub struct ImageCollector {
    site_base: Option<String>,
    document: Option<Url>,
    allow_local: bool,
    max_images: usize,
    seen: HashSet<String>,
    images: Vec<String>,
}

impl ImageCollector {
    /// `file:` references are kept only when the document itself is a saved
    /// page on disk.
    pub fn new(site_base: Option<String>, document: Option<Url>, max_images: usize) -> Self {
        let allow_local = document.as_ref().is_some_and(|url| url.scheme() == "file");
        Self {
            site_base: site_base.map(|b| b.trim_end_matches('/').to_string()),
            document,
            allow_local,
            max_images,
            seen: HashSet::new(),
            images: Vec::new(),
        }
    }

    /// Absolute form of a raw reference, or `None` when it cannot be resolved.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let lowered = raw.to_ascii_lowercase();
        if lowered.starts_with("data:") || lowered.starts_with("javascript:") {
            return None;
        }
        if let Some(rest) = raw.strip_prefix("//") {
            return Some(format!("https://{rest}"));
        }
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Some(raw.to_string());
        }
        if lowered.starts_with("file:") {
            return self.allow_local.then(|| raw.to_string());
        }
        if raw.starts_with('/') {
            return self.site_base.as_ref().map(|base| format!("{base}{raw}"));
        }
        // Document-relative, as left behind by "save page as".
        let joined = self.document.as_ref()?.join(raw).ok()?;
        match joined.scheme() {
            "http" | "https" => Some(joined.to_string()),
            "file" if self.allow_local => Some(joined.to_string()),
            _ => None,
        }
    }

    /// Adds one reference; returns whether it was kept.
    pub fn push(&mut self, raw: &str) -> bool {
        if self.is_full() {
            return false;
        }
        let Some(normalized) = self.normalize(raw) else {
            return false;
        };
        if is_denied(&normalized) || !self.seen.insert(normalized.clone()) {
            return false;
        }
        self.images.push(normalized);
        true
    }

    pub fn extend<'a>(&mut self, raws: impl IntoIterator<Item = &'a String>) -> usize {
        raws.into_iter().filter(|raw| self.push(raw)).count()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_full(&self) -> bool {
        self.images.len() >= self.max_images
    }

    pub fn into_images(self) -> Vec<String> {
        self.images
    }
}

pub fn is_denied(url: &str) -> bool {
    let lowered = url.to_lowercase();
    IMAGE_DENYLIST.iter().any(|needle| lowered.contains(needle))
}

/// Site root for root-relative references: share/canonical metadata first,
/// then the storefront profile (matched by source or title), then the
/// document's own origin.
pub fn resolve_site_base(
    doc: &Html,
    document: Option<&Url>,
    profile: &SiteProfile,
    title_hint: Option<&str>,
) -> Option<String> {
    let from_metadata = meta_content(doc, "og:url")
        .or_else(|| {
            doc.select(&CANONICAL)
                .filter_map(|el| el.value().attr("href"))
                .map(str::to_string)
                .next()
        })
        .and_then(|raw| origin_of(&raw));
    if from_metadata.is_some() {
        return from_metadata;
    }

    if let Some(base) = profile.base_url {
        return Some(base.to_string());
    }
    if let Some(title) = title_hint.map(str::to_lowercase)
        && let Some(base) = PROFILES
            .iter()
            .find(|p| p.domains.iter().any(|d| title.contains(d)))
            .and_then(|p| p.base_url)
    {
        return Some(base.to_string());
    }

    document.and_then(|url| origin_of(url.as_str()))
}

fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::profiles::GENERIC;

    fn collector(base: Option<&str>, max: usize) -> ImageCollector {
        ImageCollector::new(base.map(str::to_string), None, max)
    }

    #[test]
    fn normalizes_protocol_and_root_relative() {
        let c = collector(Some("https://shop.example.com/"), 10);
        assert_eq!(
            c.normalize("//cdn.example.com/a.jpg").as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            c.normalize("/goods/b.png").as_deref(),
            Some("https://shop.example.com/goods/b.png")
        );
        assert_eq!(c.normalize("data:image/png;base64,AAAA"), None);
    }

    #[test]
    fn root_relative_without_base_is_discarded() {
        let mut c = collector(None, 10);
        assert!(!c.push("/goods/b.png"));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn document_relative_resolves_against_saved_page() {
        let doc = Url::parse("file:///tmp/saved/page.html").unwrap();
        let c = ImageCollector::new(None, Some(doc), 10);
        assert_eq!(
            c.normalize("page_files/1.jpg").as_deref(),
            Some("file:///tmp/saved/page_files/1.jpg")
        );
    }

    #[test]
    fn remote_document_drops_file_references() {
        let doc = Url::parse("https://shop.example.com/p/1").unwrap();
        let mut c = ImageCollector::new(Some("https://shop.example.com".into()), Some(doc), 10);
        assert_eq!(c.normalize("file:///etc/passwd"), None);
        assert_eq!(c.normalize("FILE:///home/user/.ssh/id_rsa"), None);
        assert!(!c.push("file:///tmp/secret.jpg"));
        assert!(c.push("https://cdn.example.com/1.jpg"));
        assert_eq!(c.into_images(), vec!["https://cdn.example.com/1.jpg"]);

        let unknown = collector(None, 10);
        assert_eq!(unknown.normalize("file:///tmp/a.jpg"), None);
    }

    #[test]
    fn saved_page_keeps_absolute_file_references() {
        let doc = Url::parse("file:///tmp/saved/page.html").unwrap();
        let c = ImageCollector::new(None, Some(doc), 10);
        assert_eq!(
            c.normalize("file:///tmp/saved/page_files/2.png").as_deref(),
            Some("file:///tmp/saved/page_files/2.png")
        );
    }

    #[test]
    fn dedupes_by_normalized_form_in_first_seen_order() {
        let mut c = collector(Some("https://shop.example.com"), 10);
        let raws: Vec<String> = [
            "//cdn.example.com/a.jpg",
            "https://cdn.example.com/b.jpg",
            "https://cdn.example.com/a.jpg",
            "/x/c.jpg",
            "https://shop.example.com/x/c.jpg",
            "https://cdn.example.com/b.jpg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        c.extend(raws.iter());
        let images = c.into_images();
        assert_eq!(
            images,
            vec![
                "https://cdn.example.com/a.jpg",
                "https://cdn.example.com/b.jpg",
                "https://shop.example.com/x/c.jpg",
            ]
        );
        let unique: HashSet<_> = images.iter().collect();
        assert_eq!(unique.len(), images.len());
    }

    #[test]
    fn denylist_and_cap_apply() {
        let mut c = collector(None, 2);
        assert!(!c.push("https://cdn.example.com/logo.png"));
        assert!(!c.push("https://cdn.example.com/spinner.GIF"));
        assert!(!c.push("https://cdn.example.com/common/icon_cart.png"));
        assert!(c.push("https://cdn.example.com/1.jpg"));
        assert!(c.push("https://cdn.example.com/2.jpg"));
        assert!(!c.push("https://cdn.example.com/3.jpg"));
        assert!(c.is_full());
    }

    #[test]
    fn site_base_prefers_share_metadata() {
        let doc = Html::parse_document(
            r#"<meta property="og:url" content="https://m.store.example.com/p/1?x=1">"#,
        );
        let base = resolve_site_base(&doc, None, &GENERIC, None);
        assert_eq!(base.as_deref(), Some("https://m.store.example.com"));
    }

    #[test]
    fn site_base_falls_back_to_title_hint_then_origin() {
        let doc = Html::parse_document("<p>saved</p>");
        let by_title = resolve_site_base(&doc, None, &GENERIC, Some("다이소 Daiso 수납함"));
        assert_eq!(by_title.as_deref(), Some("https://www.daisomall.co.kr"));

        let location = Url::parse("http://localhost:8080/p/1").unwrap();
        let by_origin = resolve_site_base(&doc, Some(&location), &GENERIC, None);
        assert_eq!(by_origin.as_deref(), Some("http://localhost:8080"));
    }
}
