/// Selector rules for one storefront. Rules per field are tried in order
/// until one yields a value.
#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    pub name: &'static str,
    /// Substrings of the source reference or domain that select this profile.
    pub domains: &'static [&'static str],
    pub base_url: Option<&'static str>,
    pub referer: Option<&'static str>,
    pub title: &'static [&'static str],
    pub price: &'static [&'static str],
    pub gallery: &'static [&'static str],
    pub detail_images: &'static [&'static str],
    /// Path fragments rewritten on gallery thumbnails to reach the full-size image.
    pub thumbnail_rewrites: &'static [(&'static str, &'static str)],
}

/// `img` attributes checked in order; lazy loaders keep the real source in
/// the data attributes.
pub const IMAGE_ATTRIBUTES: &[&str] = &["data-original", "data-src", "src"];

pub const COUPANG: SiteProfile = SiteProfile {
    name: "coupang",
    domains: &["coupang.com"],
    base_url: Some("https://www.coupang.com"),
    referer: Some("https://www.coupang.com/"),
    title: &["h2.prod-buy-header__title", "h1.prod-buy-header__title"],
    price: &[
        ".total-price > strong",
        "span.total-price > strong",
        ".prod-sale-price > span.total-price > strong",
    ],
    gallery: &[".prod-image__item img"],
    detail_images: &["#productDetail img"],
    thumbnail_rewrites: &[("48x48ex", "492x492ex")],
};

pub const DAISO: SiteProfile = SiteProfile {
    name: "daiso",
    domains: &["daisomall", "daiso"],
    base_url: Some("https://www.daisomall.co.kr"),
    referer: Some("https://www.daisomall.co.kr/"),
    title: &["h1", ".product-title", ".goods-name"],
    price: &[".price", ".cost", ".amount", ".sale-price"],
    gallery: &["img"],
    detail_images: &[],
    thumbnail_rewrites: &[],
};

pub const GENERIC: SiteProfile = SiteProfile {
    name: "generic",
    domains: &[],
    base_url: None,
    referer: None,
    title: &["h1"],
    price: &[".price", ".cost", ".amount", ".sale-price"],
    gallery: &["img"],
    detail_images: &[],
    thumbnail_rewrites: &[],
};

pub const PROFILES: &[SiteProfile] = &[COUPANG, DAISO];

/// Profile whose domain fragment appears in `source`, else the generic one.
pub fn select_profile(source: &str) -> &'static SiteProfile {
    let lowered = source.to_lowercase();
    PROFILES
        .iter()
        .find(|profile| profile.domains.iter().any(|d| lowered.contains(d)))
        .unwrap_or(&GENERIC)
}

impl SiteProfile {
    pub fn rewrite_thumbnail(&self, src: &str) -> String {
        self.thumbnail_rewrites
            .iter()
            .fold(src.to_string(), |acc, (from, to)| acc.replace(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_domain_substring() {
        assert_eq!(
            select_profile("https://www.coupang.com/vp/products/123").name,
            "coupang"
        );
        assert_eq!(
            select_profile("https://www.daisomall.co.kr/pd/pdr/1").name,
            "daiso"
        );
        assert_eq!(select_profile("https://shop.example.com/p/1").name, "generic");
    }

    #[test]
    fn coupang_thumbnails_upscale() {
        let src = "//thumbnail.coupangcdn.com/thumbnails/remote/48x48ex/image/a.jpg";
        assert!(COUPANG.rewrite_thumbnail(src).contains("492x492ex"));
    }
}
