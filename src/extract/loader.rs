use crate::http::{build_browser_client, referer_header};
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported source reference: {0}")]
    Unsupported(String),
    #[error("local file unreadable: {0}")]
    Io(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// A document as far as it loaded. `html` may be partial or empty when
/// navigation failed; strategies still run over whatever is there.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub source: String,
    pub location: Option<Url>,
    pub html: String,
    pub navigation_error: Option<String>,
}

impl LoadedPage {
    #[cfg(test)]
    pub fn from_html(source: &str, html: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            location: Url::parse(source).ok(),
            html: html.into(),
            navigation_error: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.location
            .as_ref()
            .is_some_and(|url| url.scheme() == "file")
    }

    pub fn navigation_failed(&self) -> bool {
        self.navigation_error.is_some()
    }
}

pub struct PageLoader {
    http: Client,
}

impl Default for PageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLoader {
    pub fn new() -> Self {
        Self {
            http: build_browser_client(),
        }
    }

    /// Load a page by URL, `file://` URI, or filesystem path. Never fails:
    /// any error is recorded on the returned page instead.
    pub async fn load(&self, reference: &str, referer: Option<&str>) -> LoadedPage {
        let reference = reference.trim();
        let outcome = match local_path(reference) {
            Some(path) => load_local(reference, &path).await,
            None if is_http(reference) => self.load_remote(reference, referer).await,
            None => Err(LoadError::Unsupported(reference.to_string())),
        };
        match outcome {
            Ok(page) => {
                info!(
                    target = "lister.extract",
                    source = %reference,
                    bytes = page.html.len(),
                    partial = page.navigation_failed(),
                    "page_loaded"
                );
                page
            }
            Err(err) => {
                warn!(target = "lister.extract", source = %reference, error = %err, "page_load_failed");
                LoadedPage {
                    source: reference.to_string(),
                    location: Url::parse(reference).ok(),
                    html: String::new(),
                    navigation_error: Some(err.to_string()),
                }
            }
        }
    }

    async fn load_remote(
        &self,
        reference: &str,
        referer: Option<&str>,
    ) -> Result<LoadedPage, LoadError> {
        let response = self
            .http
            .get(reference)
            .headers(referer_header(referer))
            .send()
            .await
            .map_err(|err| LoadError::Navigation(err.to_string()))?;

        let status = response.status();
        let location = Some(response.url().clone());
        // Error pages and truncated bodies still carry usable markup.
        let (html, body_error) = match response.bytes().await {
            Ok(bytes) => (String::from_utf8_lossy(&bytes).into_owned(), None),
            Err(err) => (String::new(), Some(err.to_string())),
        };
        let navigation_error = if !status.is_success() {
            Some(format!("HTTP {status}"))
        } else {
            body_error
        };

        Ok(LoadedPage {
            source: reference.to_string(),
            location,
            html,
            navigation_error,
        })
    }
}

async fn load_local(reference: &str, path: &Path) -> Result<LoadedPage, LoadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| LoadError::Io(format!("{}: {err}", path.display())))?;
    let location = Url::from_file_path(path)
        .ok()
        .or_else(|| Url::parse(reference).ok());
    Ok(LoadedPage {
        source: reference.to_string(),
        location,
        html: String::from_utf8_lossy(&bytes).into_owned(),
        navigation_error: None,
    })
}

fn is_http(reference: &str) -> bool {
    let lowered = reference.to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Filesystem path for a `file:` URI or a plain path that exists on disk.
pub fn local_path(reference: &str) -> Option<PathBuf> {
    if reference.starts_with("file:") {
        if let Ok(url) = Url::parse(reference)
            && let Ok(path) = url.to_file_path()
            && path.exists()
        {
            return Some(path);
        }
        let decoded = urlencoding::decode(reference).ok()?;
        let stripped = decoded
            .trim_start_matches("file://")
            .trim_start_matches("file:");
        let candidate = PathBuf::from(stripped);
        return candidate.exists().then_some(candidate);
    }
    if is_http(reference) {
        return None;
    }
    let candidate = PathBuf::from(reference);
    candidate.exists().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn loads_local_file_by_path_and_uri() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("saved page.html");
        let mut file = std::fs::File::create(&file_path).unwrap();
        write!(file, "<html><h1>저장된 상품</h1></html>").unwrap();

        let loader = PageLoader::new();
        let by_path = loader.load(file_path.to_str().unwrap(), None).await;
        assert!(by_path.html.contains("저장된 상품"));
        assert!(by_path.is_local());

        let uri = Url::from_file_path(&file_path).unwrap().to_string();
        assert!(uri.contains("%20"));
        let by_uri = loader.load(&uri, None).await;
        assert!(!by_uri.navigation_failed());
        assert!(by_uri.html.contains("저장된 상품"));
    }

    #[tokio::test]
    async fn missing_local_file_is_a_navigation_failure() {
        let page = PageLoader::new()
            .load("file:///definitely/not/here.html", None)
            .await;
        assert!(page.navigation_failed());
        assert!(page.html.is_empty());
    }

    #[tokio::test]
    async fn error_status_keeps_partial_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vp/products/1"))
            .and(header("referer", "https://www.coupang.com/"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string("<title>blocked</title><h1>부분</h1>"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/vp/products/1", server.uri());
        let page = PageLoader::new()
            .load(&url, Some("https://www.coupang.com/"))
            .await;
        assert!(page.navigation_failed());
        assert!(page.html.contains("부분"));
    }
}
