use crate::extract::loader::local_path;
use crate::http::{build_browser_client, referer_header};
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const FORBIDDEN_TITLE_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
const SAFE_TITLE_CHARS: usize = 30;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("copy failed: {0}")]
    Copy(String),
    #[error("local file reference from a remote page")]
    LocalRefused,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("write failed: {0}")]
    Write(String),
}

/// Outcome of materializing one item's gallery.
#[derive(Debug, Default, Clone)]
pub struct FetchSummary {
    pub saved: Vec<PathBuf>,
    pub failed: usize,
}

pub struct AssetFetcher {
    http: Client,
}

impl Default for AssetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetFetcher {
    pub fn new() -> Self {
        Self {
            http: build_browser_client(),
        }
    }

    /// Saves every image as `<n>.<ext>` under `dir`. A failed image is logged
    /// and skipped; the rest still download. Local files are copied only when
    /// `allow_local` is set, i.e. the page itself was loaded from disk.
    pub async fn fetch_all(
        &self,
        images: &[String],
        dir: &Path,
        referer: Option<&str>,
        allow_local: bool,
    ) -> FetchSummary {
        let mut summary = FetchSummary::default();
        for (index, reference) in images.iter().enumerate() {
            let target = dir.join(format!("{}.{}", index + 1, asset_extension(reference)));
            match self.fetch_one(reference, &target, referer, allow_local).await {
                Ok(()) => {
                    debug!(target = "lister.assets", path = %target.display(), "image_saved");
                    summary.saved.push(target);
                }
                Err(err) => {
                    warn!(target = "lister.assets", image = %reference, error = %err, "image_fetch_failed");
                    let _ = tokio::fs::remove_file(&target).await;
                    summary.failed += 1;
                }
            }
        }
        info!(
            target = "lister.assets",
            dir = %dir.display(),
            saved = summary.saved.len(),
            failed = summary.failed,
            "assets_fetched"
        );
        summary
    }

    async fn fetch_one(
        &self,
        reference: &str,
        target: &Path,
        referer: Option<&str>,
        allow_local: bool,
    ) -> Result<(), FetchError> {
        if let Some(path) = local_path(reference) {
            if !allow_local {
                return Err(FetchError::LocalRefused);
            }
            tokio::fs::copy(&path, target)
                .await
                .map_err(|err| FetchError::Copy(format!("{}: {err}", path.display())))?;
            return Ok(());
        }

        let mut response = self
            .http
            .get(reference)
            .headers(referer_header(referer))
            .send()
            .await
            .map_err(|err| FetchError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|err| FetchError::Write(err.to_string()))?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| FetchError::Request(err.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| FetchError::Write(err.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|err| FetchError::Write(err.to_string()))?;
        Ok(())
    }
}

/// Lowercased extension of the reference's path, or `jpg` when it is not a
/// known image type.
pub fn asset_extension(reference: &str) -> String {
    let path = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string())
}

pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !FORBIDDEN_TITLE_CHARS.contains(c))
        .take(SAFE_TITLE_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Creates `<images_dir>/<safe_title>_<unix_ts>` for one item.
pub async fn create_working_dir(
    images_dir: &Path,
    title: &str,
    unix_ts: i64,
) -> std::io::Result<PathBuf> {
    let dir = images_dir.join(format!("{}_{unix_ts}", safe_title(title)));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
