use crate::llm::InlineImage;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Loads the image at `path`, shrinks it to fit `max_dimension` and returns
/// it JPEG-encoded for inline upload. Unreadable images yield `None`.
pub async fn representative_image(path: &Path, max_dimension: u32) -> Option<InlineImage> {
    let owned: PathBuf = path.to_path_buf();
    let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&owned, max_dimension)).await;
    match encoded {
        Ok(Ok(image)) => Some(image),
        Ok(Err(err)) => {
            warn!(target = "lister.llm", path = %path.display(), error = %err, "image_encode_failed");
            None
        }
        Err(err) => {
            warn!(target = "lister.llm", error = %err, "image_encode_task_failed");
            None
        }
    }
}

fn encode_jpeg(path: &Path, max_dimension: u32) -> Result<InlineImage, image::ImageError> {
    let mut img = image::open(path)?;
    if img.width() > max_dimension || img.height() > max_dimension {
        img = img.thumbnail(max_dimension, max_dimension);
    }
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(InlineImage {
        mime_type: "image/jpeg".into(),
        data: STANDARD.encode(buffer.into_inner()),
    })
}
