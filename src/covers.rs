use std::path::{Path, PathBuf};

use tracing::warn;

/// Below this size (bytes) an existing cover is considered low-quality and
/// eligible for replacement by the OpenLibrary adapter only.
pub const LOW_QUALITY_THRESHOLD_BYTES: u64 = 50_000;

/// Below this width or height (pixels) a decodable cover is also considered
/// low-quality, independent of its file size.
pub const LOW_QUALITY_MIN_DIMENSION: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("cover download failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("I/O error writing cover: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads `url` and writes it to `<covers_dir>/<book_id>.<ext>`, where
/// `ext` is taken from the URL's path segment (defaulting to `jpg`).
/// Returns the path relative to `covers_dir`'s parent, suitable for
/// persisting as `BookRow::cover_path`.
pub async fn download(
    http: &reqwest::Client,
    covers_dir: &Path,
    book_id: i64,
    url: &str,
) -> Result<PathBuf, CoverError> {
    let response = http.get(url).send().await?;
    let bytes = response.bytes().await?;
    let ext = extension_from_url(url);
    let file_name = format!("{book_id}.{ext}");

    tokio::fs::create_dir_all(covers_dir).await?;
    let path = covers_dir.join(&file_name);
    tokio::fs::write(&path, &bytes).await?;

    Ok(PathBuf::from("covers").join(file_name))
}

/// Whether an on-disk cover qualifies for the OpenLibrary-only low-quality
/// replacement exception. Missing files are not eligible — there is nothing
/// to "replace" through this path (an absent cover is handled by the
/// ordinary no-cover case). A cover is low-quality if it is small on disk,
/// or if it decodes to pixel dimensions under `LOW_QUALITY_MIN_DIMENSION`
/// on either axis; a cover that fails to decode at all is judged on size
/// alone.
pub async fn is_low_quality(data_dir: &Path, cover_path: &str) -> bool {
    let full_path = data_dir.join(cover_path);
    let size = match tokio::fs::metadata(&full_path).await {
        Ok(meta) => meta.len(),
        Err(err) => {
            warn!(?err, path = %full_path.display(), "could not stat existing cover; treating as not low-quality");
            return false;
        }
    };
    if size < LOW_QUALITY_THRESHOLD_BYTES {
        return true;
    }

    match probe_dimensions(&full_path).await {
        Some((width, height)) => {
            width < LOW_QUALITY_MIN_DIMENSION || height < LOW_QUALITY_MIN_DIMENSION
        }
        None => false,
    }
}

/// Probes an image file's pixel dimensions without fully decoding it.
/// Returns `None` for unreadable or undecodable files.
async fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    })
    .await
    .ok()
    .flatten()
}

/// Writes extractor-supplied cover bytes to `<covers_dir>/<book_id>.<ext>`,
/// returning the path to persist as `BookRow::cover_path`.
pub async fn persist_bytes(
    covers_dir: &Path,
    book_id: i64,
    bytes: &[u8],
    ext: &str,
) -> Result<PathBuf, CoverError> {
    tokio::fs::create_dir_all(covers_dir).await?;
    let file_name = format!("{book_id}.{ext}");
    let path = covers_dir.join(&file_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(PathBuf::from("covers").join(file_name))
}

fn extension_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit('.').next())
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_url_common_case() {
        assert_eq!(extension_from_url("https://covers.openlibrary.org/b/id/1-L.jpg"), "jpg");
    }

    #[test]
    fn test_extension_from_url_with_query_string_falls_back() {
        assert_eq!(extension_from_url("https://example.com/cover?id=5"), "jpg");
    }

    #[tokio::test]
    async fn test_is_low_quality_missing_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_low_quality(dir.path(), "covers/999.jpg").await);
    }

    #[tokio::test]
    async fn test_is_low_quality_small_file_is_true() {
        let dir = tempfile::tempdir().unwrap();
        let covers = dir.path().join("covers");
        tokio::fs::create_dir_all(&covers).await.unwrap();
        tokio::fs::write(covers.join("1.jpg"), vec![0u8; 100]).await.unwrap();
        assert!(is_low_quality(dir.path(), "covers/1.jpg").await);
    }

    #[tokio::test]
    async fn test_is_low_quality_large_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let covers = dir.path().join("covers");
        tokio::fs::create_dir_all(&covers).await.unwrap();
        tokio::fs::write(covers.join("1.jpg"), vec![0u8; 100_000]).await.unwrap();
        assert!(!is_low_quality(dir.path(), "covers/1.jpg").await);
    }
}
