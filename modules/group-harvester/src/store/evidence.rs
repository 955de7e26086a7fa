use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::traits::EvidenceStore;

/// PNG files laid out as `<root>/<post day>/post_<capture millis>_<index>.png`.
/// The reference handed back is the absolute file path.
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_path(&self, posted_at: DateTime<Utc>, captured_at: DateTime<Utc>, index: usize) -> PathBuf {
        self.root
            .join(posted_at.format("%Y-%m-%d").to_string())
            .join(format!("post_{}_{index}.png", captured_at.timestamp_millis()))
    }
}

fn write_blocking(path: &Path, png: &[u8]) -> Result<String> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    let absolute = fs::canonicalize(path)?;
    Ok(absolute.display().to_string())
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn put(
        &self,
        posted_at: DateTime<Utc>,
        captured_at: DateTime<Utc>,
        index: usize,
        png: &[u8],
    ) -> Result<String> {
        let path = self.file_path(posted_at, captured_at, index);
        let png = png.to_vec();
        tokio::task::spawn_blocking(move || write_blocking(&path, &png))
            .await
            .context("Evidence writer task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn files_are_grouped_by_post_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEvidenceStore::new(dir.path().join("screenshots"));
        let posted = Utc.with_ymd_and_hms(2025, 6, 14, 23, 0, 0).unwrap();
        let captured = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();

        let reference = store.put(posted, captured, 2, b"png").await.unwrap();

        let expected = dir
            .path()
            .join("screenshots/2025-06-14")
            .join(format!("post_{}_2.png", captured.timestamp_millis()));
        assert_eq!(PathBuf::from(&reference), fs::canonicalize(&expected).unwrap());
        assert_eq!(fs::read(expected).unwrap(), b"png");
    }
}
