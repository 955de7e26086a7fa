use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::WatermarkStore;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkFile {
    last_scrape_timestamp: String,
}

/// Watermark kept as `{"lastScrapeTimestamp": "<RFC 3339>"}`.
///
/// A missing file means no watermark. A file that exists but cannot be read
/// is an error, never silently treated as missing. Saves go through a temp
/// file in the same directory and an atomic rename.
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_blocking(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let file: WatermarkFile = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed watermark file {}", path.display()))?;
    let ts = DateTime::parse_from_rfc3339(&file.last_scrape_timestamp)
        .with_context(|| format!("Bad timestamp in {}", path.display()))?;
    Ok(Some(ts.with_timezone(&Utc)))
}

fn save_blocking(path: &Path, timestamp: DateTime<Utc>) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            dir.to_path_buf()
        }
        None => PathBuf::from("."),
    };
    let body = serde_json::to_vec(&WatermarkFile {
        last_scrape_timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_blocking(&path))
            .await
            .context("Watermark reader task failed")?
    }

    async fn save(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_blocking(&path, timestamp))
            .await
            .context("Watermark writer task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn missing_file_is_no_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("lastScrapeTimestamp.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_value_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("state/lastScrapeTimestamp.json"));
        let ts = Utc.with_ymd_and_hms(2025, 6, 15, 10, 30, 0).unwrap();

        store.save(ts).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(ts));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            r#"{"lastScrapeTimestamp":"2025-06-15T10:30:00.000Z"}"#
        );
    }

    #[tokio::test]
    async fn existing_file_from_other_writers_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastScrapeTimestamp.json");
        fs::write(&path, r#"{ "lastScrapeTimestamp": "2025-03-03T10:15:00+08:00" }"#).unwrap();

        let loaded = FileWatermarkStore::new(path).load().await.unwrap();
        assert_eq!(loaded, Some(Utc.with_ymd_and_hms(2025, 3, 3, 2, 15, 0).unwrap()));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastScrapeTimestamp.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileWatermarkStore::new(&path).load().await.is_err());

        fs::write(&path, r#"{"lastScrapeTimestamp":"yesterday"}"#).unwrap();
        assert!(FileWatermarkStore::new(&path).load().await.is_err());
    }
}
