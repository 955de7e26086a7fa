use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use harvest_common::HarvestedPost;

use crate::traits::RecordStore;

/// Column layout of the results file.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Text")]
    text: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "ScreenshotFilename")]
    screenshot: String,
    #[serde(rename = "Keyword")]
    keyword: String,
    #[serde(rename = "CapturedDate")]
    captured_date: String,
}

impl From<&HarvestedPost> for CsvRow {
    fn from(post: &HarvestedPost) -> Self {
        Self {
            text: post.text.clone(),
            date: timestamp(post.captured_at_date),
            url: post.url.clone(),
            screenshot: post.evidence_ref.clone(),
            keyword: post.keyword.clone(),
            captured_date: timestamp(post.captured_date),
        }
    }
}

impl TryFrom<CsvRow> for HarvestedPost {
    type Error = anyhow::Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        Ok(Self {
            text: row.text,
            captured_at_date: parse_timestamp(&row.date)?,
            url: row.url,
            keyword: row.keyword,
            evidence_ref: row.screenshot,
            captured_date: parse_timestamp(&row.captured_date)?,
        })
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

/// Append-only CSV file with a header row.
///
/// Each batch is encoded in memory and written with a single append followed
/// by an fsync. A failed write is truncated back to the previous length so the
/// file never holds half a batch.
pub struct CsvRecordStore {
    path: PathBuf,
}

impl CsvRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, in write order.
    pub fn read_records(&self) -> Result<Vec<HarvestedPost>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        reader
            .deserialize::<CsvRow>()
            .map(|row| HarvestedPost::try_from(row?))
            .collect()
    }
}

fn encode(posts: &[HarvestedPost], with_header: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for post in posts {
        writer.serialize(CsvRow::from(post))?;
    }
    writer.into_inner().context("Failed to flush CSV buffer")
}

fn append_blocking(path: &Path, posts: &[HarvestedPost]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let start = file.metadata()?.len();
    let bytes = encode(posts, start == 0)?;

    if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
        if let Err(truncate_err) = file.set_len(start) {
            warn!(
                path = %path.display(),
                error = %truncate_err,
                "Failed to roll back partial CSV write"
            );
        }
        return Err(e).with_context(|| format!("Failed to append to {}", path.display()));
    }
    debug!(path = %path.display(), rows = posts.len(), bytes = bytes.len(), "CSV batch appended");
    Ok(())
}

fn load_texts_blocking(path: &Path) -> Result<HashSet<String>> {
    let mut texts = HashSet::new();
    if !path.exists() {
        return Ok(texts);
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        if let Some(text) = record.get(0).map(str::trim).filter(|t| !t.is_empty()) {
            texts.insert(text.to_string());
        }
    }
    Ok(texts)
}

#[async_trait]
impl RecordStore for CsvRecordStore {
    async fn load_texts(&self) -> Result<HashSet<String>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_texts_blocking(&path))
            .await
            .context("CSV reader task failed")?
    }

    async fn append(&self, posts: &[HarvestedPost]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let path = self.path.clone();
        let posts = posts.to_vec();
        tokio::task::spawn_blocking(move || append_blocking(&path, &posts))
            .await
            .context("CSV writer task failed")?
    }
}
