// Test mocks for the harvest pipeline.
//
// One mock per trait boundary:
// - MockSession (RenderSession) and MockLauncher (SessionLauncher): a scripted
//   feed whose units mount and unmount as the window scrolls
// - MemoryRecordStore (RecordStore): Vec-backed, can refuse appends
// - MemoryWatermarkStore (WatermarkStore): records every save
// - MemoryEvidenceStore (EvidenceStore): keeps references only

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use harvest_common::{HarvestedPost, Rect, Viewport};

use crate::traits::{EvidenceStore, RecordStore, RenderSession, SessionLauncher, WatermarkStore};

/// Bytes returned for every successful mock screenshot.
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nmock";

// ---------------------------------------------------------------------------
// MockUnit
// ---------------------------------------------------------------------------

/// One post unit in a scripted feed.
///
/// `appears_at` and `unmounts_at` are counted in scroll steps since the last
/// navigation, so a unit can come into view late or be recycled by the feed
/// before evidence capture gets to it.
#[derive(Debug, Clone)]
pub struct MockUnit {
    pub text: String,
    pub date_title: Option<String>,
    pub date_text: Option<String>,
    pub link: Option<String>,
    pub rect: Rect,
    pub appears_at: u32,
    pub unmounts_at: Option<u32>,
}

impl MockUnit {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            date_title: None,
            date_text: None,
            link: None,
            rect: Rect::new(0.0, 100.0, 600.0, 300.0),
            appears_at: 0,
            unmounts_at: None,
        }
    }

    pub fn with_date_title(mut self, title: &str) -> Self {
        self.date_title = Some(title.to_string());
        self
    }

    pub fn with_date_text(mut self, text: &str) -> Self {
        self.date_text = Some(text.to_string());
        self
    }

    pub fn with_link(mut self, href: &str) -> Self {
        self.link = Some(href.to_string());
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn appears_after_scrolls(mut self, scrolls: u32) -> Self {
        self.appears_at = scrolls;
        self
    }

    pub fn unmounts_after_scrolls(mut self, scrolls: u32) -> Self {
        self.unmounts_at = Some(scrolls);
        self
    }

    fn mounted(&self, scrolls: u32) -> bool {
        self.appears_at <= scrolls && self.unmounts_at.map_or(true, |gone| scrolls < gone)
    }
}

// ---------------------------------------------------------------------------
// SessionProbe: what a session did, readable after it is consumed
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SessionProbe {
    launches: AtomicUsize,
    closes: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    clips: Mutex<Vec<Rect>>,
}

impl SessionProbe {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn captured_clips(&self) -> Vec<Rect> {
        self.clips.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

/// Scripted page. Units are addressed by index into the script.
pub struct MockSession {
    units: Vec<MockUnit>,
    viewport: Viewport,
    scrolls: AtomicU32,
    nav_calls: AtomicUsize,
    failing_navigations: HashSet<usize>,
    fail_captures: AtomicBool,
    fail_close: bool,
    probe: Arc<SessionProbe>,
}

impl MockSession {
    pub fn new(units: Vec<MockUnit>) -> Self {
        Self {
            units,
            viewport: Viewport {
                width: 1280.0,
                height: 720.0,
            },
            scrolls: AtomicU32::new(0),
            nav_calls: AtomicUsize::new(0),
            failing_navigations: HashSet::new(),
            fail_captures: AtomicBool::new(false),
            fail_close: false,
            probe: Arc::new(SessionProbe::default()),
        }
    }

    /// Make every subsequent `capture` call fail.
    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    pub fn scroll_count(&self) -> u32 {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn captured_clips(&self) -> Vec<Rect> {
        self.probe.captured_clips()
    }

    fn unit(&self, index: &usize) -> Result<&MockUnit> {
        self.units
            .get(*index)
            .ok_or_else(|| anyhow!("MockSession: no unit at index {index}"))
    }
}

#[async_trait]
impl RenderSession for MockSession {
    type Unit = usize;

    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        let call = self.nav_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.navigations.lock().unwrap().push(url.to_string());
        if self.failing_navigations.contains(&call) {
            bail!("MockSession: navigation {call} to {url} timed out");
        }
        self.scrolls.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn query_units(&self, _marker: &str) -> Result<Vec<usize>> {
        let scrolls = self.scroll_count();
        Ok(self
            .units
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.mounted(scrolls))
            .map(|(i, _)| i)
            .collect())
    }

    async fn inner_text(&self, unit: &usize) -> Result<String> {
        Ok(self.unit(unit)?.text.clone())
    }

    async fn child_attribute(
        &self,
        unit: &usize,
        _selector: &str,
        attribute: &str,
    ) -> Result<Option<String>> {
        let unit = self.unit(unit)?;
        Ok(match attribute {
            "title" => unit.date_title.clone(),
            _ => None,
        })
    }

    async fn child_text(&self, unit: &usize, _selector: &str) -> Result<Option<String>> {
        Ok(self.unit(unit)?.date_text.clone())
    }

    async fn link_matching(&self, unit: &usize, patterns: &[String]) -> Result<Option<String>> {
        Ok(self
            .unit(unit)?
            .link
            .clone()
            .filter(|href| patterns.iter().any(|p| href.contains(p.as_str()))))
    }

    async fn bounding_rect(&self, unit: &usize) -> Result<Rect> {
        Ok(self.unit(unit)?.rect)
    }

    async fn scroll_into_view(&self, unit: &usize) -> Result<()> {
        self.unit(unit).map(|_| ())
    }

    async fn scroll_viewport(&self) -> Result<()> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn viewport(&self) -> Result<Viewport> {
        Ok(self.viewport)
    }

    async fn capture(&self, clip: Rect) -> Result<Vec<u8>> {
        if self.fail_captures.load(Ordering::SeqCst) {
            bail!("MockSession: screenshot failed");
        }
        self.probe.clips.lock().unwrap().push(clip);
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("MockSession: browser refused to close");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockLauncher
// ---------------------------------------------------------------------------

/// Hands out a fresh [`MockSession`] over the same script on every launch.
pub struct MockLauncher {
    units: Vec<MockUnit>,
    failing_navigations: HashSet<usize>,
    fail_launch: bool,
    fail_captures: bool,
    fail_close: bool,
    probe: Arc<SessionProbe>,
}

impl MockLauncher {
    pub fn new(units: Vec<MockUnit>) -> Self {
        Self {
            units,
            failing_navigations: HashSet::new(),
            fail_launch: false,
            fail_captures: false,
            fail_close: false,
            probe: Arc::new(SessionProbe::default()),
        }
    }

    /// Fail the `call`th navigation (1-based) of each session.
    pub fn failing_navigation(mut self, call: usize) -> Self {
        self.failing_navigations.insert(call);
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn failing_captures(mut self) -> Self {
        self.fail_captures = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn probe(&self) -> Arc<SessionProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    type Session = MockSession;

    async fn launch(&self) -> Result<MockSession> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            bail!("MockLauncher: browser failed to start");
        }
        let session = MockSession {
            failing_navigations: self.failing_navigations.clone(),
            fail_close: self.fail_close,
            probe: self.probe.clone(),
            ..MockSession::new(self.units.clone())
        };
        session.fail_captures(self.fail_captures);
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<HarvestedPost>>,
    appends: AtomicUsize,
    fail_appends: AtomicBool,
    fail_first_appends: AtomicUsize,
    fail_loads: bool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<HarvestedPost>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make every `append` fail without writing anything.
    pub fn failing_appends(self) -> Self {
        self.fail_appends.store(true, Ordering::SeqCst);
        self
    }

    /// Make only the next `n` appends fail.
    pub fn failing_first_appends(self, n: usize) -> Self {
        self.fail_first_appends.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_loads(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<HarvestedPost> {
        self.records.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.text).collect()
    }

    /// Number of `append` calls, successful or not.
    pub fn append_calls(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_texts(&self) -> Result<HashSet<String>> {
        if self.fail_loads {
            bail!("MemoryRecordStore: records unreadable");
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }

    async fn append(&self, posts: &[HarvestedPost]) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .fail_first_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted || self.fail_appends.load(Ordering::SeqCst) {
            bail!("MemoryRecordStore: disk full");
        }
        self.records.lock().unwrap().extend_from_slice(posts);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryWatermarkStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<DateTime<Utc>>>,
    saves: Mutex<Vec<DateTime<Utc>>>,
    fail_saves: bool,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Mutex::new(Some(timestamp)),
            ..Self::default()
        }
    }

    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn value(&self) -> Option<DateTime<Utc>> {
        *self.value.lock().unwrap()
    }

    /// Every timestamp passed to `save`, in order.
    pub fn saves(&self) -> Vec<DateTime<Utc>> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.value())
    }

    async fn save(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.saves.lock().unwrap().push(timestamp);
        if self.fail_saves {
            bail!("MemoryWatermarkStore: read-only");
        }
        *self.value.lock().unwrap() = Some(timestamp);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEvidenceStore {
    references: Mutex<Vec<String>>,
    fail: bool,
}

impl MemoryEvidenceStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.references.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn references(&self) -> Vec<String> {
        self.references.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn put(
        &self,
        _posted_at: DateTime<Utc>,
        captured_at: DateTime<Utc>,
        index: usize,
        _png: &[u8],
    ) -> Result<String> {
        if self.fail {
            bail!("MemoryEvidenceStore: write refused");
        }
        let reference = format!("mem://post_{}_{index}.png", captured_at.timestamp_millis());
        self.references.lock().unwrap().push(reference.clone());
        Ok(reference)
    }
}
