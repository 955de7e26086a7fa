// Trait seams between the harvest pipeline and the outside world.
//
// RenderSession is the only way the core touches the rendered page.
// RecordStore, EvidenceStore and WatermarkStore are the durable side.
//
// All of them have in-memory implementations in `testing` so the whole
// pipeline runs under `cargo test` with no browser and no disk.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use harvest_common::{HarvestedPost, Rect, Viewport};

// ---------------------------------------------------------------------------
// RenderSession: the DOM capability surface
// ---------------------------------------------------------------------------

/// Narrow query/read/measure/scroll/capture interface over one rendered page.
/// Calls are made strictly one at a time.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Handle to one element on the page. May go stale when the page re-renders.
    type Unit: Send + Sync;

    /// Navigate and wait for the document to load.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Every element matching the structural post marker, in document order.
    async fn query_units(&self, marker: &str) -> Result<Vec<Self::Unit>>;

    /// Full rendered text of a unit.
    async fn inner_text(&self, unit: &Self::Unit) -> Result<String>;

    /// Attribute of the first descendant matching `selector`.
    async fn child_attribute(
        &self,
        unit: &Self::Unit,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>>;

    /// Rendered text of the first descendant matching `selector`.
    async fn child_text(&self, unit: &Self::Unit, selector: &str) -> Result<Option<String>>;

    /// Absolute URL of the first descendant link whose path contains any pattern.
    async fn link_matching(&self, unit: &Self::Unit, patterns: &[String])
        -> Result<Option<String>>;

    /// Current on-screen rectangle of a unit.
    async fn bounding_rect(&self, unit: &Self::Unit) -> Result<Rect>;

    async fn scroll_into_view(&self, unit: &Self::Unit) -> Result<()>;

    /// Scroll the window down by one viewport.
    async fn scroll_viewport(&self) -> Result<()>;

    async fn viewport(&self) -> Result<Viewport>;

    /// PNG of the given region. The region must lie inside the viewport.
    async fn capture(&self, clip: Rect) -> Result<Vec<u8>>;

    /// Release the session. Called exactly once per run.
    async fn close(self) -> Result<()>;
}

/// Produces an authenticated, navigable session.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: RenderSession;

    async fn launch(&self) -> Result<Self::Session>;
}

// ---------------------------------------------------------------------------
// Durable side
// ---------------------------------------------------------------------------

/// Append-only store of harvested records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Trimmed texts of every record ever persisted.
    async fn load_texts(&self) -> Result<HashSet<String>>;

    /// Persist the whole batch or nothing.
    async fn append(&self, posts: &[HarvestedPost]) -> Result<()>;
}

/// Where screenshot bytes go. Returns the evidence reference.
///
/// `posted_at` groups evidence by the post's day, `captured_at` and `index`
/// keep names unique within a run.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn put(
        &self,
        posted_at: DateTime<Utc>,
        captured_at: DateTime<Utc>,
        index: usize,
        png: &[u8],
    ) -> Result<String>;
}

/// Timestamp of the newest post any run has persisted.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self) -> Result<Option<DateTime<Utc>>>;

    async fn save(&self, timestamp: DateTime<Utc>) -> Result<()>;
}
