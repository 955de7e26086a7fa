// Evidence capture: a screenshot of one accepted post, clipped to what is
// actually on screen. Failure never propagates; it yields an empty reference.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use harvest_common::{
    text_prefix, AcceptedPost, DelayRange, HarvestError, PageLayout, Rect, Viewport,
};

use crate::traits::{EvidenceStore, RenderSession};
use crate::util::pause;

/// Intersection of `rect` with the viewport. `None` when nothing is visible.
pub fn clamp_to_viewport(rect: Rect, viewport: Viewport) -> Option<Rect> {
    let finite = [rect.x, rect.y, rect.width, rect.height, viewport.width, viewport.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return None;
    }

    let left = rect.x.max(0.0);
    let top = rect.y.max(0.0);
    let right = (rect.x + rect.width).min(viewport.width);
    let bottom = (rect.y + rect.height).min(viewport.height);

    let clipped = Rect::new(left, top, right - left, bottom - top);
    (!clipped.is_empty()).then_some(clipped)
}

pub struct EvidenceCapture<'a, S: RenderSession> {
    session: &'a S,
    layout: &'a PageLayout,
    store: &'a dyn EvidenceStore,
    settle_delay: DelayRange,
}

impl<'a, S: RenderSession> EvidenceCapture<'a, S> {
    pub fn new(
        session: &'a S,
        layout: &'a PageLayout,
        store: &'a dyn EvidenceStore,
        settle_delay: DelayRange,
    ) -> Self {
        Self {
            session,
            layout,
            store,
            settle_delay,
        }
    }

    /// Screenshot `post` and store it. Returns the evidence reference, or an
    /// empty string when any step fails.
    pub async fn capture(&self, post: &AcceptedPost, index: usize, now: DateTime<Utc>) -> String {
        match self.try_capture(post, index, now).await {
            Ok(reference) => {
                debug!(reference = reference.as_str(), "Evidence captured");
                reference
            }
            Err(e) => {
                warn!(
                    keyword = post.keyword.as_str(),
                    text = text_prefix(&post.text, 40),
                    error = %format!("{e:#}"),
                    "Evidence capture failed"
                );
                String::new()
            }
        }
    }

    async fn try_capture(
        &self,
        post: &AcceptedPost,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let unit = self
            .locate(&post.text)
            .await?
            .ok_or_else(|| HarvestError::Capture("post is no longer on the page".to_string()))?;
        self.session
            .scroll_into_view(&unit)
            .await
            .context("scroll into view failed")?;
        pause(self.settle_delay).await;

        // The handle may be stale after scrolling; measure a fresh one.
        let unit = self
            .locate(&post.text)
            .await?
            .ok_or_else(|| HarvestError::Capture("post disappeared after scrolling".to_string()))?;
        let rect = self.session.bounding_rect(&unit).await.context("measure failed")?;
        let viewport = self.session.viewport().await.context("viewport read failed")?;
        let clip = clamp_to_viewport(rect, viewport)
            .ok_or_else(|| HarvestError::Capture(format!("post is outside the viewport ({rect:?})")))?;

        let png = self.session.capture(clip).await.context("screenshot failed")?;
        self.store
            .put(post.captured_at_date, now, index, &png)
            .await
            .context("evidence write failed")
    }

    /// First post unit whose text contains `text`.
    async fn locate(&self, text: &str) -> Result<Option<S::Unit>> {
        let units = self
            .session
            .query_units(&self.layout.post_marker)
            .await
            .context("re-locate query failed")?;
        for unit in units {
            match self.session.inner_text(&unit).await {
                Ok(rendered) if rendered.contains(text) => return Ok(Some(unit)),
                _ => continue,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryEvidenceStore, MockSession, MockUnit};
    use chrono::{Duration, TimeZone};

    const VIEWPORT: Viewport = Viewport {
        width: 1280.0,
        height: 720.0,
    };

    fn post(text: &str) -> AcceptedPost {
        AcceptedPost {
            text: text.to_string(),
            captured_at_date: Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
            url: String::new(),
            keyword: "registrar".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    // --- clamp_to_viewport ---

    #[test]
    fn left_overhang_is_clipped() {
        assert_eq!(
            clamp_to_viewport(Rect::new(-50.0, 10.0, 300.0, 200.0), VIEWPORT),
            Some(Rect::new(0.0, 10.0, 250.0, 200.0))
        );
    }

    #[test]
    fn right_and_bottom_overhang_are_clipped() {
        assert_eq!(
            clamp_to_viewport(Rect::new(1200.0, 600.0, 300.0, 400.0), VIEWPORT),
            Some(Rect::new(1200.0, 600.0, 80.0, 120.0))
        );
    }

    #[test]
    fn fully_visible_rect_is_unchanged() {
        let rect = Rect::new(100.0, 50.0, 500.0, 300.0);
        assert_eq!(clamp_to_viewport(rect, VIEWPORT), Some(rect));
    }

    #[test]
    fn rect_outside_viewport_has_no_clip() {
        assert_eq!(clamp_to_viewport(Rect::new(0.0, 900.0, 500.0, 100.0), VIEWPORT), None);
        assert_eq!(clamp_to_viewport(Rect::new(-400.0, 0.0, 300.0, 100.0), VIEWPORT), None);
        assert_eq!(clamp_to_viewport(Rect::new(f64::NAN, 0.0, 300.0, 100.0), VIEWPORT), None);
    }

    // --- capture ---

    #[tokio::test]
    async fn captures_clamped_region_and_returns_reference() {
        let session = MockSession::new(vec![
            MockUnit::new("Registrar deadline extended").with_rect(Rect::new(-50.0, 10.0, 300.0, 200.0)),
        ]);
        let store = MemoryEvidenceStore::default();
        let layout = PageLayout::default();
        let capture = EvidenceCapture::new(&session, &layout, &store, DelayRange::ZERO);

        let reference = capture.capture(&post("Registrar deadline extended"), 3, now()).await;

        assert_eq!(reference, format!("mem://post_{}_3.png", now().timestamp_millis()));
        assert_eq!(session.captured_clips(), vec![Rect::new(0.0, 10.0, 250.0, 200.0)]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn vanished_post_yields_empty_reference() {
        let session = MockSession::new(vec![MockUnit::new("Something else entirely")]);
        let store = MemoryEvidenceStore::default();
        let layout = PageLayout::default();
        let capture = EvidenceCapture::new(&session, &layout, &store, DelayRange::ZERO);

        let reference = capture.capture(&post("Registrar deadline extended"), 0, now()).await;

        assert_eq!(reference, "");
        assert!(session.captured_clips().is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn off_screen_post_yields_empty_reference() {
        let session = MockSession::new(vec![
            MockUnit::new("Registrar deadline extended").with_rect(Rect::new(0.0, 2000.0, 500.0, 100.0)),
        ]);
        let store = MemoryEvidenceStore::default();
        let layout = PageLayout::default();
        let capture = EvidenceCapture::new(&session, &layout, &store, DelayRange::ZERO);

        assert_eq!(capture.capture(&post("Registrar deadline extended"), 0, now()).await, "");
        assert!(session.captured_clips().is_empty());
    }

    #[tokio::test]
    async fn screenshot_or_store_failure_yields_empty_reference() {
        let session = MockSession::new(vec![MockUnit::new("Registrar deadline extended")]);
        session.fail_captures(true);
        let store = MemoryEvidenceStore::default();
        let layout = PageLayout::default();
        let capture = EvidenceCapture::new(&session, &layout, &store, DelayRange::ZERO);
        assert_eq!(capture.capture(&post("Registrar deadline extended"), 0, now()).await, "");

        let session = MockSession::new(vec![MockUnit::new("Registrar deadline extended")]);
        let store = MemoryEvidenceStore::failing();
        let capture = EvidenceCapture::new(&session, &layout, &store, DelayRange::ZERO);
        assert_eq!(
            capture
                .capture(&post("Registrar deadline extended"), 0, now() + Duration::seconds(1))
                .await,
            ""
        );
    }
}
