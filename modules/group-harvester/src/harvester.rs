use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use harvest_common::{Config, DelayRange, HarvestError, HarvestedPost, PageLayout};

use crate::dedup::DedupIndex;
use crate::evidence::EvidenceCapture;
use crate::extractor::{CandidateExtractor, KeywordMatcher};
use crate::filter::HarvestFilter;
use crate::stats::RunReport;
use crate::traits::{EvidenceStore, RecordStore, RenderSession, SessionLauncher, WatermarkStore};

/// What a run harvests and how it paces itself.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub group_url: String,
    pub keywords: Vec<String>,
    pub keyword_variants: bool,
    pub layout: PageLayout,
    pub nav_timeout: Duration,
    pub max_scroll_passes: u32,
    pub max_age: Option<chrono::Duration>,
    pub scroll_delay: DelayRange,
    pub settle_delay: DelayRange,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            group_url: config.group_url.clone(),
            keywords: config.keywords.clone(),
            keyword_variants: config.keyword_variants,
            layout: config.layout.clone(),
            nav_timeout: config.nav_timeout,
            max_scroll_passes: config.max_scroll_passes,
            max_age: config.max_age,
            scroll_delay: config.scroll_delay,
            settle_delay: config.settle_delay,
        }
    }
}

/// Drives one harvest run: for each keyword navigate, extract, filter,
/// capture evidence, persist, then advance the watermark.
pub struct Harvester {
    settings: HarvestSettings,
    records: Arc<dyn RecordStore>,
    watermarks: Arc<dyn WatermarkStore>,
    evidence: Arc<dyn EvidenceStore>,
}

/// State carried across the keyword batches of one run.
struct RunState {
    /// Watermark as loaded at run start. Every keyword filters against it.
    start_watermark: Option<DateTime<Utc>>,
    /// Newest timestamp durably saved so far.
    saved_watermark: Option<DateTime<Utc>>,
    index: DedupIndex,
    now: DateTime<Utc>,
    /// Run-wide counter keeping evidence names unique across keywords.
    evidence_seq: usize,
    report: RunReport,
}

impl Harvester {
    pub fn new(
        settings: HarvestSettings,
        records: Arc<dyn RecordStore>,
        watermarks: Arc<dyn WatermarkStore>,
        evidence: Arc<dyn EvidenceStore>,
    ) -> Self {
        Self {
            settings,
            records,
            watermarks,
            evidence,
        }
    }

    pub async fn run<L: SessionLauncher>(&self, launcher: &L) -> Result<RunReport> {
        self.run_at(launcher, Utc::now()).await
    }

    /// Run with a fixed reference time. Relative dates and capture stamps use `now`.
    ///
    /// Fails only when the run cannot start: unreadable records or watermark,
    /// or a session that will not open. Once a session is open it is always
    /// released, and per-keyword failures are reported instead of returned.
    pub async fn run_at<L: SessionLauncher>(
        &self,
        launcher: &L,
        now: DateTime<Utc>,
    ) -> Result<RunReport> {
        let texts = self
            .records
            .load_texts()
            .await
            .context("Failed to load persisted records")?;
        let index = DedupIndex::from_persisted(texts);
        let watermark = self
            .watermarks
            .load()
            .await
            .map_err(|e| HarvestError::Watermark(format!("{e:#}")))?;

        info!(
            known_texts = index.len(),
            watermark = ?watermark,
            keywords = self.settings.keywords.len(),
            "Starting harvest run"
        );

        let session = launcher
            .launch()
            .await
            .context("Failed to open browser session")?;

        let mut state = RunState {
            start_watermark: watermark,
            saved_watermark: watermark,
            report: RunReport::new(now, watermark, index.len()),
            index,
            now,
            evidence_seq: 0,
        };

        self.run_keywords(&session, &mut state).await;

        // Always release the session
        if let Err(e) = session.close().await {
            error!(error = %e, "Failed to close browser session");
            state.report.session_close_failed = true;
        }

        state.report.watermark_after = state.saved_watermark;
        info!(
            run_id = %state.report.run_id,
            persisted = state.report.persisted,
            outcome = ?state.report.outcome(),
            "Harvest run finished"
        );
        Ok(state.report)
    }

    async fn run_keywords<S: RenderSession>(&self, session: &S, state: &mut RunState) {
        for keyword in &self.settings.keywords {
            state.report.keywords_attempted += 1;
            if let Err(e) = self.harvest_keyword(session, keyword, state).await {
                error!(
                    keyword = keyword.as_str(),
                    error = %format!("{e:#}"),
                    "Keyword harvest failed, continuing"
                );
                state.report.keywords_failed.push(keyword.clone());
            }
        }
    }

    async fn harvest_keyword<S: RenderSession>(
        &self,
        session: &S,
        keyword: &str,
        state: &mut RunState,
    ) -> Result<()> {
        let settings = &self.settings;
        info!(keyword, url = settings.group_url.as_str(), "Harvesting keyword");

        session
            .navigate(&settings.group_url, settings.nav_timeout)
            .await
            .map_err(|e| HarvestError::Navigation(format!("{}: {e:#}", settings.group_url)))?;

        let extractor = CandidateExtractor::new(
            &settings.layout,
            KeywordMatcher::single(keyword, settings.keyword_variants),
            settings.max_scroll_passes,
            settings.scroll_delay,
        );
        let candidates = extractor
            .extract(session)
            .await
            .map_err(|e| HarvestError::Extraction(format!("{e:#}")))?;

        let outcome = HarvestFilter::new(settings.max_age).apply(
            &candidates,
            state.start_watermark,
            &state.index,
            state.now,
        );
        let report = &mut state.report;
        report.candidates_seen += candidates.len() as u32;
        report.accepted += outcome.accepted.len() as u32;
        report.rejected_stale += outcome.stale;
        report.rejected_too_old += outcome.too_old;
        report.rejected_duplicate += outcome.duplicate;
        report.rejected_blank += outcome.blank;
        report.undated += outcome.undated;

        if outcome.accepted.is_empty() {
            info!(keyword, candidates = candidates.len(), "No new posts");
            return Ok(());
        }

        let capture = EvidenceCapture::new(
            session,
            &settings.layout,
            self.evidence.as_ref(),
            settings.settle_delay,
        );
        let mut batch = Vec::with_capacity(outcome.accepted.len());
        for post in outcome.accepted {
            let evidence_ref = capture.capture(&post, state.evidence_seq, state.now).await;
            state.evidence_seq += 1;
            if evidence_ref.is_empty() {
                state.report.evidence_failures += 1;
            }
            batch.push(HarvestedPost::from_accepted(post, evidence_ref, state.now));
        }

        if let Err(e) = self.records.append(&batch).await {
            for post in batch.iter().filter(|p| p.has_evidence()) {
                warn!(
                    keyword,
                    evidence = post.evidence_ref.as_str(),
                    "Evidence left without a record"
                );
            }
            return Err(HarvestError::Persistence(format!("{} posts: {e:#}", batch.len())).into());
        }
        state.index.extend(batch.iter().map(|p| p.text.as_str()));
        state.report.persisted += batch.len() as u32;
        info!(keyword, persisted = batch.len(), "Batch persisted");

        self.advance_watermark(&batch, state).await;
        Ok(())
    }

    /// Save the batch's newest timestamp when it beats what is stored.
    async fn advance_watermark(&self, batch: &[HarvestedPost], state: &mut RunState) {
        let Some(newest) = batch.iter().map(|p| p.captured_at_date).max() else {
            return;
        };
        if state.saved_watermark.is_some_and(|saved| newest <= saved) {
            return;
        }
        match self.watermarks.save(newest).await {
            Ok(()) => {
                info!(watermark = %newest.to_rfc3339(), "Watermark advanced");
                state.saved_watermark = Some(newest);
            }
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    "Failed to save watermark, posts may be revisited next run"
                );
                state.report.watermark_save_failed = true;
            }
        }
    }
}
