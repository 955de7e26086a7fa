use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// How a run ended. A run that could not start returns an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    /// Some keyword batch, the watermark save, or the session release failed.
    CompletedWithErrors,
}

/// Counters for one harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub keywords_attempted: u32,
    pub keywords_failed: Vec<String>,
    pub candidates_seen: u32,
    pub accepted: u32,
    pub rejected_stale: u32,
    pub rejected_too_old: u32,
    pub rejected_duplicate: u32,
    pub rejected_blank: u32,
    pub undated: u32,
    pub evidence_failures: u32,
    pub persisted: u32,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub watermark_save_failed: bool,
    pub known_texts: usize,
    pub session_close_failed: bool,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, watermark: Option<DateTime<Utc>>, known_texts: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            keywords_attempted: 0,
            keywords_failed: Vec::new(),
            candidates_seen: 0,
            accepted: 0,
            rejected_stale: 0,
            rejected_too_old: 0,
            rejected_duplicate: 0,
            rejected_blank: 0,
            undated: 0,
            evidence_failures: 0,
            persisted: 0,
            watermark_before: watermark,
            watermark_after: watermark,
            watermark_save_failed: false,
            known_texts,
            session_close_failed: false,
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.keywords_failed.is_empty() && !self.watermark_save_failed && !self.session_close_failed {
            RunOutcome::Completed
        } else {
            RunOutcome::CompletedWithErrors
        }
    }
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "none".to_string())
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Run Complete ({}) ===", self.run_id)?;
        writeln!(f, "Outcome:            {:?}", self.outcome())?;
        writeln!(f, "Keywords attempted: {}", self.keywords_attempted)?;
        writeln!(f, "Keywords failed:    {}", self.keywords_failed.len())?;
        for keyword in &self.keywords_failed {
            writeln!(f, "  - {keyword}")?;
        }
        writeln!(f, "Candidates seen:    {}", self.candidates_seen)?;
        writeln!(f, "Accepted:           {}", self.accepted)?;
        writeln!(f, "Persisted:          {}", self.persisted)?;
        writeln!(f, "\nRejected:")?;
        writeln!(f, "  Stale:     {}", self.rejected_stale)?;
        writeln!(f, "  Too old:   {}", self.rejected_too_old)?;
        writeln!(f, "  Duplicate: {}", self.rejected_duplicate)?;
        writeln!(f, "  Blank:     {}", self.rejected_blank)?;
        writeln!(f, "Undated posts:      {}", self.undated)?;
        writeln!(f, "Missing evidence:   {}", self.evidence_failures)?;
        writeln!(f, "\nWatermark before:   {}", fmt_ts(self.watermark_before))?;
        write!(f, "Watermark after:    {}", fmt_ts(self.watermark_after))?;
        if self.watermark_save_failed {
            write!(f, " (save failed)")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failure_marks_run_with_errors() {
        let mut report = RunReport::new(Utc::now(), None, 0);
        assert_eq!(report.outcome(), RunOutcome::Completed);

        report.session_close_failed = true;
        assert_eq!(report.outcome(), RunOutcome::CompletedWithErrors);

        let mut report = RunReport::new(Utc::now(), None, 0);
        report.keywords_failed.push("registrar".to_string());
        assert_eq!(report.outcome(), RunOutcome::CompletedWithErrors);
    }

    #[test]
    fn display_lists_failed_keywords() {
        let mut report = RunReport::new(Utc::now(), None, 0);
        report.keywords_failed.push("clearance".to_string());
        let rendered = report.to_string();
        assert!(rendered.contains("Keywords failed:    1"));
        assert!(rendered.contains("  - clearance"));
        assert!(rendered.contains("Watermark after:    none"));
    }
}
