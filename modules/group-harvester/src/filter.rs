use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use harvest_common::{text_prefix, AcceptedPost, CandidatePost};

use crate::date_normalizer;
use crate::dedup::DedupIndex;

/// Decides which candidates are new enough and unseen.
///
/// Pure with respect to the index: accepted texts are only committed to the
/// index by the caller, after they have been persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestFilter {
    max_age: Option<Duration>,
}

/// Accepted posts plus why the rest were dropped.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<AcceptedPost>,
    pub blank: u32,
    pub stale: u32,
    pub too_old: u32,
    pub duplicate: u32,
    /// Accepted or rejected candidates whose date could not be read.
    pub undated: u32,
}

impl FilterOutcome {
    pub fn rejected(&self) -> u32 {
        self.blank + self.stale + self.too_old + self.duplicate
    }
}

impl HarvestFilter {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self { max_age }
    }

    /// Accept a candidate when:
    /// - its trimmed text is not blank
    /// - its normalized date is strictly after `watermark` (no watermark accepts all)
    /// - it is within `max_age` of `now`, when configured
    /// - its trimmed text is neither in `index` nor earlier in this batch
    ///
    /// An unreadable date normalizes to the epoch, which fails any watermark.
    pub fn apply(
        &self,
        candidates: &[CandidatePost],
        watermark: Option<DateTime<Utc>>,
        index: &DedupIndex,
        now: DateTime<Utc>,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut batch: HashSet<&str> = HashSet::new();
        let oldest = self.max_age.and_then(|age| now.checked_sub_signed(age));

        for candidate in candidates {
            let text = candidate.text.trim();
            if text.is_empty() {
                outcome.blank += 1;
                continue;
            }

            let date = match date_normalizer::normalize(&candidate.raw_date, now) {
                Some(date) => date,
                None => {
                    outcome.undated += 1;
                    debug!(
                        raw_date = candidate.raw_date.as_str(),
                        text = text_prefix(text, 40),
                        "Unreadable post date"
                    );
                    DateTime::<Utc>::UNIX_EPOCH
                }
            };

            if watermark.is_some_and(|mark| date <= mark) {
                outcome.stale += 1;
                continue;
            }
            if oldest.is_some_and(|oldest| date < oldest) {
                outcome.too_old += 1;
                continue;
            }
            if index.contains(text) || !batch.insert(text) {
                outcome.duplicate += 1;
                continue;
            }

            outcome.accepted.push(AcceptedPost {
                text: text.to_string(),
                captured_at_date: date,
                url: candidate.url.clone(),
                keyword: candidate.keyword.clone(),
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn candidate(text: &str, raw_date: &str) -> CandidatePost {
        CandidatePost {
            text: text.to_string(),
            raw_date: raw_date.to_string(),
            url: String::new(),
            keyword: "registrar".to_string(),
        }
    }

    #[test]
    fn only_posts_newer_than_watermark_pass() {
        let now = now();
        let watermark = Some(now - Duration::hours(3));
        let candidates = vec![
            candidate("Registrar A", "2 hr ago"),
            candidate("Registrar B", "5 hr ago"),
        ];

        let outcome = HarvestFilter::default().apply(&candidates, watermark, &DedupIndex::new(), now);

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].text, "Registrar A");
        assert_eq!(outcome.accepted[0].captured_at_date, now - Duration::hours(2));
        assert_eq!(outcome.stale, 1);
    }

    #[test]
    fn equal_to_watermark_is_rejected() {
        let now = now();
        let watermark = Some(now - Duration::hours(2));
        let outcome = HarvestFilter::default().apply(
            &[candidate("Registrar A", "2 hr ago")],
            watermark,
            &DedupIndex::new(),
            now,
        );
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn unreadable_date_is_epoch_and_fails_any_watermark() {
        let now = now();
        let candidates = [candidate("Registrar A", "Just now")];

        let with_mark = HarvestFilter::default().apply(
            &candidates,
            Some(DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1)),
            &DedupIndex::new(),
            now,
        );
        assert!(with_mark.accepted.is_empty());
        assert_eq!(with_mark.undated, 1);

        let first_run = HarvestFilter::default().apply(&candidates, None, &DedupIndex::new(), now);
        assert_eq!(first_run.accepted[0].captured_at_date, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn known_texts_and_batch_repeats_are_duplicates() {
        let now = now();
        let index = DedupIndex::from_persisted(["Registrar A"]);
        let candidates = vec![
            candidate("  Registrar A ", "1 hr ago"),
            candidate("Registrar B", "1 hr ago"),
            candidate("Registrar B\n", "2 hr ago"),
        ];

        let outcome = HarvestFilter::default().apply(&candidates, None, &index, now);

        let texts: Vec<&str> = outcome.accepted.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["Registrar B"]);
        assert_eq!(outcome.duplicate, 2);
        assert_eq!(index.len(), 1, "filter must not touch the index");
    }

    #[test]
    fn blank_text_is_rejected() {
        let outcome = HarvestFilter::default().apply(
            &[candidate(" \n\t", "1 hr ago")],
            None,
            &DedupIndex::new(),
            now(),
        );
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.blank, 1);
    }

    #[test]
    fn max_age_drops_old_posts() {
        let now = now();
        let filter = HarvestFilter::new(Some(Duration::days(730)));
        let outcome = filter.apply(
            &[
                candidate("Registrar old", "January 1, 2020"),
                candidate("Registrar recent", "3 days ago"),
            ],
            None,
            &DedupIndex::new(),
            now,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].text, "Registrar recent");
        assert_eq!(outcome.too_old, 1);
        assert_eq!(outcome.rejected(), 1);
    }
}
