// Candidate extraction: walk the rendered feed, read every post unit, keep
// the ones mentioning a keyword. No recency or identity checks here.

use anyhow::{Context, Result};
use tracing::{debug, info};

use harvest_common::{CandidatePost, DelayRange, PageLayout};

use crate::traits::RenderSession;
use crate::util::pause;

// ---------------------------------------------------------------------------
// KeywordMatcher
// ---------------------------------------------------------------------------

/// Decides which configured keyword, if any, a post mentions.
///
/// Default mode is a case-insensitive substring test. Variant mode tests the
/// keyword as written, upper-cased, lower-cased and capitalized, each as a
/// case-sensitive substring. Either way the first keyword that hits wins.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<KeywordPattern>,
    variants: bool,
}

#[derive(Debug, Clone)]
struct KeywordPattern {
    keyword: String,
    needles: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String], variants: bool) -> Self {
        let keywords = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| KeywordPattern {
                keyword: k.clone(),
                needles: if variants {
                    keyword_variants(k)
                } else {
                    vec![k.to_lowercase()]
                },
            })
            .collect();
        Self { keywords, variants }
    }

    /// Single-keyword matcher.
    pub fn single(keyword: &str, variants: bool) -> Self {
        Self::new(&[keyword.to_string()], variants)
    }

    /// The configured keyword `text` matches, if any.
    pub fn find(&self, text: &str) -> Option<&str> {
        let lowered;
        let haystack = if self.variants {
            text
        } else {
            lowered = text.to_lowercase();
            lowered.as_str()
        };
        self.keywords
            .iter()
            .find(|pattern| pattern.needles.iter().any(|needle| haystack.contains(needle.as_str())))
            .map(|pattern| pattern.keyword.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Original, UPPER, lower and Capitalized spellings, without repeats.
pub fn keyword_variants(keyword: &str) -> Vec<String> {
    let mut chars = keyword.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    let mut variants: Vec<String> = Vec::with_capacity(4);
    for v in [
        keyword.to_string(),
        keyword.to_uppercase(),
        keyword.to_lowercase(),
        capitalized,
    ] {
        if !v.is_empty() && !variants.contains(&v) {
            variants.push(v);
        }
    }
    variants
}

// ---------------------------------------------------------------------------
// CandidateExtractor
// ---------------------------------------------------------------------------

pub struct CandidateExtractor<'a> {
    layout: &'a PageLayout,
    matcher: KeywordMatcher,
    max_passes: u32,
    scroll_delay: DelayRange,
}

impl<'a> CandidateExtractor<'a> {
    pub fn new(
        layout: &'a PageLayout,
        matcher: KeywordMatcher,
        max_passes: u32,
        scroll_delay: DelayRange,
    ) -> Self {
        Self {
            layout,
            matcher,
            max_passes: max_passes.max(1),
            scroll_delay,
        }
    }

    /// Read, scroll, repeat. Stops when the feed shows no post units after a
    /// scroll step, or after `max_passes` reads. The same post may appear in
    /// several passes; callers deduplicate.
    pub async fn extract<S: RenderSession>(&self, session: &S) -> Result<Vec<CandidatePost>> {
        let mut candidates = Vec::new();

        for pass in 1..=self.max_passes {
            let found = self.read_pass(session).await?;
            debug!(pass, found = found.len(), "Extraction pass complete");
            candidates.extend(found);

            if pass == self.max_passes {
                break;
            }
            if !self.advance(session).await? {
                debug!(pass, "No post units after scroll, feed exhausted");
                break;
            }
        }

        info!(candidates = candidates.len(), "Candidate extraction complete");
        Ok(candidates)
    }

    /// One read of every post unit currently rendered.
    pub async fn read_pass<S: RenderSession>(&self, session: &S) -> Result<Vec<CandidatePost>> {
        let units = session
            .query_units(&self.layout.post_marker)
            .await
            .context("Failed to query post units")?;

        let mut found = Vec::new();
        for unit in &units {
            let text = match session.inner_text(unit).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable post unit");
                    continue;
                }
            };
            let Some(keyword) = self.matcher.find(&text) else {
                continue;
            };
            let keyword = keyword.to_string();

            let raw_date = self.read_date(session, unit).await;
            let url = session
                .link_matching(unit, &self.layout.link_patterns)
                .await
                .unwrap_or_else(|e| {
                    debug!(error = %e, "Permalink lookup failed");
                    None
                })
                .unwrap_or_default();

            found.push(CandidatePost {
                text,
                raw_date,
                url,
                keyword,
            });
        }
        Ok(found)
    }

    /// Prefer the machine-readable attribute, fall back to visible text.
    async fn read_date<S: RenderSession>(&self, session: &S, unit: &S::Unit) -> String {
        let attr = session
            .child_attribute(unit, &self.layout.date_selector, &self.layout.date_attribute)
            .await
            .unwrap_or_default()
            .filter(|v| !v.trim().is_empty());
        if let Some(attr) = attr {
            return attr;
        }
        session
            .child_text(unit, &self.layout.date_selector)
            .await
            .unwrap_or_default()
            .unwrap_or_default()
    }

    /// Scroll one viewport and report whether any post units remain rendered.
    async fn advance<S: RenderSession>(&self, session: &S) -> Result<bool> {
        session
            .scroll_viewport()
            .await
            .context("Failed to scroll feed")?;
        pause(self.scroll_delay).await;
        let remaining = session
            .query_units(&self.layout.post_marker)
            .await
            .context("Failed to query post units after scroll")?;
        Ok(!remaining.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSession, MockUnit};

    fn keywords(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // --- KeywordMatcher ---

    #[test]
    fn default_matching_ignores_case() {
        let matcher = KeywordMatcher::new(&keywords(&["Registrar"]), false);
        assert_eq!(matcher.find("the REGISTRAR office is closed"), Some("Registrar"));
        assert_eq!(matcher.find("nothing to see"), None);
    }

    #[test]
    fn first_configured_keyword_wins() {
        let matcher = KeywordMatcher::new(&keywords(&["Clearance", "Registrar"]), false);
        assert_eq!(
            matcher.find("Registrar says clearance forms are due"),
            Some("Clearance")
        );
    }

    #[test]
    fn variant_matching_is_case_sensitive_per_variant() {
        let matcher = KeywordMatcher::new(&keywords(&["enrollment"]), true);
        assert_eq!(matcher.find("ENROLLMENT opens"), Some("enrollment"));
        assert_eq!(matcher.find("Enrollment opens"), Some("enrollment"));
        assert_eq!(matcher.find("enrollment opens"), Some("enrollment"));
        assert_eq!(matcher.find("EnRoLLment opens"), None);
    }

    #[test]
    fn variants_are_deduplicated() {
        assert_eq!(keyword_variants("Registrar"), vec!["Registrar", "REGISTRAR", "registrar"]);
        assert_eq!(keyword_variants("dEPT"), vec!["dEPT", "DEPT", "dept", "Dept"]);
    }

    #[test]
    fn blank_keywords_are_ignored() {
        assert!(KeywordMatcher::new(&keywords(&["  "]), false).is_empty());
    }

    // --- Extraction ---

    #[tokio::test]
    async fn reads_text_date_and_link_of_matching_units() {
        let session = MockSession::new(vec![
            MockUnit::new("Registrar deadline extended")
                .with_date_title("Monday, March 3, 2025 at 10:15 AM")
                .with_date_text("2 hr")
                .with_link("https://www.facebook.com/groups/g/posts/1/"),
            MockUnit::new("Lost umbrella near gate 2").with_date_text("3 hr ago"),
        ]);
        let layout = PageLayout::default();
        let extractor = CandidateExtractor::new(
            &layout,
            KeywordMatcher::single("registrar", false),
            1,
            DelayRange::ZERO,
        );

        let found = extractor.extract(&session).await.unwrap();

        assert_eq!(
            found,
            vec![CandidatePost {
                text: "Registrar deadline extended".to_string(),
                raw_date: "Monday, March 3, 2025 at 10:15 AM".to_string(),
                url: "https://www.facebook.com/groups/g/posts/1/".to_string(),
                keyword: "registrar".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn visible_date_text_is_the_fallback() {
        let session = MockSession::new(vec![
            MockUnit::new("Enrollment portal is down").with_date_text("Yesterday at 9:14 PM"),
        ]);
        let layout = PageLayout::default();
        let extractor = CandidateExtractor::new(
            &layout,
            KeywordMatcher::single("Enrollment", false),
            1,
            DelayRange::ZERO,
        );

        let found = extractor.extract(&session).await.unwrap();
        assert_eq!(found[0].raw_date, "Yesterday at 9:14 PM");
        assert_eq!(found[0].url, "");
    }

    #[tokio::test]
    async fn scrolling_reveals_later_units_until_pass_limit() {
        let session = MockSession::new(vec![
            MockUnit::new("Registrar post one"),
            MockUnit::new("Registrar post two").appears_after_scrolls(1),
            MockUnit::new("Registrar post three").appears_after_scrolls(5),
        ]);
        let layout = PageLayout::default();
        let extractor = CandidateExtractor::new(
            &layout,
            KeywordMatcher::single("Registrar", false),
            2,
            DelayRange::ZERO,
        );

        let texts: Vec<String> = extractor
            .extract(&session)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();

        // Pass 1 sees one unit, pass 2 sees both mounted units again.
        assert_eq!(
            texts,
            vec!["Registrar post one", "Registrar post one", "Registrar post two"]
        );
        assert_eq!(session.scroll_count(), 1);
    }

    #[tokio::test]
    async fn empty_feed_after_scroll_stops_early() {
        let session =
            MockSession::new(vec![MockUnit::new("Registrar only post").unmounts_after_scrolls(1)]);
        let layout = PageLayout::default();
        let extractor = CandidateExtractor::new(
            &layout,
            KeywordMatcher::single("Registrar", false),
            10,
            DelayRange::ZERO,
        );

        let found = extractor.extract(&session).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(session.scroll_count(), 1);
    }
}
