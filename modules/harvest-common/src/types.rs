use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Pipeline records ---

/// A raw post-like unit read off the rendered page. Unfiltered: recency and
/// identity checks happen later, in the harvest filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePost {
    pub text: String,
    /// Date exactly as displayed (title attribute or visible text).
    pub raw_date: String,
    /// First permalink-shaped link inside the unit, or empty.
    pub url: String,
    /// The configured keyword this unit matched.
    pub keyword: String,
}

/// A candidate that passed the harvest filter, with its normalized date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPost {
    /// Trimmed post text. This is the dedup identity.
    pub text: String,
    pub captured_at_date: DateTime<Utc>,
    pub url: String,
    pub keyword: String,
}

/// The durable record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedPost {
    pub text: String,
    /// When the post was made, as best the page told us.
    pub captured_at_date: DateTime<Utc>,
    pub url: String,
    pub keyword: String,
    /// Location of the screenshot, or empty when capture failed.
    pub evidence_ref: String,
    /// When this harvest captured it.
    pub captured_date: DateTime<Utc>,
}

impl HarvestedPost {
    pub fn from_accepted(
        post: AcceptedPost,
        evidence_ref: String,
        captured_date: DateTime<Utc>,
    ) -> Self {
        Self {
            text: post.text,
            captured_at_date: post.captured_at_date,
            url: post.url,
            keyword: post.keyword,
            evidence_ref,
            captured_date,
        }
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence_ref.is_empty()
    }
}

// --- Geometry ---

/// On-screen rectangle in CSS pixels, viewport-relative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

// --- Helpers ---

/// First `max_chars` characters of `text`, for log lines.
pub fn text_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prefix_respects_char_boundaries() {
        assert_eq!(text_prefix("Ñandú registrar", 5), "Ñandú");
        assert_eq!(text_prefix("short", 40), "short");
        assert_eq!(text_prefix("", 3), "");
    }

    #[test]
    fn zero_sized_rect_is_empty() {
        assert!(Rect::new(0.0, 0.0, 0.0, 10.0).is_empty());
        assert!(Rect::new(0.0, 0.0, 10.0, -1.0).is_empty());
        assert!(!Rect::new(-5.0, 0.0, 10.0, 10.0).is_empty());
    }
}
