use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarvestError, Result};
use crate::types::Viewport;

const DEFAULT_GROUP_BASE: &str = "https://www.facebook.com/groups";
const DEFAULT_LOGIN_URL: &str = "https://www.facebook.com/login";

/// Selectors describing how posts are laid out on the rendered page.
#[derive(Debug, Clone)]
pub struct PageLayout {
    /// Marks one structural post unit.
    pub post_marker: String,
    /// Date element inside a unit.
    pub date_selector: String,
    /// Machine-readable date attribute on the date element.
    pub date_attribute: String,
    /// Path fragments identifying a post permalink.
    pub link_patterns: Vec<String>,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            post_marker: r#"[role="article"]"#.to_string(),
            date_selector: "abbr".to_string(),
            date_attribute: "title".to_string(),
            link_patterns: vec!["/posts/".to_string(), "/permalink/".to_string()],
        }
    }
}

/// Inclusive millisecond range for randomized pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Credentials
    pub fb_email: String,
    pub fb_password: String,
    pub login_url: String,

    // Target
    pub group_id: String,
    pub group_url: String,
    pub keywords: Vec<String>,
    pub keyword_variants: bool,
    pub layout: PageLayout,

    // Storage
    pub data_dir: PathBuf,
    pub database_url: Option<String>,

    // Pacing
    pub interval: Duration,
    pub max_scroll_passes: u32,
    pub max_age: Option<chrono::Duration>,
    pub nav_timeout: Duration,
    pub scroll_delay: DelayRange,
    pub settle_delay: DelayRange,

    // Browser
    pub headless: bool,
    pub viewport: Viewport,
}

impl Config {
    /// Load configuration from the process environment (after `.env`).
    /// Missing credentials, group or keywords are an error.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_redacted();
        Ok(config)
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                HarvestError::Config(format!("{key} environment variable is required"))
            })
        };

        let fb_email = required("FB_EMAIL")?;
        let fb_password = required("FB_PASSWORD")?;
        let group_id = required("HARVEST_GROUP_ID")?;

        let group_url = match get("HARVEST_GROUP_URL") {
            Some(url) => {
                url::Url::parse(&url).map_err(|e| {
                    HarvestError::Config(format!("HARVEST_GROUP_URL is not a valid URL: {e}"))
                })?;
                url
            }
            None => format!("{DEFAULT_GROUP_BASE}/{group_id}"),
        };

        let keywords = parse_keywords(&required("HARVEST_KEYWORDS")?);
        if keywords.is_empty() {
            return Err(HarvestError::Config(
                "HARVEST_KEYWORDS must name at least one keyword".to_string(),
            ));
        }

        let max_age = match get("HARVEST_MAX_AGE_DAYS") {
            Some(v) => {
                let days: i64 = parse_positive("HARVEST_MAX_AGE_DAYS", &v)?;
                let age = chrono::TimeDelta::try_days(days).ok_or_else(|| {
                    HarvestError::Config(format!("HARVEST_MAX_AGE_DAYS is out of range, got {v:?}"))
                })?;
                Some(age)
            }
            None => None,
        };

        let interval_minutes: u64 = match get("HARVEST_INTERVAL_MINUTES") {
            Some(v) => parse_positive("HARVEST_INTERVAL_MINUTES", &v)?,
            None => 30,
        };
        let interval = interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                HarvestError::Config(format!(
                    "HARVEST_INTERVAL_MINUTES is out of range, got {interval_minutes}"
                ))
            })?;

        let viewport = match get("HARVEST_VIEWPORT") {
            Some(v) => parse_viewport(&v)?,
            None => Viewport {
                width: 1280.0,
                height: 720.0,
            },
        };

        Ok(Self {
            fb_email,
            fb_password,
            login_url: get("FB_LOGIN_URL").unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
            group_id,
            group_url,
            keywords,
            keyword_variants: parse_flag("HARVEST_KEYWORD_VARIANTS", get("HARVEST_KEYWORD_VARIANTS"), false)?,
            layout: PageLayout::default(),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string())),
            database_url: get("DATABASE_URL"),
            interval,
            max_scroll_passes: optional_number(
                "HARVEST_MAX_SCROLL_PASSES",
                get("HARVEST_MAX_SCROLL_PASSES"),
                10,
            )?,
            max_age,
            nav_timeout: Duration::from_secs(optional_number(
                "HARVEST_NAV_TIMEOUT_SECS",
                get("HARVEST_NAV_TIMEOUT_SECS"),
                60,
            )?),
            scroll_delay: DelayRange::new(3000, 5000),
            settle_delay: DelayRange::new(1500, 2000),
            headless: parse_flag("HARVEST_HEADLESS", get("HARVEST_HEADLESS"), true)?,
            viewport,
        })
    }

    pub fn results_csv_path(&self) -> PathBuf {
        self.data_dir.join("results.csv")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_dir.join("screenshots")
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.data_dir.join("lastScrapeTimestamp.json")
    }

    fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.chars().count().min(3);
            let head: String = val.chars().take(n).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  FB_EMAIL: {}", preview(&self.fb_email));
        tracing::info!("  FB_PASSWORD: {}", preview(&self.fb_password));
        tracing::info!("  group: {}", self.group_url);
        tracing::info!("  keywords: {}", self.keywords.join(", "));
        tracing::info!("  data dir: {}", self.data_dir.display());
        tracing::info!(
            "  DATABASE_URL: {}",
            if self.database_url.is_some() { "<set>" } else { "<not set>" }
        );
    }
}

fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| HarvestError::Config(format!("{key} must be a number, got {raw:?}")))
}

/// A number strictly greater than zero.
fn parse_positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value: T = parse_number(key, raw)?;
    if value <= T::default() {
        return Err(HarvestError::Config(format!(
            "{key} must be greater than zero, got {raw:?}"
        )));
    }
    Ok(value)
}

fn optional_number<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(v) => parse_number(key, &v),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(HarvestError::Config(format!(
            "{key} must be true or false, got {other:?}"
        ))),
    }
}

fn parse_viewport(raw: &str) -> Result<Viewport> {
    let invalid = || HarvestError::Config(format!("HARVEST_VIEWPORT must look like 1280x720, got {raw:?}"));
    let (w, h) = raw.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(Viewport {
        width: f64::from(width),
        height: f64::from(height),
    })
}
