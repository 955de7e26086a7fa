pub mod error;

pub use chromiumoxide::element::Element;
pub use error::{BrowserError, Result};

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as ClipRegion};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// How to start the browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1280,
            height: 720,
        }
    }
}

/// Element box in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One browser with one page, driven sequentially.
///
/// Call [`BrowserSession::close`] when done. A session dropped without
/// closing spawns a background task that closes the browser.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Page,
    runtime_handle: tokio::runtime::Handle,
}

impl BrowserSession {
    /// Start Chromium, spawn the DevTools event loop and open a blank page.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .viewport(Viewport {
                width: options.width,
                height: options.height,
                ..Default::default()
            });
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "DevTools handler stopped");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        info!(
            headless = options.headless,
            width = options.width,
            height = options.height,
            "Browser launched"
        );

        Ok(Self {
            browser: Some(browser),
            handler: Some(handler),
            page,
            runtime_handle: tokio::runtime::Handle::current(),
        })
    }

    /// Submit the login form and wait for the post-login navigation.
    pub async fn login(&self, login_url: &str, email: &str, password: &str) -> Result<()> {
        self.goto(login_url, LOGIN_TIMEOUT).await?;

        self.fill("#email", email).await?;
        self.fill("#pass", password).await?;
        self.page
            .find_element(r#"[name="login"]"#)
            .await
            .map_err(|_| BrowserError::NotFound(r#"[name="login"]"#.to_string()))?
            .click()
            .await?;

        tokio::time::timeout(LOGIN_TIMEOUT, self.page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::Timeout {
                what: "post-login navigation".to_string(),
                secs: LOGIN_TIMEOUT.as_secs(),
            })??;

        let landed = self.current_url().await?.unwrap_or_default();
        if landed.contains("/login") {
            return Err(BrowserError::Login(
                "still on the login page after submitting credentials".to_string(),
            ));
        }

        info!("Logged in");
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?
            .click()
            .await?
            .type_str(value)
            .await?;
        Ok(())
    }

    /// Navigate and wait for the load event, bounded by `timeout`.
    pub async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout {
                what: format!("navigation to {url}"),
                secs: timeout.as_secs(),
            })??;
        Ok(())
    }

    /// All elements in the page matching `selector`, in document order.
    pub async fn find_all(&self, selector: &str) -> Result<Vec<Element>> {
        Ok(self.page.find_elements(selector).await?)
    }

    /// Scroll the window down by one viewport height.
    pub async fn scroll_by_viewport(&self) -> Result<()> {
        self.page
            .evaluate("window.scrollBy(0, window.innerHeight)")
            .await?;
        Ok(())
    }

    /// Visible layout viewport `(width, height)`, excluding scrollbars.
    pub async fn viewport_size(&self) -> Result<(f64, f64)> {
        let viewport = self.page.layout_metrics().await?.css_layout_viewport;
        Ok((viewport.client_width as f64, viewport.client_height as f64))
    }

    /// PNG of the given viewport region.
    ///
    /// `region` is viewport-relative; the capture clip is document-relative,
    /// so the current scroll offset is added first.
    pub async fn screenshot_region(&self, region: ElementBox) -> Result<Vec<u8>> {
        let viewport = self.page.layout_metrics().await?.css_layout_viewport;
        let clip = to_document_clip(region, viewport.page_x as f64, viewport.page_y as f64);
        debug!(x = clip.x, y = clip.y, width = clip.width, height = clip.height, "Screenshot clip");
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(ClipRegion {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            })
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    /// Current page URL, if any.
    pub async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.page.url().await?)
    }

    /// Close the browser and join the event loop.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut browser) = self.browser.take() {
            browser.close().await?;
            if let Err(e) = browser.wait().await {
                warn!(error = %e, "Browser process did not exit cleanly");
            }
        }
        if let Some(handler) = self.handler.take() {
            let _ = handler.await;
        }
        info!("Browser closed");
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        let handler = self.handler.take();
        self.runtime_handle.spawn(async move {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Failed to close dropped browser session");
            }
            let _ = browser.wait().await;
            if let Some(handler) = handler {
                handler.abort();
            }
        });
    }
}

// --- Element reads ---

/// Rendered text of an element, empty when it has none.
pub async fn inner_text(element: &Element) -> Result<String> {
    Ok(element.inner_text().await?.unwrap_or_default())
}

/// Attribute of the first descendant matching `selector`.
pub async fn child_attribute(
    element: &Element,
    selector: &str,
    attribute: &str,
) -> Result<Option<String>> {
    let Some(child) = element.find_elements(selector).await?.into_iter().next() else {
        return Ok(None);
    };
    Ok(child.attribute(attribute).await?)
}

/// Rendered text of the first descendant matching `selector`.
pub async fn child_text(element: &Element, selector: &str) -> Result<Option<String>> {
    let Some(child) = element.find_elements(selector).await?.into_iter().next() else {
        return Ok(None);
    };
    Ok(child.inner_text().await?)
}

/// Raw `href` of the first descendant link whose href contains any of `patterns`.
pub async fn first_link_href(element: &Element, patterns: &[String]) -> Result<Option<String>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let selector = link_selector(patterns);
    let Some(link) = element.find_elements(selector).await?.into_iter().next() else {
        return Ok(None);
    };
    Ok(link.attribute("href").await?)
}

pub async fn bounding_box(element: &Element) -> Result<ElementBox> {
    let b = element.bounding_box().await?;
    Ok(ElementBox {
        x: b.x,
        y: b.y,
        width: b.width,
        height: b.height,
    })
}

pub async fn scroll_into_view(element: &Element) -> Result<()> {
    element.scroll_into_view().await?;
    Ok(())
}

fn link_selector(patterns: &[String]) -> String {
    patterns
        .iter()
        .map(|p| format!(r#"a[href*="{}"]"#, p.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve a possibly-relative href against the page URL, dropping the fragment.
pub fn resolve_href(raw: &str, base: Option<&str>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        url::Url::parse(base?).ok()?.join(raw).ok()?
    };
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Shift a viewport-relative box by the page scroll offset.
pub fn to_document_clip(region: ElementBox, page_x: f64, page_y: f64) -> ElementBox {
    ElementBox {
        x: region.x + page_x,
        y: region.y + page_y,
        ..region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_selector_covers_every_pattern() {
        let patterns = vec!["/posts/".to_string(), "/permalink/".to_string()];
        assert_eq!(
            link_selector(&patterns),
            r#"a[href*="/posts/"], a[href*="/permalink/"]"#
        );
    }

    #[test]
    fn absolute_href_keeps_query_and_drops_fragment() {
        assert_eq!(
            resolve_href("https://www.facebook.com/groups/g/posts/123?ref=x#c", None),
            Some("https://www.facebook.com/groups/g/posts/123?ref=x".to_string())
        );
    }

    #[test]
    fn relative_href_resolves_against_page() {
        assert_eq!(
            resolve_href("/groups/g/permalink/9/", Some("https://www.facebook.com/groups/g")),
            Some("https://www.facebook.com/groups/g/permalink/9/".to_string())
        );
    }

    #[test]
    fn relative_href_without_base_is_dropped() {
        assert_eq!(resolve_href("/groups/g/posts/1", None), None);
    }

    #[test]
    fn clip_is_shifted_by_scroll_offset() {
        let region = ElementBox {
            x: 0.0,
            y: 200.0,
            width: 600.0,
            height: 300.0,
        };
        assert_eq!(
            to_document_clip(region, 0.0, 5000.0),
            ElementBox {
                x: 0.0,
                y: 5200.0,
                width: 600.0,
                height: 300.0,
            }
        );
        assert_eq!(to_document_clip(region, 0.0, 0.0), region);
    }
}
