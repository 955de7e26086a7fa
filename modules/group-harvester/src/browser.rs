// Chromium-backed RenderSession. Thin mapping from the trait onto
// browser_session; all DOM knowledge stays in PageLayout.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use browser_session::{BrowserSession, Element, ElementBox, LaunchOptions};
use harvest_common::{Config, Rect, Viewport};

use crate::traits::{RenderSession, SessionLauncher};

/// Launches Chromium and logs in before handing the session over.
pub struct ChromiumLauncher {
    options: LaunchOptions,
    login_url: String,
    email: String,
    password: String,
}

impl ChromiumLauncher {
    pub fn from_config(config: &Config) -> Self {
        Self {
            options: LaunchOptions {
                headless: config.headless,
                width: config.viewport.width as u32,
                height: config.viewport.height as u32,
            },
            login_url: config.login_url.clone(),
            email: config.fb_email.clone(),
            password: config.fb_password.clone(),
        }
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    type Session = BrowserSession;

    async fn launch(&self) -> Result<BrowserSession> {
        let session = BrowserSession::launch(&self.options).await?;
        if let Err(e) = session.login(&self.login_url, &self.email, &self.password).await {
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "Failed to close browser after login failure");
            }
            return Err(e.into());
        }
        Ok(session)
    }
}

#[async_trait]
impl RenderSession for BrowserSession {
    type Unit = Element;

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        Ok(self.goto(url, timeout).await?)
    }

    async fn query_units(&self, marker: &str) -> Result<Vec<Element>> {
        Ok(self.find_all(marker).await?)
    }

    async fn inner_text(&self, unit: &Element) -> Result<String> {
        Ok(browser_session::inner_text(unit).await?)
    }

    async fn child_attribute(
        &self,
        unit: &Element,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>> {
        Ok(browser_session::child_attribute(unit, selector, attribute).await?)
    }

    async fn child_text(&self, unit: &Element, selector: &str) -> Result<Option<String>> {
        Ok(browser_session::child_text(unit, selector).await?)
    }

    async fn link_matching(&self, unit: &Element, patterns: &[String]) -> Result<Option<String>> {
        let Some(href) = browser_session::first_link_href(unit, patterns).await? else {
            return Ok(None);
        };
        let base = self.current_url().await?;
        Ok(browser_session::resolve_href(&href, base.as_deref()))
    }

    async fn bounding_rect(&self, unit: &Element) -> Result<Rect> {
        let b = browser_session::bounding_box(unit).await?;
        Ok(Rect::new(b.x, b.y, b.width, b.height))
    }

    async fn scroll_into_view(&self, unit: &Element) -> Result<()> {
        Ok(browser_session::scroll_into_view(unit).await?)
    }

    async fn scroll_viewport(&self) -> Result<()> {
        Ok(self.scroll_by_viewport().await?)
    }

    async fn viewport(&self) -> Result<Viewport> {
        let (width, height) = self.viewport_size().await?;
        Ok(Viewport { width, height })
    }

    async fn capture(&self, clip: Rect) -> Result<Vec<u8>> {
        Ok(self
            .screenshot_region(ElementBox {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
            })
            .await?)
    }

    async fn close(self) -> Result<()> {
        Ok(BrowserSession::close(self).await?)
    }
}
