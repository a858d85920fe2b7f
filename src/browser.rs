//! Chromium-backed render engine using chromiumoxide.

use crate::config::Config;
use crate::error::ScrapeError;
use crate::render::{Engine, EngineLauncher, RenderedPage};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

fn render_error(context: &str, e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Render(format!("{context}: {e}"))
}

/// Launches headless Chromium with the configured identity.
pub(crate) struct ChromiumLauncher {
    executable: Option<PathBuf>,
    user_agent: String,
    window_size: (u32, u32),
}

impl ChromiumLauncher {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            executable: config.chrome_executable.clone(),
            user_agent: config.render_user_agent.clone(),
            window_size: config.window_size,
        }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn Engine>, ScrapeError> {
        let (width, height) = self.window_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", self.user_agent));
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| render_error("failed to build browser config", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| render_error("failed to launch browser", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!(target: "render_task", "Browser handler event error: {}", e);
                }
            }
        });

        Ok(Arc::new(ChromiumEngine {
            browser: RwLock::new(browser),
            handler_task,
        }))
    }
}

struct ChromiumEngine {
    browser: RwLock<Browser>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl Engine for ChromiumEngine {
    async fn open(
        &self,
        url: &str,
        navigation_timeout: Duration,
        settle_delay: Duration,
    ) -> Result<Box<dyn RenderedPage>, ScrapeError> {
        let page = {
            let browser = self.browser.read().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| render_error("failed to open page", e))?
        };

        let navigation = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        let failure = match tokio::time::timeout(navigation_timeout, navigation).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(render_error("navigation failed", e)),
            Err(_) => Some(ScrapeError::Render(format!(
                "navigation timed out after {:?}",
                navigation_timeout
            ))),
        };
        if let Some(e) = failure {
            if let Err(close_err) = page.close().await {
                tracing::debug!(target: "render_task", "Failed to close page after error: {}", close_err);
            }
            return Err(e);
        }

        tokio::time::sleep(settle_delay).await;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn shutdown(&self) {
        let mut browser = self.browser.write().await;
        if let Err(e) = browser.close().await {
            tracing::warn!(target: "render_task", "Failed to close browser: {}", e);
        }
        if let Err(e) = browser.wait().await {
            tracing::warn!(target: "render_task", "Failed to reap browser process: {}", e);
        }
        self.handler_task.abort();
    }

    fn is_connected(&self) -> bool {
        // The handler stream ends when the CDP connection drops.
        !self.handler_task.is_finished()
    }
}

struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn evaluate_as<T: DeserializeOwned>(&self, script: &str) -> Result<T, ScrapeError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| render_error("script evaluation failed", e))?
            .into_value::<T>()
            .map_err(|e| render_error("unexpected script result", e))
    }
}

#[async_trait]
impl RenderedPage for ChromiumPage {
    async fn title(&self) -> Result<String, ScrapeError> {
        self.page
            .get_title()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| render_error("failed to read title", e))
    }

    async fn text_content(&self) -> Result<String, ScrapeError> {
        self.evaluate_as("document.body ? document.body.textContent : ''")
            .await
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.page
            .content()
            .await
            .map_err(|e| render_error("failed to read content", e))
    }

    async fn attribute_values(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, ScrapeError> {
        let selector = serde_json::to_string(selector)
            .map_err(|e| render_error("invalid selector", e))?;
        let attribute = serde_json::to_string(attribute)
            .map_err(|e| render_error("invalid attribute", e))?;
        let script = format!(
            "Array.from(document.querySelectorAll({selector})).map(el => el.getAttribute({attribute})).filter(v => v !== null)"
        );
        self.evaluate_as(&script).await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError> {
        self.evaluate_as(script).await
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.page.close().await {
            tracing::debug!(target: "render_task", "Failed to close page: {}", e);
        }
    }
}
