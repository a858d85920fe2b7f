//! Chooses, per URL, between the static path and the rendered path.

use crate::error::ScrapeError;
use crate::models::{ExtractionMethod, PageEmails, ScrapeResult};
use async_trait::async_trait;
use std::sync::Arc;

/// One way of turning a URL into a set of emails.
#[async_trait]
pub(crate) trait EmailSource: Send + Sync {
    async fn extract(&self, url: &str) -> Result<PageEmails, ScrapeError>;
}

/// The scheduler's unit of work.
#[async_trait]
pub(crate) trait Resolve: Send + Sync {
    async fn resolve(&self, url: &str) -> ScrapeResult;
}

/// Runs the fast path and only falls back to rendering when it found nothing
/// or could not reach the host.
pub(crate) struct HybridResolver {
    fast: Arc<dyn EmailSource>,
    rendered: Arc<dyn EmailSource>,
}

impl HybridResolver {
    pub(crate) fn new(fast: Arc<dyn EmailSource>, rendered: Arc<dyn EmailSource>) -> Self {
        Self { fast, rendered }
    }
}

#[async_trait]
impl Resolve for HybridResolver {
    async fn resolve(&self, url: &str) -> ScrapeResult {
        match self.fast.extract(url).await {
            Ok(page) if !page.emails.is_empty() => {
                tracing::info!(target: "scrape_task", "Fast path found {} email(s) on {}", page.emails.len(), url);
                return ScrapeResult::found(url, page, ExtractionMethod::Fast);
            }
            Ok(_) => {
                tracing::debug!(target: "scrape_task", "Fast path found nothing on {}, rendering", url);
            }
            Err(e) if !e.is_transport() => {
                tracing::warn!(target: "scrape_task", "Not rendering {}: {}", url, e);
                return ScrapeResult::failed(url, e);
            }
            Err(e) => {
                tracing::debug!(target: "scrape_task", "Fast path could not reach {} ({}), rendering", url, e);
            }
        }

        match self.rendered.extract(url).await {
            Ok(page) => {
                tracing::info!(target: "scrape_task", "Rendered path found {} email(s) on {}", page.emails.len(), url);
                ScrapeResult::found(url, page, ExtractionMethod::Rendered)
            }
            Err(e) => {
                tracing::warn!(target: "scrape_task", "Rendered path failed for {}: {}", url, e);
                ScrapeResult::failed(url, e)
            }
        }
    }
}
