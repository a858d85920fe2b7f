//! Browser-rendered extraction: sees script-injected and structured-data emails.

use crate::config::Config;
use crate::error::ScrapeError;
use crate::models::PageEmails;
use crate::normalize::collect_emails;
use crate::render::{RenderEngine, RenderedPage};
use crate::resolver::EmailSource;
use crate::surfaces::{
    DATA_EMAIL_CSS, MAILTO_CSS, json_ld_candidates, markup_candidates, page_title,
    script_candidates, text_matches,
};
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCRIPT_TEXTS_JS: &str =
    "Array.from(document.querySelectorAll('script')).map(s => s.textContent || '')";
const JSON_LD_TEXTS_JS: &str = "Array.from(document.querySelectorAll('script[type=\"application/ld+json\"]')).map(s => s.textContent || '')";

/// Everything read out of one rendered page before any parsing happens.
#[derive(Debug, Default)]
struct RenderedSurfaces {
    title: String,
    body_text: String,
    markup: String,
    mailtos: Vec<String>,
    data_emails: Vec<String>,
    scripts: Vec<String>,
    json_ld: Vec<String>,
}

/// Renders a URL in the shared engine and runs the full surface set.
pub(crate) struct RenderedPath {
    engine: Arc<RenderEngine>,
    navigation_timeout: Duration,
    settle_delay: Duration,
}

impl RenderedPath {
    pub(crate) fn new(engine: Arc<RenderEngine>, config: &Config) -> Self {
        Self {
            engine,
            navigation_timeout: config.navigation_timeout,
            settle_delay: config.settle_delay,
        }
    }
}

fn string_list(value: serde_json::Value) -> Result<Vec<String>, ScrapeError> {
    serde_json::from_value(value)
        .map_err(|e| ScrapeError::Render(format!("unexpected script result: {e}")))
}

async fn read_surfaces(page: &dyn RenderedPage) -> Result<RenderedSurfaces, ScrapeError> {
    Ok(RenderedSurfaces {
        title: page.title().await?,
        body_text: page.text_content().await?,
        markup: page.content().await?,
        mailtos: page.attribute_values(MAILTO_CSS, "href").await?,
        data_emails: page.attribute_values(DATA_EMAIL_CSS, "data-email").await?,
        scripts: string_list(page.evaluate(SCRIPT_TEXTS_JS).await?)?,
        json_ld: string_list(page.evaluate(JSON_LD_TEXTS_JS).await?)?,
    })
}

fn extract_from_surfaces(surfaces: RenderedSurfaces) -> PageEmails {
    let document = Html::parse_document(&surfaces.markup);

    let mut candidates = text_matches(&surfaces.body_text);
    candidates.extend(markup_candidates(&surfaces.markup, &document));
    candidates.extend(surfaces.mailtos);
    candidates.extend(surfaces.data_emails);
    candidates.extend(script_candidates(&surfaces.scripts));
    candidates.extend(json_ld_candidates(&surfaces.json_ld));

    let page_title = if surfaces.title.is_empty() {
        page_title(&document)
    } else {
        surfaces.title
    };

    PageEmails {
        page_title,
        emails: collect_emails(candidates),
    }
}

#[async_trait]
impl EmailSource for RenderedPath {
    async fn extract(&self, url: &str) -> Result<PageEmails, ScrapeError> {
        let start_time = Instant::now();
        let lease = self.engine.acquire().await?;
        let page = lease
            .engine()
            .open(url, self.navigation_timeout, self.settle_delay)
            .await?;

        let surfaces = read_surfaces(page.as_ref()).await;
        page.close().await;
        drop(lease);

        let page = extract_from_surfaces(surfaces?);
        tracing::debug!(
            target: "render_task",
            "Rendered path for {} finished in {:.2?} with {} email(s)",
            url,
            start_time.elapsed(),
            page.emails.len()
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{FakeLauncher, PageScript};
    use std::sync::atomic::Ordering;

    fn rendered_path(page: PageScript) -> (RenderedPath, Arc<FakeLauncher>, Arc<RenderEngine>) {
        let launcher = FakeLauncher::new(page);
        let engine = Arc::new(RenderEngine::new(launcher.clone()));
        let path = RenderedPath::new(engine.clone(), &Config::default());
        (path, launcher, engine)
    }

    #[tokio::test]
    async fn merges_every_rendered_surface() {
        let (path, launcher, engine) = rendered_path(PageScript {
            title: "Team".into(),
            text: "Call or write: Desk@Office.example".into(),
            markup: r#"<html><body><!-- legacy@office.example --></body></html>"#.into(),
            mailtos: vec!["mailto:boss@office.example?subject=hi".into()],
            data_emails: vec!["data@office.example".into()],
            scripts: vec![r#"window.contact = "script@office.example";"#.into()],
            json_ld: vec![
                r#"{"@type":"Organization","email":"ld@office.example","logo":"logo@office.png"}"#
                    .into(),
                "not json".into(),
            ],
            fail_navigation: false,
        });

        let page = path.extract("https://office.example/team").await.unwrap();
        assert_eq!(page.page_title, "Team");
        let emails: Vec<_> = page.emails.into_iter().collect();
        assert_eq!(
            emails,
            vec![
                "boss@office.example",
                "data@office.example",
                "desk@office.example",
                "ld@office.example",
                "legacy@office.example",
                "script@office.example",
            ]
        );
        assert_eq!(launcher.stats.opened.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.stats.closed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_markup_title() {
        let (path, _launcher, _engine) = rendered_path(PageScript {
            markup: "<title>From Markup</title>".into(),
            ..Default::default()
        });
        let page = path.extract("https://x.example").await.unwrap();
        assert_eq!(page.page_title, "From Markup");
        assert!(page.emails.is_empty());
    }

    #[tokio::test]
    async fn navigation_failure_releases_lease() {
        let (path, launcher, engine) = rendered_path(PageScript {
            fail_navigation: true,
            ..Default::default()
        });
        let err = path.extract("https://down.example").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Render(_)));
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(launcher.stats.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pages_share_one_engine() {
        let (path, launcher, engine) = rendered_path(PageScript::default());
        for _ in 0..3 {
            path.extract("https://x.example").await.unwrap();
        }
        assert_eq!(launcher.stats.launches.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.stats.opened.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.stats.closed.load(Ordering::SeqCst), 3);
        engine.shutdown().await;
        assert_eq!(launcher.stats.shutdowns.load(Ordering::SeqCst), 1);
    }
}
