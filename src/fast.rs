//! Static fetch-and-parse extraction: no script execution.

use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::models::PageEmails;
use crate::normalize::collect_emails;
use crate::resolver::EmailSource;
use crate::surfaces::{markup_candidates, page_title};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use scraper::Html;
use std::time::{Duration, Instant};
use url::Url;

/// Fetches raw markup with a rotating user agent and runs the markup surfaces.
pub(crate) struct FastPath {
    http_client: Client,
    user_agents: Vec<String>,
    request_timeout: Duration,
}

impl FastPath {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http_client,
            user_agents: config.user_agents.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn random_user_agent(&self) -> Option<&str> {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// GETs `url` and returns its body as text.
    async fn fetch(&self, url: &str) -> std::result::Result<String, ScrapeError> {
        let page_url = Url::parse(url)
            .map_err(|e| ScrapeError::Structural(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(page_url.scheme(), "http" | "https") {
            return Err(ScrapeError::Structural(format!(
                "unsupported scheme '{}'",
                page_url.scheme()
            )));
        }

        let mut request = self
            .http_client
            .get(page_url.clone())
            .timeout(self.request_timeout);
        if let Some(agent) = self.random_user_agent() {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!(target: "scrape_task", "Timeout fetching {}: {}", page_url, e);
            } else {
                tracing::warn!(target: "scrape_task", "Request/Connection error fetching {}: {}", page_url, e);
            }
            ScrapeError::Transport(e.to_string())
        })?;

        let status = response.status();
        tracing::debug!(target: "scrape_task", "GET {} status: {}", page_url, status);
        if !status.is_success() {
            tracing::debug!(target: "scrape_task", "Scanning non-success response from {} anyway ({})", page_url, status);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !is_markup_content_type(&content_type) {
            return Err(ScrapeError::Structural(format!(
                "unsupported content type '{}'",
                content_type
            )));
        }

        response.text().await.map_err(|e| {
            tracing::warn!(target: "scrape_task", "Failed to read body from {}: {}", page_url, e);
            if e.is_decode() {
                ScrapeError::Structural(e.to_string())
            } else {
                ScrapeError::Transport(e.to_string())
            }
        })
    }
}

/// A missing content type is given the benefit of the doubt.
fn is_markup_content_type(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.contains("html")
        || content_type.contains("xml")
        || content_type.starts_with("text/")
}

/// Runs every markup surface over a fetched body and normalizes the result.
pub(crate) fn extract_from_markup(body: &str) -> PageEmails {
    let document = Html::parse_document(body);
    PageEmails {
        page_title: page_title(&document),
        emails: collect_emails(markup_candidates(body, &document)),
    }
}

#[async_trait]
impl EmailSource for FastPath {
    async fn extract(&self, url: &str) -> std::result::Result<PageEmails, ScrapeError> {
        let start_time = Instant::now();
        let body = self.fetch(url).await?;
        let page = extract_from_markup(&body);
        tracing::debug!(
            target: "scrape_task",
            "Fast path for {} finished in {:.2?} with {} email(s)",
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
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_path(timeout: Duration) -> FastPath {
        let config = Config {
            request_timeout: timeout,
            user_agents: vec!["UA-test".to_string()],
            ..Config::default()
        };
        FastPath::new(&config).expect("client builds")
    }

    #[tokio::test]
    async fn extracts_emails_and_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contact"))
            .and(header("user-agent", "UA-test"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><head><title>Contact</title></head><body>
                    <a href="mailto:Jane.Doe@Example.COM?subject=hi">Jane</a>
                    <!-- old: ab12cd34ef56ab12cd34ef56ab12cd34@tracking.com -->
                    <p data-email="%20Info%40Acme.example">Sales</p>
                    <img src="logo@site.png">
                </body></html>"#,
                "text/html; charset=utf-8",
            ))
            .mount(&server)
            .await;

        let page = fast_path(Duration::from_secs(5))
            .extract(&format!("{}/contact", server.uri()))
            .await
            .expect("fetch ok");
        assert_eq!(page.page_title, "Contact");
        assert_eq!(
            page.emails.into_iter().collect::<Vec<_>>(),
            vec![
                "info@acme.example".to_string(),
                "jane.doe@example.com".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn error_status_is_still_scanned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_raw(
                "<body>blocked, write to abuse@host.example</body>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let page = fast_path(Duration::from_secs(5))
            .extract(&server.uri())
            .await
            .expect("403 bodies are scanned");
        assert!(page.emails.contains("abuse@host.example"));
    }

    #[tokio::test]
    async fn non_html_is_structural() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "application/pdf"))
            .mount(&server)
            .await;

        let err = fast_path(Duration::from_secs(5))
            .extract(&server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Structural(_)));
    }

    #[tokio::test]
    async fn slow_server_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<body>late@slow.example</body>", "text/html")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = fast_path(Duration::from_millis(200))
            .extract(&server.uri())
            .await
            .unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fast_path(Duration::from_secs(2))
            .extract(&format!("http://{}/", addr))
            .await
            .unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
        assert!(err.to_string().starts_with("Fetch error:"));
    }

    #[tokio::test]
    async fn bad_urls_are_structural() {
        let fast = fast_path(Duration::from_secs(1));
        assert!(matches!(
            fast.extract("not a url").await,
            Err(ScrapeError::Structural(_))
        ));
        assert!(matches!(
            fast.extract("ftp://files.example/").await,
            Err(ScrapeError::Structural(_))
        ));
    }

    #[test]
    fn content_type_filter() {
        assert!(is_markup_content_type("text/html; charset=utf-8"));
        assert!(is_markup_content_type("application/xhtml+xml"));
        assert!(is_markup_content_type("text/plain"));
        assert!(is_markup_content_type(""));
        assert!(!is_markup_content_type("application/pdf"));
        assert!(!is_markup_content_type("image/png"));
    }
}
