pub mod extract;
pub mod robots;

use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CrawlerConfig;
use extract::ExtractedPage;
use robots::RobotsTxt;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("fetch disallowed by robots.txt")]
    RobotsDenied,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("unexpected status {0}")]
    HttpStatus(u16),

    #[error("insufficient content: {0} visible characters")]
    InsufficientContent(usize),
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub text: String,
    pub title: Option<String>,
    pub canonical_url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub checksum: String,
    pub rendered_fallback: bool,
}

pub struct Crawler {
    client: Client,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(config: CrawlerConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Lowercased scheme and host, fragment stripped, trailing slash
    /// normalized away (except for the bare root path).
    pub fn canonicalize(raw: &str) -> Result<Url, CrawlError> {
        let mut url = Url::parse(raw.trim()).map_err(|e| CrawlError::InvalidUrl(e.to_string()))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CrawlError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        url.set_fragment(None);
        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }
        Ok(url)
    }

    /// Fetch one URL and return its extracted main content.
    pub async fn crawl(&self, raw_url: &str) -> Result<CrawledPage, CrawlError> {
        let url = Self::canonicalize(raw_url)?;

        if !self.robots_allows(&url).await {
            return Err(CrawlError::RobotsDenied);
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus(status.as_u16()));
        }

        let etag = header_value(&response, "etag");
        let last_modified = header_value(&response, "last-modified");

        let html = response
            .text()
            .await
            .map_err(|e| CrawlError::Fetch(e.to_string()))?;

        let mut page = extract::extract(&html);
        let mut rendered_fallback = false;

        // Client-rendered pages serve an empty shell; retry once through the
        // headless-render service when too little visible text came back.
        if page.text.chars().count() < self.config.render_fallback_threshold {
            if let Some(rendered) = self.fetch_rendered(&url).await {
                let rendered_page = extract::extract(&rendered);
                if rendered_page.text.chars().count() > page.text.chars().count() {
                    page = rendered_page;
                    rendered_fallback = true;
                }
            }
        }

        let visible_chars = page.text.chars().count();
        if visible_chars < self.config.min_content_chars {
            return Err(CrawlError::InsufficientContent(visible_chars));
        }

        let checksum = hex::encode(Sha256::digest(page.text.as_bytes()));
        let canonical_url = resolve_canonical(&url, &page);

        info!(
            url = %url,
            chars = visible_chars,
            rendered_fallback,
            "crawled page"
        );

        Ok(CrawledPage {
            text: page.text,
            title: page.title,
            canonical_url,
            etag,
            last_modified,
            checksum,
            rendered_fallback,
        })
    }

    async fn robots_allows(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host_with_port(url, host));

        let body = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(_) | Err(_) => None,
        };

        // Missing or unreadable robots.txt means unrestricted.
        let Some(body) = body else {
            return true;
        };

        let robots = RobotsTxt::parse(&body);
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let allowed = robots.is_allowed(&self.config.user_agent, &path);
        if !allowed {
            debug!(url = %url, "robots.txt disallows fetch");
        }
        allowed
    }

    async fn fetch_rendered(&self, url: &Url) -> Option<String> {
        let base = self.config.render_base_url.as_deref()?;
        let render_url = format!("{}/render", base.trim_end_matches('/'));

        let result = self
            .client
            .get(&render_url)
            .query(&[("url", url.as_str())])
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                warn!(status = %resp.status(), "render service returned error");
                None
            }
            Err(e) => {
                warn!("render service unreachable: {}", e);
                None
            }
        }
    }
}

fn host_with_port(url: &Url, host: &str) -> String {
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Prefer the page's own rel=canonical link when it parses; otherwise keep
/// the normalized request URL.
fn resolve_canonical(url: &Url, page: &ExtractedPage) -> String {
    page.canonical
        .as_deref()
        .and_then(|href| Crawler::canonicalize(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base: Option<String>) -> CrawlerConfig {
        CrawlerConfig {
            timeout_seconds: 5,
            min_content_chars: 50,
            render_fallback_threshold: 200,
            render_base_url: base,
            user_agent: "rag-widget-bot/0.1".to_string(),
        }
    }

    #[test]
    fn canonicalize_normalizes_case_fragment_and_slash() {
        let url = Crawler::canonicalize("HTTPS://Example.COM/Docs/#intro").unwrap();
        assert_eq!(url.as_str(), "https://example.com/Docs");

        let root = Crawler::canonicalize("https://example.com/").unwrap();
        assert_eq!(root.as_str(), "https://example.com/");
    }

    #[test]
    fn canonicalize_rejects_non_http_schemes() {
        assert!(matches!(
            Crawler::canonicalize("ftp://example.com/file"),
            Err(CrawlError::InvalidUrl(_))
        ));
        assert!(matches!(
            Crawler::canonicalize("not a url"),
            Err(CrawlError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn crawl_extracts_text_and_checksum() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let body = format!(
            "<html><head><title>Doc</title></head><body><article><p>{}</p></article></body></html>",
            "Useful knowledge sentence. ".repeat(20)
        );
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc123\"")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(None));
        let page = crawler.crawl(&format!("{}/page", server.uri())).await.unwrap();

        assert_eq!(page.title.as_deref(), Some("Doc"));
        assert_eq!(page.etag.as_deref(), Some("\"abc123\""));
        assert_eq!(page.checksum.len(), 64);
        assert!(!page.rendered_fallback);
        assert!(page.text.contains("Useful knowledge sentence."));
    }

    #[tokio::test]
    async fn robots_disallow_denies_crawl() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /secret/\n"),
            )
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(None));
        let err = crawler
            .crawl(&format!("{}/secret/page", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::RobotsDenied));
    }

    #[tokio::test]
    async fn sparse_page_uses_render_fallback() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><div id="root"></div></body></html>"#,
            ))
            .mount(&server)
            .await;

        let rendered = format!(
            "<html><head><title>App</title></head><body><main><p>{}</p></main></body></html>",
            "Rendered client side content. ".repeat(40)
        );
        Mock::given(method("GET"))
            .and(path("/render"))
            .and(query_param("url", format!("{}/app", server.uri())))
            .respond_with(ResponseTemplate::new(200).set_body_string(rendered))
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(Some(server.uri())));
        let page = crawler.crawl(&format!("{}/app", server.uri())).await.unwrap();

        assert!(page.rendered_fallback);
        assert_eq!(page.title.as_deref(), Some("App"));
        assert!(page.text.contains("Rendered client side content."));
    }

    #[tokio::test]
    async fn empty_extraction_is_insufficient_content() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/thin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>tiny</p></body></html>"),
            )
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(None));
        let err = crawler
            .crawl(&format!("{}/thin", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InsufficientContent(_)));
    }
}
