//! The page prober: the narrow interface discovery drives.
//!
//! Probing a page yields its title and outbound links, nothing else. The
//! default implementation fetches over plain HTTP, which is enough for
//! server-rendered sites and for tests; a browser-automation-backed prober
//! plugs in through the same trait.

use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{RenderError, Result};

/// What one probe of a page yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedPage {
    pub title: String,
    /// Absolute outbound link URLs, fragments preserved.
    pub links: Vec<String>,
}

pub trait PageProber {
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbedPage>>;
}

pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

impl PageProber for HttpProber {
    async fn probe(&self, url: &str) -> Result<ProbedPage> {
        debug!("probing {}", url);

        let base =
            Url::parse(url).map_err(|e| RenderError::InvalidUrl(format!("{}: {}", url, e)))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;

        Ok(scrape_page(&body, &base))
    }
}

/// Pulls the title and outbound links from a rendered document.
fn scrape_page(html: &str, base: &Url) -> ProbedPage {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").unwrap();
    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let link_selector = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href")
            && let Some(absolute) = absolutize(base, href)
        {
            links.push(absolute);
        }
    }

    ProbedPage { title, links }
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    let resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn scrape_collects_title_and_absolute_links() {
        let base = Url::parse("https://site.example/Root").unwrap();
        let html = r##"<html><head><title> Root Page </title></head><body>
            <a href="/About">about</a>
            <a href="Child-29d979ee64ae4a5aa7d9f09a102a5a23">child</a>
            <a href="#section">anchor only</a>
            <a href="mailto:someone@example.com">mail</a>
        </body></html>"##;

        let page = scrape_page(html, &base);
        assert_eq!(page.title, "Root Page");
        assert_eq!(
            page.links,
            vec![
                "https://site.example/About".to_string(),
                "https://site.example/Child-29d979ee64ae4a5aa7d9f09a102a5a23".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn http_prober_probes_a_live_page() {
        let mock_server = MockServer::start().await;

        let html = format!(
            r#"<html><head><title>Index</title></head><body>
                <a href="{}/page1">Page 1</a>
            </body></html>"#,
            mock_server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(html.as_bytes()),
            )
            .mount(&mock_server)
            .await;

        let prober = HttpProber::new("calque-test", Duration::from_secs(5)).unwrap();
        let page = prober.probe(&mock_server.uri()).await.unwrap();

        assert_eq!(page.title, "Index");
        assert_eq!(page.links, vec![format!("{}/page1", mock_server.uri())]);
    }

    #[tokio::test]
    async fn http_prober_reports_bad_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let prober = HttpProber::new("calque-test", Duration::from_secs(5)).unwrap();
        let err = prober
            .probe(&format!("{}/gone", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::BadStatus { status: 404, .. }));
    }
}
