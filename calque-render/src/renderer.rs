//! The renderer/downloader: given a download task, produce the saved
//! document and its block-ID sidecar.
//!
//! Each worker process owns exactly one renderer session. The default
//! implementation is an HTTP client with a cookie jar standing in for a
//! browser session; a browser-automation renderer implements the same trait.

use reqwest::cookie::Jar;
use reqwest::Client;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::blockmap;
use crate::error::{RenderError, Result};
use crate::protocol::{Cookie, DownloadData};

/// One render request, unpacked from a DOWNLOAD message.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub page_id: String,
    pub save_path: std::path::PathBuf,
}

pub trait PageRenderer {
    /// Installs session cookies before any rendering happens.
    fn set_cookies(&mut self, cookies: &[Cookie]);

    /// Renders the page, saves the document at `save_path` and writes the
    /// block-ID sidecar next to it.
    fn render(&self, request: &RenderRequest) -> impl Future<Output = Result<DownloadData>>;
}

pub struct HttpRenderer {
    client: Client,
    jar: Arc<Jar>,
}

impl HttpRenderer {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client, jar })
    }
}

impl PageRenderer for HttpRenderer {
    fn set_cookies(&mut self, cookies: &[Cookie]) {
        for cookie in cookies {
            let origin = format!("https://{}/", cookie.domain.trim_start_matches('.'));
            match Url::parse(&origin) {
                Ok(url) => self.jar.add_cookie_str(&cookie.header_value(), &url),
                Err(e) => debug!("skipping cookie {} with bad domain: {}", cookie.name, e),
            }
        }
    }

    async fn render(&self, request: &RenderRequest) -> Result<DownloadData> {
        debug!("rendering {} -> {}", request.url, request.save_path.display());

        let response = self.client.get(&request.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::BadStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.text().await?;

        let page_dir = request
            .save_path
            .parent()
            .ok_or_else(|| RenderError::Other(format!(
                "save path {} has no parent directory",
                request.save_path.display()
            )))?;
        fs::create_dir_all(page_dir)?;
        fs::write(&request.save_path, &body)?;

        let map = blockmap::extract_block_ids(&body);
        if !map.is_empty() {
            blockmap::save_block_map(page_dir, &map)?;
        }

        Ok(DownloadData {
            bytes_written: body.len() as u64,
            block_ids: map.len(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn render_saves_document_and_sidecar() {
        let mock_server = MockServer::start().await;
        let html = r#"<html><body>
            <div data-block-id="29d979ee-64ae-4a5a-a7d9-f09a102a5a23">block</div>
        </body></html>"#;

        Mock::given(method("GET"))
            .and(path("/Page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(html.as_bytes()),
            )
            .mount(&mock_server)
            .await;

        let out = TempDir::new().unwrap();
        let save_path = out.path().join("Page").join("index.html");

        let renderer = HttpRenderer::new("calque-test", Duration::from_secs(5)).unwrap();
        let data = renderer
            .render(&RenderRequest {
                url: format!("{}/Page", mock_server.uri()),
                page_id: "29d979ee64ae4a5aa7d9f09a102a5a23".to_string(),
                save_path: save_path.clone(),
            })
            .await
            .unwrap();

        assert_eq!(data.block_ids, 1);
        assert!(save_path.exists());

        let sidecar = blockmap::load_block_map(save_path.parent().unwrap()).unwrap();
        assert_eq!(
            sidecar
                .get("29d979ee64ae4a5aa7d9f09a102a5a23")
                .map(String::as_str),
            Some("29d979ee-64ae-4a5a-a7d9-f09a102a5a23")
        );
    }

    #[tokio::test]
    async fn render_surfaces_http_failures_as_task_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let out = TempDir::new().unwrap();
        let renderer = HttpRenderer::new("calque-test", Duration::from_secs(5)).unwrap();
        let err = renderer
            .render(&RenderRequest {
                url: format!("{}/missing", mock_server.uri()),
                page_id: "p".to_string(),
                save_path: out.path().join("missing").join("index.html"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::BadStatus { status: 500, .. }));
    }
}
