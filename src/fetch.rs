//! Polite HTTP client shared by every legislature mirror.
//!
//! Wraps a single [`reqwest::Client`] with a cookie store (several sites gate
//! downloads behind a session cookie), a browser user agent, and a fixed delay
//! between requests.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, CONTENT_TYPE, REFERER};
use reqwest::{Client, Response};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{BROWSER_USER_AGENT, MIN_PDF_BYTES};

/// How strictly a download must look like a PDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PdfCheck {
    /// A non-PDF content type fails the download.
    #[default]
    Strict,
    /// A non-PDF content type only warns; bodies under `min_bytes` fail.
    Lenient { min_bytes: u64 },
}

impl PdfCheck {
    /// Lenient check with the usual error-page threshold.
    #[must_use]
    pub fn lenient() -> Self {
        Self::Lenient {
            min_bytes: MIN_PDF_BYTES,
        }
    }
}

/// Result of a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was fetched and written.
    Downloaded { bytes: u64 },
    /// The destination already existed.
    AlreadyPresent,
}

/// Options for a single PDF download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub referer: Option<String>,
    pub check: PdfCheck,
}

/// HTTP client with a politeness delay.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    delay: Duration,
}

impl Fetcher {
    /// Build a fetcher for a site whose default politeness delay is `site_delay`.
    ///
    /// `SLEEP_BETWEEN_REQUESTS_MS` overrides the site default.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config, site_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .cookie_store(true)
            // Several legislature sites serve broken certificate chains.
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            delay: config.sleep_between_requests.unwrap_or(site_delay),
        })
    }

    /// Underlying client, for requests that need custom building.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep for the politeness interval.
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }

    /// GET a URL and fail on a non-success status.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    /// GET with a `Referer` header.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn get_with_referer(&self, url: &str, referer: &str) -> Result<Response> {
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            referer.parse().context("Invalid referer header value")?,
        );
        self.get_with_headers(url, headers).await
    }

    async fn get_with_headers(&self, url: &str, headers: HeaderMap) -> Result<Response> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        ensure_success(response, url).await
    }

    /// GET a URL and return its body as text.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read body: {url}"))
    }

    /// GET a URL and return its raw body.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body: {url}"))?;
        Ok(body.to_vec())
    }

    /// POST an urlencoded form.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn post_form<T: Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
        headers: HeaderMap,
    ) -> Result<Response> {
        debug!(url = %url, "POST form");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        ensure_success(response, url).await
    }

    /// POST a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: HeaderMap,
    ) -> Result<Response> {
        debug!(url = %url, "POST json");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        ensure_success(response, url).await
    }

    /// Download a PDF to `dest`, skipping the request if `dest` already exists.
    ///
    /// The body is streamed to a `.part` file which is renamed into place once
    /// complete, so an interrupted download never leaves a truncated PDF behind.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, or a body
    /// that fails the configured PDF check.
    pub async fn download_pdf(
        &self,
        url: &str,
        dest: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadOutcome> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "PDF already downloaded");
            return Ok(DownloadOutcome::AlreadyPresent);
        }

        let response = match &options.referer {
            Some(referer) => self.get_with_referer(url, referer).await?,
            None => self.get(url).await?,
        };

        let bytes = self.save_pdf_response(response, url, dest, options.check).await?;
        self.pause().await;
        Ok(DownloadOutcome::Downloaded { bytes })
    }

    /// Stream an already-issued response into `dest`, applying the PDF check.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be written or fails the PDF check.
    pub async fn save_pdf_response(
        &self,
        mut response: Response,
        url: &str,
        dest: &Path,
        check: PdfCheck,
    ) -> Result<u64> {
        let content_type = content_type_of(&response);
        if !content_type.contains("application/pdf") {
            match check {
                PdfCheck::Strict => {
                    bail!("Not a PDF ({content_type}): {url}");
                }
                PdfCheck::Lenient { .. } => {
                    warn!(url = %url, content_type = %content_type, "Unexpected content type, keeping download");
                }
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let part = dest.with_extension("pdf.part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("Failed to create file: {}", part.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed while downloading: {url}"))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if let PdfCheck::Lenient { min_bytes } = check {
            if written < min_bytes {
                let _ = tokio::fs::remove_file(&part).await;
                bail!("Downloaded file too small ({written} bytes), likely an error page: {url}");
            }
        }

        tokio::fs::rename(&part, dest)
            .await
            .with_context(|| format!("Failed to move download into place: {}", dest.display()))?;

        info!(url = %url, path = %dest.display(), bytes = written, "Downloaded PDF");
        Ok(written)
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Lowercased `Content-Type` of a response, or an empty string.
#[must_use]
pub fn content_type_of(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}

async fn ensure_success(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        let snippet: String = body.chars().take(200).collect();
        bail!("HTTP {status} for {url}: {snippet}");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(&Config::for_testing(), Duration::from_secs(1)).unwrap()
    }

    fn pdf_body(len: usize) -> Vec<u8> {
        let mut body = b"%PDF-1.4\n".to_vec();
        body.resize(len, b'0');
        body
    }

    #[test]
    fn test_config_delay_overrides_site_delay() {
        assert_eq!(fetcher().delay(), Duration::ZERO);

        let config = Config {
            sleep_between_requests: None,
            ..Config::for_testing()
        };
        let fetcher = Fetcher::new(&config, Duration::from_millis(1500)).unwrap();
        assert_eq!(fetcher.delay(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_download_strict_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .and(header("referer", "http://example.com/collection"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(pdf_body(6000)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("doc.pdf");
        let options = DownloadOptions {
            referer: Some("http://example.com/collection".to_string()),
            check: PdfCheck::Strict,
        };

        let outcome = fetcher()
            .download_pdf(&format!("{}/doc.pdf", server.uri()), &dest, &options)
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded { bytes: 6000 });
        assert!(dest.exists());
        assert!(!dir.path().join("doc.pdf.part").exists());

        // Second call is skipped without touching the network
        let outcome = fetcher()
            .download_pdf(&format!("{}/doc.pdf", server.uri()), &dest, &options)
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn test_download_strict_rejects_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>error</html>"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("doc.pdf");
        let result = fetcher()
            .download_pdf(&server.uri(), &dest, &DownloadOptions::default())
            .await;
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_lenient_size_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/small"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(pdf_body(1200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/large"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(pdf_body(8000)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let options = DownloadOptions {
            referer: None,
            check: PdfCheck::lenient(),
        };

        let small = dir.path().join("small.pdf");
        let result = fetcher()
            .download_pdf(&format!("{}/small", server.uri()), &small, &options)
            .await;
        assert!(result.is_err());
        assert!(!small.exists());
        assert!(!dir.path().join("small.pdf.part").exists());

        let large = dir.path().join("large.pdf");
        let outcome = fetcher()
            .download_pdf(&format!("{}/large", server.uri()), &large, &options)
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded { bytes: 8000 });
    }

    #[tokio::test]
    async fn test_get_text_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = fetcher().get_text(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
