//! Internet Archive client.
//!
//! Uses the public metadata and advanced-search endpoints for lookups and the
//! S3-compatible endpoint for uploads.

mod metadata;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use metadata::{flatten_value, ItemMetadata, MetaValue};

use crate::config::Config;

const SEARCH_PAGE_SIZE: usize = 10_000;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    num_found: usize,
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    identifier: String,
}

#[derive(Debug, Default, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

/// A file already stored in an archive item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
}

/// Internet Archive client.
#[derive(Clone)]
pub struct ArchiveClient {
    http: Client,
    base_url: String,
    s3_url: String,
    credentials: Option<(String, String)>,
    retries: u32,
    retry_sleep: Duration,
    dry_run: bool,
}

impl ArchiveClient {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to create HTTP client")?;

        let credentials = match (&config.ia_access_key, &config.ia_secret_key) {
            (Some(access), Some(secret)) => Some((access.clone(), secret.clone())),
            _ => None,
        };

        Ok(Self {
            http,
            base_url: config.ia_base_url.trim_end_matches('/').to_string(),
            s3_url: config.ia_s3_url.trim_end_matches('/').to_string(),
            credentials,
            retries: config.upload_retries.max(1),
            retry_sleep: config.upload_retry_sleep,
            dry_run: config.dry_run,
        })
    }

    /// Find every item by `creator` whose identifier starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if a search request fails or returns malformed JSON.
    pub async fn search_identifiers(&self, creator: &str, prefix: &str) -> Result<Vec<String>> {
        let query = format!("creator:\"{creator}\"");
        let url = format!("{}/advancedsearch.php", self.base_url);
        let rows = SEARCH_PAGE_SIZE.to_string();

        let mut identifiers = Vec::new();
        let mut seen = 0usize;
        let mut page = 1usize;

        loop {
            let page_str = page.to_string();
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("q", query.as_str()),
                    ("fl[]", "identifier"),
                    ("rows", rows.as_str()),
                    ("page", page_str.as_str()),
                    ("output", "json"),
                ])
                .send()
                .await
                .context("Failed to search the archive")?;

            if !response.status().is_success() {
                bail!("Archive search failed: {}", response.status());
            }

            let body: SearchResponse = response
                .json()
                .await
                .context("Failed to parse archive search response")?;

            if body.response.docs.is_empty() {
                break;
            }

            seen += body.response.docs.len();
            identifiers.extend(
                body.response
                    .docs
                    .into_iter()
                    .map(|d| d.identifier)
                    .filter(|id| id.starts_with(prefix)),
            );

            if seen >= body.response.num_found {
                break;
            }
            page += 1;
        }

        info!(creator = %creator, prefix = %prefix, count = identifiers.len(), "Archive search complete");
        Ok(identifiers)
    }

    /// Files of an existing item, or `None` if the item does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata request fails.
    pub async fn item_files(&self, identifier: &str) -> Result<Option<Vec<RemoteFile>>> {
        let url = format!("{}/metadata/{identifier}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch item metadata: {identifier}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("Item metadata lookup failed for {identifier}: {}", response.status());
        }

        // Missing items come back as `{}`
        let item: ItemResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse item metadata: {identifier}"))?;

        if item.files.is_empty() {
            Ok(None)
        } else {
            Ok(Some(item.files))
        }
    }

    /// Whether an item with files already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata request fails.
    pub async fn item_exists(&self, identifier: &str) -> Result<bool> {
        Ok(self.item_files(identifier).await?.is_some())
    }

    /// Whether uploads are disabled.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Upload `files` into the item `identifier`, creating it if needed.
    ///
    /// Metadata headers travel with the first file sent. Files already present in
    /// the item with the same size are skipped. Each file is retried up to the
    /// configured count on server errors.
    ///
    /// # Errors
    ///
    /// Returns an error if any file fails to upload after all retries.
    pub async fn upload(&self, identifier: &str, files: &[PathBuf], metadata: &ItemMetadata) -> Result<()> {
        if files.is_empty() {
            bail!("No files to upload for {identifier}");
        }

        if self.dry_run {
            info!(identifier = %identifier, files = files.len(), "Dry run, skipping upload");
            return Ok(());
        }

        let Some((access, secret)) = &self.credentials else {
            bail!("Archive credentials are not configured");
        };
        let auth = HeaderValue::from_str(&format!("LOW {access}:{secret}"))
            .context("Invalid archive credentials")?;

        let existing = self.item_files(identifier).await.unwrap_or_else(|e| {
            warn!(identifier = %identifier, error = %e, "Could not list existing files");
            None
        });

        let meta_headers = metadata.headers()?;

        let mut metadata_sent = false;
        for path in files {
            let name = file_name(path)?;
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read file for upload: {}", path.display()))?;

            if let Some(remote) = &existing {
                let size = bytes.len().to_string();
                if remote
                    .iter()
                    .any(|f| f.name == name && f.size.as_deref() == Some(size.as_str()))
                {
                    debug!(identifier = %identifier, file = %name, "File already in item, skipping");
                    continue;
                }
            }

            let url = format!(
                "{}/{identifier}/{}",
                self.s3_url,
                urlencoding::encode(&name)
            );
            let content_type = mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string();

            let mut attempt = 0;
            loop {
                attempt += 1;

                let mut request = self
                    .http
                    .put(&url)
                    .header(AUTHORIZATION, auth.clone())
                    .header(CONTENT_TYPE, content_type.as_str())
                    .header("x-archive-auto-make-bucket", "1")
                    .header("x-archive-size-hint", bytes.len().to_string());
                if !metadata_sent {
                    request = request.headers(meta_headers.clone());
                }

                debug!(identifier = %identifier, file = %name, attempt, "Uploading file");

                let retryable = match request.body(bytes.clone()).send().await {
                    Ok(response) if response.status() == StatusCode::OK => break,
                    Ok(response) => {
                        let status = response.status();
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "unknown".to_string());
                        warn!(identifier = %identifier, file = %name, status = %status, "Upload rejected");
                        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                            bail!("Upload of {name} to {identifier} failed: {status} - {body}");
                        }
                        format!("{status} - {body}")
                    }
                    Err(e) => {
                        warn!(identifier = %identifier, file = %name, error = %e, "Upload request failed");
                        e.to_string()
                    }
                };

                if attempt >= self.retries {
                    bail!("Upload of {name} to {identifier} failed after {attempt} attempts: {retryable}");
                }
                sleep(self.retry_sleep).await;
            }

            metadata_sent = true;
            info!(identifier = %identifier, file = %name, "Uploaded file");
        }

        Ok(())
    }
}

impl std::fmt::Debug for ArchiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveClient")
            .field("base_url", &self.base_url)
            .field("s3_url", &self.s3_url)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .with_context(|| format!("Upload path has no file name: {}", path.display()))
}
