//! The shared download, upload and mark-processed flow for a single document.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveClient, ItemMetadata};
use crate::config::Config;
use crate::fetch::{DownloadOptions, Fetcher};
use crate::sites::SiteProfile;
use crate::store::ProcessedSet;
use crate::workspace::{exists, Workspace};

/// Name of the main processed-set file in every site directory.
pub const PROCESSED_FILE: &str = "processed_documents.json";

/// Local timestamp recorded as `processing_date` in sidecars.
#[must_use]
pub fn processing_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// What to delete after a successful first-time upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// PDFs and the sidecar.
    All,
    /// Only the PDFs; the sidecar stays as a local record.
    PdfOnly,
    /// Nothing.
    Keep,
}

/// One PDF belonging to a document.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub path: PathBuf,
    /// Where to fetch the file from. `None` means the site module already
    /// placed it on disk.
    pub url: Option<String>,
    pub options: DownloadOptions,
}

impl DocumentFile {
    #[must_use]
    pub fn remote(path: PathBuf, url: impl Into<String>, options: DownloadOptions) -> Self {
        Self {
            path,
            url: Some(url.into()),
            options,
        }
    }

    #[must_use]
    pub fn local(path: PathBuf) -> Self {
        Self {
            path,
            url: None,
            options: DownloadOptions::default(),
        }
    }
}

/// A document ready to be pushed through [`MirrorContext::process_document`].
#[derive(Debug, Clone)]
pub struct PendingDocument {
    /// Archive item identifier, also the processed-set key.
    pub identifier: String,
    pub files: Vec<DocumentFile>,
    pub metadata_path: PathBuf,
    pub sidecar: Map<String, Value>,
    pub item: ItemMetadata,
    /// Ask the archive whether the item already exists before doing anything.
    pub check_remote: bool,
    pub cleanup: Cleanup,
}

/// How a document was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The archive already had the item.
    AlreadyArchived,
    /// The identifier was already in the processed-set.
    AlreadyProcessed,
    /// Uploaded. `recovered` is set when the files were left over from an
    /// earlier interrupted run.
    Uploaded { recovered: bool },
    /// Files were prepared but not uploaded because uploads are disabled.
    /// Nothing is marked processed and no local file is removed.
    DryRun,
}

/// Counters for one mirror run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub seen: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, result: &Result<Outcome>) {
        self.seen += 1;
        match result {
            Ok(Outcome::Uploaded { .. }) => self.uploaded += 1,
            Ok(Outcome::AlreadyArchived | Outcome::AlreadyProcessed | Outcome::DryRun) => {
                self.skipped += 1;
            }
            Err(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.seen += other.seen;
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Everything a site needs to mirror its documents.
#[derive(Debug)]
pub struct MirrorContext {
    pub config: Config,
    pub fetcher: Fetcher,
    pub archive: ArchiveClient,
    pub workspace: Workspace,
    pub processed: ProcessedSet,
    state: Mutex<Vec<ProcessedSet>>,
}

impl MirrorContext {
    /// Open the workspace and processed-set for `site_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be created or the state cannot be loaded.
    pub async fn open(config: &Config, site_id: &str, site_delay: Duration) -> Result<Self> {
        let workspace = Workspace::create(config.site_dir(site_id))
            .await
            .with_context(|| format!("Failed to create workspace for {site_id}"))?;
        let processed = ProcessedSet::load(workspace.state_path(PROCESSED_FILE)).await?;
        let fetcher = Fetcher::new(config, site_delay)?;
        let archive = ArchiveClient::new(config)?;

        info!(
            site = %site_id,
            dir = %workspace.root().display(),
            processed = processed.len().await,
            "Opened mirror workspace"
        );

        Ok(Self {
            config: config.clone(),
            fetcher,
            archive,
            workspace,
            state: Mutex::new(vec![processed.clone()]),
            processed,
        })
    }

    /// Load an additional state set stored next to the processed-set.
    ///
    /// The set is flushed together with the processed-set on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn open_state(&self, file_name: &str) -> Result<ProcessedSet> {
        let set = ProcessedSet::load(self.workspace.state_path(file_name)).await?;
        self.state.lock().await.push(set.clone());
        Ok(set)
    }

    /// Save every registered state set, logging failures.
    pub async fn flush_state(&self) {
        for set in self.state.lock().await.iter() {
            if let Err(e) = set.save().await {
                error!(path = %set.path().display(), "Failed to save state: {e:#}");
            }
        }
    }

    /// Seed the processed-set with items the archive already holds.
    ///
    /// Search failures are logged and otherwise ignored.
    pub async fn seed_from_archive(&self, profile: &SiteProfile) {
        match self
            .archive
            .search_identifiers(profile.search_creator, profile.search_prefix)
            .await
        {
            Ok(ids) => {
                let added = self.processed.extend(ids).await;
                info!(added, "Seeded processed-set from the archive");
                if let Err(e) = self.processed.save().await {
                    warn!("Failed to save processed-set: {e:#}");
                }
            }
            Err(e) => {
                warn!("Could not search the archive for existing items: {e:#}");
            }
        }
    }

    /// Save the processed-set if `count` is a multiple of `every`.
    pub async fn checkpoint(&self, count: usize, every: usize) {
        if every > 0 && count > 0 && count % every == 0 {
            if let Err(e) = self.processed.save().await {
                warn!("Failed to checkpoint processed-set: {e:#}");
            }
        }
    }

    /// Skip checks run before any download: the processed-set, then the archive.
    ///
    /// Returns the outcome when the document needs no further work. Sites
    /// whose downloads need custom requests call this before fetching.
    ///
    /// # Errors
    ///
    /// Returns an error if the processed-set cannot be saved.
    pub async fn precheck(&self, identifier: &str, check_remote: bool) -> Result<Option<Outcome>> {
        if self.processed.contains(identifier).await {
            debug!(identifier = %identifier, "Already processed");
            return Ok(Some(Outcome::AlreadyProcessed));
        }

        if check_remote && self.archived(identifier).await {
            info!(identifier = %identifier, "Item already exists in the archive");
            self.mark_processed(identifier).await?;
            return Ok(Some(Outcome::AlreadyArchived));
        }

        Ok(None)
    }

    /// Run one document through the archive check, download, upload and mark steps.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the document is left unprocessed.
    pub async fn process_document(&self, doc: &PendingDocument) -> Result<Outcome> {
        let id = doc.identifier.as_str();

        if let Some(outcome) = self.precheck(id, doc.check_remote).await? {
            return Ok(outcome);
        }

        let pdf_paths: Vec<PathBuf> = doc.files.iter().map(|f| f.path.clone()).collect();
        let status = self
            .workspace
            .status(&pdf_paths, &doc.metadata_path, false)
            .await;

        let recovered = status.exists();
        if recovered {
            // Left over from an interrupted run: upload what is on disk and keep it.
            info!(identifier = %id, "Found local files, uploading");
        }

        self.prepare_files(doc).await?;
        if self.config.dry_run {
            info!(identifier = %id, files = pdf_paths.len(), "Dry run, leaving item unprocessed");
            return Ok(Outcome::DryRun);
        }
        self.upload_files(doc).await?;
        self.mark_processed(id).await?;

        if recovered {
            return Ok(Outcome::Uploaded { recovered: true });
        }

        let to_remove: Vec<PathBuf> = match doc.cleanup {
            Cleanup::All => {
                let mut paths = pdf_paths;
                paths.push(doc.metadata_path.clone());
                paths
            }
            Cleanup::PdfOnly => pdf_paths,
            Cleanup::Keep => Vec::new(),
        };
        self.workspace.remove_quietly(&to_remove).await;

        Ok(Outcome::Uploaded { recovered: false })
    }

    /// Write the sidecar and fetch any missing PDFs.
    async fn prepare_files(&self, doc: &PendingDocument) -> Result<()> {
        if !exists(&doc.metadata_path).await {
            self.workspace
                .write_sidecar(&doc.metadata_path, &doc.sidecar)
                .await?;
        }

        for file in &doc.files {
            match &file.url {
                Some(url) => {
                    self.fetcher
                        .download_pdf(url, &file.path, &file.options)
                        .await
                        .with_context(|| format!("Failed to download {url}"))?;
                }
                None if !exists(&file.path).await => {
                    bail!("Expected file is missing: {}", file.path.display());
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn upload_files(&self, doc: &PendingDocument) -> Result<()> {
        let paths: Vec<PathBuf> = doc.files.iter().map(|f| f.path.clone()).collect();
        self.archive
            .upload(&doc.identifier, &paths, &doc.item)
            .await
            .with_context(|| format!("Failed to upload {}", doc.identifier))?;

        info!(identifier = %doc.identifier, files = paths.len(), "Uploaded item");
        Ok(())
    }

    /// Remote existence check. A failed lookup counts as "not archived".
    async fn archived(&self, identifier: &str) -> bool {
        match self.archive.item_exists(identifier).await {
            Ok(found) => found,
            Err(e) => {
                warn!(identifier = %identifier, "Could not check the archive: {e:#}");
                false
            }
        }
    }

    async fn mark_processed(&self, identifier: &str) -> Result<()> {
        self.processed.insert(identifier).await;
        self.processed.save().await
    }

    /// Process a document and fold the result into `summary`.
    ///
    /// Failures are logged and reported as `None` so the caller can move on.
    pub async fn process_and_record(
        &self,
        summary: &mut RunSummary,
        doc: &PendingDocument,
    ) -> Option<Outcome> {
        let result = self.process_document(doc).await;
        summary.record(&result);
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(identifier = %doc.identifier, "Failed to process document: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_record() {
        let mut summary = RunSummary::default();
        summary.record(&Ok(Outcome::Uploaded { recovered: false }));
        summary.record(&Ok(Outcome::AlreadyProcessed));
        summary.record(&Ok(Outcome::AlreadyArchived));
        summary.record(&Err(anyhow::anyhow!("boom")));

        assert_eq!(
            summary,
            RunSummary {
                seen: 4,
                uploaded: 1,
                skipped: 2,
                failed: 1
            }
        );

        let mut total = RunSummary::default();
        total.merge(summary);
        total.merge(summary);
        assert_eq!(total.seen, 8);
    }
}
