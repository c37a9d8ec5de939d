//! Download and upload stages, connected by a directory of queued items.
//!
//! The downloader writes one `queue/{id}.json` per fetched PDF; the uploader
//! consumes and deletes them. Progress is tracked in append-only id logs so
//! either stage can be restarted on its own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::catalog::{read_catalog, Row};
use crate::archive::{ArchiveClient, ItemMetadata};
use crate::fetch::{DownloadOptions, PdfCheck};
use crate::pipeline::{MirrorContext, Outcome, RunSummary};
use crate::store::AppendLog;
use crate::text::{dmy_to_iso, word_chars_only};
use crate::workspace::{exists, read_json, write_json, Workspace};

const COLLECTION: &str = "tamil-nadu-legislature";
const FIELD_PREFIX: &str = "tnla_";
const LANGUAGES: &[&str] = &["tamil", "eng"];

/// Files shared by the three stages.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub catalog: PathBuf,
    pub queue_dir: PathBuf,
    pub downloaded: AppendLog,
    pub download_failed: AppendLog,
    pub uploaded: AppendLog,
    pub upload_failed: AppendLog,
}

impl Ledger {
    /// Lay out the stage files in `workspace` and create the queue directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue directory cannot be created.
    pub async fn open(workspace: &Workspace) -> Result<Self> {
        let ledger = Self {
            catalog: workspace.state_path("tn_digital_data.csv"),
            queue_dir: workspace.state_path("queue"),
            downloaded: AppendLog::new(workspace.state_path("downloaded.txt")),
            download_failed: AppendLog::new(workspace.state_path("download_failed.txt")),
            uploaded: AppendLog::new(workspace.state_path("uploaded.txt")),
            upload_failed: AppendLog::new(workspace.state_path("upload_failed.txt")),
        };
        tokio::fs::create_dir_all(&ledger.queue_dir)
            .await
            .with_context(|| format!("Failed to create {}", ledger.queue_dir.display()))?;
        Ok(ledger)
    }

    fn queue_path(&self, unique_id: &str) -> PathBuf {
        self.queue_dir.join(format!("{unique_id}.json"))
    }

    /// Queued item files, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue directory cannot be read.
    pub async fn queued(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.queue_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.queue_dir.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// A downloaded PDF waiting for upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub unique_id: String,
    pub filename: String,
    pub filepath: PathBuf,
    pub metadata: ItemMetadata,
}

/// PDF name carried in a viewer link's `file=` parameter.
#[must_use]
pub fn preview_filename(preview_url: &str) -> Option<String> {
    if !preview_url.contains("viewer.html") {
        return None;
    }
    let (_, rest) = preview_url.split_once("file=")?;
    let file_path = rest.split('&').next()?;
    let name = file_path.rsplit('/').next()?;
    let name = urlencoding::decode(name).ok()?.into_owned();
    name.ends_with(".pdf").then_some(name)
}

/// Archive identifier derived from a PDF file name.
#[must_use]
pub fn unique_id(filename: &str) -> String {
    let id = filename
        .replace(".pdf", "")
        .replace('(', "_")
        .replace(')', "");
    word_chars_only(&id)
}

/// Legislative body encoded in an identifier; the Assembly unless it says `LC`.
#[must_use]
pub fn house_of(unique_id: &str) -> &'static str {
    if !unique_id.contains("LA") && unique_id.contains("LC") {
        "Legislative Council"
    } else {
        "Legislative Assembly"
    }
}

/// Archive metadata for one catalog row.
#[must_use]
pub fn item_metadata(row: &Row, unique_id: &str) -> ItemMetadata {
    let house = house_of(unique_id);
    let mut meta = ItemMetadata::texts(
        &format!("Tamil Nadu {house}"),
        LANGUAGES,
        &["Tamil Nadu", house, "Government Documents"],
    );
    meta.set("title", row.get("subject").unwrap_or(unique_id));
    meta.set(
        "description",
        "Document from Tamil Nadu Legislative Assembly Digital Archive",
    );
    match row.get("date").map(|d| (d, dmy_to_iso(d))) {
        Some((_, Some(date))) => {
            meta.set("date", date);
        }
        Some((raw, None)) => warn!(identifier = %unique_id, date = %raw, "Unparseable date"),
        None => {}
    }
    meta.set("collection", COLLECTION);

    for (column, value) in row.iter() {
        if column == "page_start" || value.is_empty() || value.starts_with("http") {
            continue;
        }
        meta.set(&format!("{FIELD_PREFIX}{column}"), value);
    }
    meta
}

/// Download every digitised debate in the catalog that has not been fetched yet.
///
/// Returns the number of newly queued items.
///
/// # Errors
///
/// Returns an error if the catalog or the download log cannot be read.
pub async fn download_stage(ctx: &MirrorContext, ledger: &Ledger) -> Result<usize> {
    let rows = read_catalog(&ledger.catalog).await?;
    if rows.is_empty() {
        warn!(catalog = %ledger.catalog.display(), "Catalog is empty, nothing to download");
        return Ok(0);
    }
    let downloaded = ledger.downloaded.load_set().await?;

    let candidates: Vec<(usize, &Row)> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.get("preview").is_some_and(|p| p.contains("DB")))
        .collect();
    info!(count = candidates.len(), "Processing catalog rows");

    let mut queued = 0;
    for (index, row) in candidates {
        let filename = row
            .get("preview")
            .and_then(preview_filename)
            .unwrap_or_else(|| format!("document_{index}.pdf"));
        let id = unique_id(&filename);
        if downloaded.contains(&id) {
            debug!(identifier = %id, "Already downloaded");
            continue;
        }

        match download_one(ctx, ledger, row, &filename, &id).await {
            Ok(()) => {
                ledger.downloaded.append(&id).await?;
                queued += 1;
                info!(identifier = %id, "Queued for upload");
            }
            Err(e) => {
                warn!(identifier = %id, "Download failed: {e:#}");
                ledger.download_failed.append(&id).await?;
            }
        }
    }
    Ok(queued)
}

async fn download_one(
    ctx: &MirrorContext,
    ledger: &Ledger,
    row: &Row,
    filename: &str,
    id: &str,
) -> Result<()> {
    let link = row.get("link1").context("Row has no document link")?;
    let filepath = ctx.workspace.pdf_path(filename);
    ctx.fetcher
        .download_pdf(
            link,
            &filepath,
            &DownloadOptions {
                referer: None,
                check: PdfCheck::Lenient { min_bytes: 0 },
            },
        )
        .await?;

    let item = QueueItem {
        unique_id: id.to_string(),
        filename: filename.to_string(),
        filepath,
        metadata: item_metadata(row, id),
    };
    let value = serde_json::to_value(&item).context("Failed to encode queue item")?;
    write_json(&ledger.queue_path(id), &value).await
}

/// Upload everything currently queued using `workers` concurrent tasks.
///
/// # Errors
///
/// Returns an error if the queue or the upload log cannot be read.
pub async fn upload_stage(
    archive: &ArchiveClient,
    ledger: &Ledger,
    workers: usize,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let queued = ledger.queued().await?;
    if queued.is_empty() {
        debug!("No files in queue");
        return Ok(summary);
    }
    info!(count = queued.len(), workers, "Uploading queued items");

    let uploaded = Arc::new(ledger.uploaded.load_set().await?);
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for path in queued {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Upload pool closed")?;
        let archive = archive.clone();
        let ledger = ledger.clone();
        let uploaded = Arc::clone(&uploaded);
        tasks.spawn(async move {
            let _permit = permit;
            upload_one(&archive, &ledger, &uploaded, &path).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => {
                if let Err(e) = &result {
                    error!("Upload failed: {e:#}");
                }
                summary.record(&result);
            }
            Err(e) => {
                error!("Upload task panicked: {e}");
                summary.seen += 1;
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn upload_one(
    archive: &ArchiveClient,
    ledger: &Ledger,
    uploaded: &HashSet<String>,
    queue_file: &Path,
) -> Result<Outcome> {
    // An unreadable item stays queued and is retried on the next pass.
    let item: QueueItem = serde_json::from_value(read_json(queue_file).await?)
        .with_context(|| format!("Malformed queue item: {}", queue_file.display()))?;

    let result = upload_queued(archive, ledger, uploaded, &item).await;
    if !matches!(result, Ok(Outcome::DryRun)) {
        if let Err(e) = tokio::fs::remove_file(queue_file).await {
            warn!(path = %queue_file.display(), error = %e, "Failed to remove queue file");
        }
    }
    result
}

async fn upload_queued(
    archive: &ArchiveClient,
    ledger: &Ledger,
    uploaded: &HashSet<String>,
    item: &QueueItem,
) -> Result<Outcome> {
    if uploaded.contains(&item.unique_id) || !exists(&item.filepath).await {
        debug!(identifier = %item.unique_id, "Already uploaded or file missing");
        return Ok(Outcome::AlreadyProcessed);
    }

    if archive.is_dry_run() {
        info!(identifier = %item.unique_id, "Dry run, leaving item queued");
        return Ok(Outcome::DryRun);
    }

    info!(identifier = %item.unique_id, "Uploading");
    match archive
        .upload(&item.unique_id, &[item.filepath.clone()], &item.metadata)
        .await
    {
        Ok(()) => {
            info!(identifier = %item.unique_id, "Uploaded item");
            ledger.uploaded.append(&item.unique_id).await?;
            Ok(Outcome::Uploaded { recovered: false })
        }
        Err(e) => {
            ledger.upload_failed.append(&item.unique_id).await?;
            Err(e.context(format!("Failed to upload {}", item.unique_id)))
        }
    }
}
