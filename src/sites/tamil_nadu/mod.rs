//! Tamil Nadu Legislative Assembly debates from the TNLA digital library.
//!
//! Runs as three stages: `scrape` builds a CSV catalog from the search
//! results, `download` fetches the debate PDFs into a queue, and `upload`
//! drains the queue with a pool of workers.

mod catalog;
mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

pub use catalog::{append_catalog, parse_results, read_catalog, resume_point, Row};
pub use queue::{download_stage, upload_stage, Ledger, QueueItem};

use super::traits::{Legislature, SiteProfile};
use crate::pipeline::{MirrorContext, RunSummary};

const BASE_URL: &str = "https://tnlasdigital.tn.gov.in";
const QUEUE_POLL: Duration = Duration::from_secs(5);

/// A single step of the Tamil Nadu mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    Scrape,
    Download,
    Upload,
}

/// Tamil Nadu Legislative Assembly.
pub struct TamilNadu {
    base_url: String,
    profile: SiteProfile,
}

impl TamilNadu {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Tamil Nadu Legislative Assembly",
                search_creator: "Tamil Nadu Legislative Assembly",
                search_prefix: "",
                languages: &["tamil", "eng"],
                subjects: &["Tamil Nadu", "Government Documents"],
                collection: Some("tamil-nadu-legislature"),
                field_prefix: "tnla_",
                delay: Duration::from_secs(1),
            },
        }
    }

    /// Append new search-result pages to the catalog, resuming after the last
    /// recorded page. Returns the number of rows added.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub async fn scrape(&self, ctx: &MirrorContext, ledger: &Ledger) -> Result<usize> {
        let existing = read_catalog(&ledger.catalog).await?;
        let mut start = resume_point(&existing);
        if start == 0 {
            info!("Starting fresh scrape");
        } else {
            info!(records = existing.len(), start, "Resuming scrape");
        }

        let mut added = 0;
        loop {
            let url = catalog::search_url(&self.base_url, start);
            info!(start, "Scraping results page");
            let rows = match ctx.fetcher.get_text(&url).await {
                Ok(html) => parse_results(&html, &url, start),
                Err(e) => {
                    warn!(start, "Error scraping page: {e:#}");
                    Vec::new()
                }
            };
            if rows.is_empty() {
                info!(start, "No data found, stopping");
                break;
            }

            append_catalog(&ledger.catalog, &rows).await?;
            added += rows.len();
            info!(rows = rows.len(), total = existing.len() + added, "Saved results page");

            start += catalog::PAGE_SIZE;
            ctx.fetcher.pause().await;
        }
        Ok(added)
    }

    /// Run one stage on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage's state files cannot be read or written.
    pub async fn run_stage(&self, ctx: &MirrorContext, stage: Stage) -> Result<RunSummary> {
        let ledger = Ledger::open(&ctx.workspace).await?;
        match stage {
            Stage::Scrape => {
                let added = self.scrape(ctx, &ledger).await?;
                info!(added, "Scrape complete");
                Ok(RunSummary::default())
            }
            Stage::Download => {
                let queued = download_stage(ctx, &ledger).await?;
                info!(queued, "Download complete");
                Ok(RunSummary::default())
            }
            Stage::Upload => upload_stage(&ctx.archive, &ledger, ctx.config.upload_workers).await,
        }
    }
}

impl Default for TamilNadu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for TamilNadu {
    fn site_id(&self) -> &'static str {
        "tamil-nadu"
    }

    fn name(&self) -> &'static str {
        "Tamil Nadu Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["tn"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Scrape, then download and upload concurrently until the queue is drained.
    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        let ledger = Ledger::open(&ctx.workspace).await?;
        self.scrape(ctx, &ledger).await?;

        let download_done = AtomicBool::new(false);
        let downloader = async {
            let result = download_stage(ctx, &ledger).await;
            download_done.store(true, Ordering::SeqCst);
            result
        };
        let uploader = async {
            let mut summary = RunSummary::default();
            loop {
                // A pass that starts after the downloader has finished sees every queued item.
                let finished = download_done.load(Ordering::SeqCst);
                // Dry-run items stay queued, so one final pass covers them all.
                if ctx.config.dry_run && !finished {
                    tokio::time::sleep(QUEUE_POLL).await;
                    continue;
                }
                match upload_stage(&ctx.archive, &ledger, ctx.config.upload_workers).await {
                    Ok(pass) => summary.merge(pass),
                    Err(e) => warn!("Upload pass failed: {e:#}"),
                }
                if finished {
                    break;
                }
                tokio::time::sleep(QUEUE_POLL).await;
            }
            summary
        };

        let (downloaded, summary) = tokio::join!(downloader, uploader);
        let queued = downloaded?;
        info!(queued, uploaded = summary.uploaded, "Tamil Nadu mirror finished");
        Ok(summary)
    }
}
