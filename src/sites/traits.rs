use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::archive::ItemMetadata;
use crate::pipeline::{MirrorContext, RunSummary};

/// Fixed archive metadata and politeness settings for one legislature.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// `creator` written on uploaded items.
    pub creator: &'static str,
    /// Creator searched for when seeding the processed-set.
    pub search_creator: &'static str,
    /// Only search hits starting with this prefix are treated as ours.
    pub search_prefix: &'static str,
    pub languages: &'static [&'static str],
    pub subjects: &'static [&'static str],
    pub collection: Option<&'static str>,
    /// Prefix for site-specific metadata fields copied from the sidecar.
    pub field_prefix: &'static str,
    /// Default delay between requests.
    pub delay: Duration,
}

impl SiteProfile {
    /// Base item metadata with `source` set.
    #[must_use]
    pub fn item_metadata(&self, source: &str) -> ItemMetadata {
        let mut meta = ItemMetadata::from_profile(self);
        meta.set("source", source);
        meta
    }
}

/// A legislature whose proceedings can be mirrored.
#[async_trait]
pub trait Legislature: Send + Sync {
    /// Unique identifier, also the name of the site's data directory.
    fn site_id(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Short names accepted on the command line.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn profile(&self) -> &SiteProfile;

    /// Check if this site answers to `name` (its id or one of its aliases).
    fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.site_id() == name || self.aliases().iter().any(|a| *a == name)
    }

    /// Mirror every document the site publishes.
    ///
    /// # Errors
    ///
    /// Returns an error only when the site's initial listing cannot be
    /// fetched. Failures of individual documents are logged and counted.
    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary>;
}
