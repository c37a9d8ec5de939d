//! Rajya Sabha debates from the RS Debates digital library (DSpace handles).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{Legislature, SiteProfile};
use crate::archive::ItemMetadata;
use crate::fetch::{DownloadOptions, PdfCheck};
use crate::pipeline::{Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary};
use crate::text::element_text_compact;
use crate::workspace::exists;

const BASE_URL: &str = "https://rsdebate.nic.in";
const HANDLE_PREFIX: &str = "/handle/123456789/";
const IDENTIFIER_PREFIX: &str = "rsdebate.nic.in.";
const LAST_HANDLE: u64 = 30_000_000;
const BATCH_SIZE: u64 = 10;

static FIELD_ROWS: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("table.itemDisplayTable tr").expect("Invalid selector")
});
static FILE_TABLE: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("table.panel-body").expect("Invalid selector"));
static ROW: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("tr").expect("Invalid selector"));
static CELL: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("td").expect("Invalid selector"));
static LINK: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));

/// Labels the library misspells or pads.
const FIELD_RENAMES: &[(&str, &str)] = &[
    ("minsitry", "ministry"),
    ("ministers_name_\t", "ministers_name"),
];

/// A bitstream attached to a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlePdf {
    pub url: String,
    pub filename: String,
}

/// Rajya Sabha.
pub struct RajyaSabha {
    base_url: String,
    first_handle: Option<u64>,
    last_handle: u64,
    profile: SiteProfile,
}

impl RajyaSabha {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            first_handle: None,
            last_handle: LAST_HANDLE,
            profile: SiteProfile {
                creator: "Rajya Sabha Secretariat",
                search_creator: "Rajya Sabha Secretariat",
                search_prefix: IDENTIFIER_PREFIX,
                languages: &["English", "Hindi"],
                subjects: &["Parliament of India", "Rajya Sabha"],
                collection: None,
                field_prefix: "rsdebate_",
                delay: Duration::from_millis(500),
            },
        }
    }

    /// Walk `first..=last` instead of resuming from the processed-set.
    #[must_use]
    pub fn with_handle_range(mut self, first: u64, last: u64) -> Self {
        self.first_handle = Some(first);
        self.last_handle = last;
        self
    }

    fn handle_url(&self, id: u64) -> String {
        format!("{}{HANDLE_PREFIX}{id}", self.base_url)
    }

    /// Fetch a handle page, using the cached copy when present.
    ///
    /// Returns `None` for a handle that does not exist.
    async fn handle_page(&self, ctx: &MirrorContext, id: u64) -> Result<Option<String>> {
        let path = ctx.workspace.list_path(&format!("{id}.html"));
        if exists(&path).await {
            return tokio::fs::read_to_string(&path)
                .await
                .map(Some)
                .with_context(|| format!("Failed to read {}", path.display()));
        }

        let url = self.handle_url(id);
        debug!(url = %url, "GET");
        let response = ctx
            .fetcher
            .client()
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        ctx.fetcher.pause().await;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => bail!("HTTP {status} for {url}"),
            _ => {}
        }
        let html = response
            .text()
            .await
            .with_context(|| format!("Failed to read body: {url}"))?;
        tokio::fs::write(&path, &html)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Some(html))
    }

    async fn process_handle(&self, ctx: &MirrorContext, summary: &mut RunSummary, id: u64) {
        let identifier = format!("{IDENTIFIER_PREFIX}{id}");
        if ctx.processed.contains(&identifier).await {
            return;
        }

        let html = match self.handle_page(ctx, id).await {
            Ok(Some(html)) => html,
            Ok(None) => {
                debug!(handle = id, "Handle not found");
                return;
            }
            Err(e) => {
                warn!(handle = id, "Failed to fetch handle page: {e:#}");
                return;
            }
        };
        if !html.contains("Appears in Collections") {
            debug!(handle = id, "Not a debate item");
            return;
        }

        let fields = parse_fields(&html);
        let pdfs = parse_pdf_links(&html, &self.base_url);
        if pdfs.is_empty() {
            warn!(handle = id, "No PDFs attached");
        }

        let doc = self.pending_document(ctx, id, identifier, fields, &pdfs);
        ctx.process_and_record(summary, &doc).await;
    }

    fn pending_document(
        &self,
        ctx: &MirrorContext,
        id: u64,
        identifier: String,
        fields: Map<String, Value>,
        pdfs: &[HandlePdf],
    ) -> PendingDocument {
        let handle_url = self.handle_url(id);
        let files = pdfs
            .iter()
            .map(|pdf| {
                DocumentFile::remote(
                    ctx.workspace.pdf_path(&format!("{id}/{}", pdf.filename)),
                    &pdf.url,
                    DownloadOptions {
                        referer: Some(handle_url.clone()),
                        check: PdfCheck::Lenient { min_bytes: 0 },
                    },
                )
            })
            .collect();
        let document_url = pdfs.first().map_or(handle_url.as_str(), |p| p.url.as_str());
        let item = item_metadata(&self.profile, &fields, &handle_url, document_url, &identifier);

        PendingDocument {
            identifier,
            files,
            metadata_path: ctx.workspace.metadata_path(&id.to_string()),
            sidecar: fields,
            item,
            check_remote: false,
            cleanup: Cleanup::Keep,
        }
    }

    /// Drop cached pages, PDFs and sidecars of a finished batch.
    async fn clear_raw(&self, ctx: &MirrorContext) {
        let ws = &ctx.workspace;
        for dir in [ws.documents_dir(), ws.metadata_dir(), ws.list_dir()] {
            if let Err(e) = ws.clear_dir(&dir).await {
                warn!(dir = %dir.display(), "Failed to clear directory: {e:#}");
            }
        }
    }
}

impl Default for RajyaSabha {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for RajyaSabha {
    fn site_id(&self) -> &'static str {
        "rajya-sabha"
    }

    fn name(&self) -> &'static str {
        "Rajya Sabha"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        let first = match self.first_handle {
            Some(first) => first,
            None => ctx
                .processed
                .max_numeric(IDENTIFIER_PREFIX)
                .await
                .map_or(1, |max| max + 1),
        };
        info!(first, last = self.last_handle, "Walking handles");

        let mut summary = RunSummary::default();
        let mut batch_start = first;
        while batch_start <= self.last_handle {
            let batch_end = (batch_start + BATCH_SIZE - 1).min(self.last_handle);
            debug!(from = batch_start, to = batch_end, "Processing batch");
            for id in batch_start..=batch_end {
                self.process_handle(ctx, &mut summary, id).await;
            }
            if let Err(e) = ctx.processed.save().await {
                warn!("Failed to checkpoint processed-set: {e:#}");
            }
            if !ctx.config.dry_run {
                self.clear_raw(ctx).await;
            }
            batch_start = batch_end + 1;
        }

        Ok(summary)
    }
}

fn item_metadata(
    profile: &SiteProfile,
    fields: &Map<String, Value>,
    handle_url: &str,
    document_url: &str,
    identifier: &str,
) -> ItemMetadata {
    let field = |key: &str| fields.get(key).and_then(Value::as_str).filter(|v| !v.is_empty());

    let title = match (field("debate_title"), field("debate_date")) {
        (Some(title), Some(date)) => format!("{title} ({date})"),
        (Some(title), None) => title.to_string(),
        (None, _) => identifier.to_string(),
    };

    let mut meta = profile.item_metadata(handle_url);
    meta.set("title", title.as_str());
    meta.set(
        "description",
        format!("'{title}' from the RS Debates Digital Library"),
    );
    if let Some(date) = field("debate_date") {
        meta.set("date", date);
    }
    meta.extend_prefixed(fields, profile.field_prefix, &[]);
    meta.set("rsdebate_document_url", document_url);
    meta
}

fn field_key(label: &str) -> String {
    let key = label.trim_end_matches(':').to_lowercase().replace(' ', "_");
    FIELD_RENAMES
        .iter()
        .find(|(from, _)| *from == key)
        .map_or(key, |(_, to)| (*to).to_string())
}

/// Label/value pairs from the item display table.
#[must_use]
pub fn parse_fields(html: &str) -> Map<String, Value> {
    let document = Html::parse_document(html);
    let mut fields = Map::new();
    for row in document.select(&FIELD_ROWS) {
        let cells: Vec<_> = row.select(&CELL).collect();
        if cells.len() < 2 {
            continue;
        }
        let key = field_key(&element_text_compact(&cells[0]));
        if key.is_empty() {
            continue;
        }
        fields.insert(key, json!(element_text_compact(&cells[1])));
    }
    fields
}

/// PDFs listed in the item's file table.
#[must_use]
pub fn parse_pdf_links(html: &str, base_url: &str) -> Vec<HandlePdf> {
    let document = Html::parse_document(html);
    let Some(table) = document.select(&FILE_TABLE).next() else {
        return Vec::new();
    };
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };

    let mut pdfs = Vec::new();
    for (idx, row) in table.select(&ROW).skip(1).enumerate() {
        let cells: Vec<_> = row.select(&CELL).collect();
        if cells.len() < 5 {
            continue;
        }
        let Some(href) = cells[0]
            .select(&LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        if !href.to_lowercase().ends_with(".pdf") {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        let filename = url
            .path_segments()
            .and_then(Iterator::last)
            .filter(|name| name.to_lowercase().ends_with(".pdf"))
            .map(|name| {
                urlencoding::decode(name).map_or_else(|_| name.to_string(), |n| n.into_owned())
            })
            .unwrap_or_else(|| format!("document_{idx}.pdf"));
        pdfs.push(HandlePdf {
            url: url.to_string(),
            filename,
        });
    }
    pdfs
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_PAGE: &str = r##"<html><body>
        <table class="table itemDisplayTable">
            <tr><td class="metadataFieldLabel">Debate Title:&nbsp;</td><td>Question Hour</td></tr>
            <tr><td class="metadataFieldLabel">Debate Date:</td><td>12-03-1985</td></tr>
            <tr><td class="metadataFieldLabel">Minsitry:</td><td>Finance</td></tr>
            <tr><td class="metadataFieldLabel">Ministers Name </td><td>  Someone  </td></tr>
            <tr><td>lonely cell</td></tr>
        </table>
        <table class="table panel-body">
            <tr><th>File</th><th>Description</th><th>Size</th><th>Format</th><th></th></tr>
            <tr>
                <td><a href="/bitstream/123456789/42/1/PR_12031985.pdf">PR_12031985.pdf</a></td>
                <td></td><td>1.2 MB</td><td>Adobe PDF</td><td><a href="#">View/Open</a></td>
            </tr>
            <tr>
                <td><a href="/bitstream/123456789/42/2/notes.txt">notes.txt</a></td>
                <td></td><td>1 kB</td><td>Text</td><td></td>
            </tr>
            <tr><td><a href="/x.pdf">short row</a></td></tr>
        </table>
        <h4>Appears in Collections:</h4>
    </body></html>"##;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(ITEM_PAGE);
        assert_eq!(fields["debate_title"], "Question Hour");
        assert_eq!(fields["debate_date"], "12-03-1985");
        assert_eq!(fields["ministry"], "Finance");
        assert_eq!(fields["ministers_name"], "Someone");
        assert!(!fields.contains_key("minsitry"));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn test_field_key_renames() {
        assert_eq!(field_key("Debate Type:"), "debate_type");
        assert_eq!(field_key("Minsitry:"), "ministry");
        assert_eq!(field_key("Ministers Name \t:"), "ministers_name");
    }

    #[test]
    fn test_parse_pdf_links() {
        let pdfs = parse_pdf_links(ITEM_PAGE, BASE_URL);
        assert_eq!(
            pdfs,
            vec![HandlePdf {
                url: "https://rsdebate.nic.in/bitstream/123456789/42/1/PR_12031985.pdf".into(),
                filename: "PR_12031985.pdf".into(),
            }]
        );
        assert!(parse_pdf_links("<p>nothing</p>", BASE_URL).is_empty());
    }

    #[test]
    fn test_item_metadata() {
        let site = RajyaSabha::new();
        let fields = parse_fields(ITEM_PAGE);
        let meta = item_metadata(
            site.profile(),
            &fields,
            "https://rsdebate.nic.in/handle/123456789/42",
            "https://rsdebate.nic.in/bitstream/123456789/42/1/PR_12031985.pdf",
            "rsdebate.nic.in.42",
        );
        assert_eq!(meta.get_str("title"), Some("Question Hour (12-03-1985)"));
        assert_eq!(
            meta.get_str("description"),
            Some("'Question Hour (12-03-1985)' from the RS Debates Digital Library")
        );
        assert_eq!(meta.get_str("creator"), Some("Rajya Sabha Secretariat"));
        assert_eq!(meta.get_str("rsdebate_ministry"), Some("Finance"));
        assert_eq!(meta.get_str("rsdebate_debate_title"), Some("Question Hour"));
        assert!(meta.get("collection").is_none());
        assert!(meta
            .get_str("rsdebate_document_url")
            .is_some_and(|u| u.ends_with("PR_12031985.pdf")));
    }

    #[test]
    fn test_title_falls_back_to_identifier() {
        let site = RajyaSabha::new();
        let meta = item_metadata(site.profile(), &Map::new(), "u", "u", "rsdebate.nic.in.7");
        assert_eq!(meta.get_str("title"), Some("rsdebate.nic.in.7"));
        assert!(meta.get("date").is_none());
    }
}
