//! Assam Legislative Assembly debates from the ALA digital library (DSpace).

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use url::Url;

use super::traits::{Legislature, SiteProfile};
use crate::constants::{CHECKPOINT_INTERVAL, PARLIAMENT_COLLECTION};
use crate::fetch::{DownloadOptions, PdfCheck};
use crate::pipeline::{
    processing_timestamp, Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary,
};
use crate::text::element_text_compact;

const BASE_URL: &str = "http://aladigitallibrary.in";
const COLLECTIONS_PATH: &str = "/handle/123456789/29";

static COLLECTION_YEAR: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"Debates-(\d{4})").unwrap());

static DATE_PATTERNS: std::sync::LazyLock<[Regex; 2]> = std::sync::LazyLock::new(|| {
    [
        Regex::new(r"(?i)(\d{1,2})(?:st|nd|rd|th)?[_\-\s]+(\w+)[_\-\s]+(\d{4})").unwrap(),
        Regex::new(r"(?i)ALA_Debates_The_(\d{1,2})(?:st|nd|rd|th)?[_\-\s]+(\w+)[_\-\s]+(\d{4})")
            .unwrap(),
    ]
});

static ANY_YEAR: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d{4})").unwrap());

static LINK_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));
static ROW_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("tr").expect("Invalid selector"));

/// Fields written as sidecar keys but not copied into prefixed item metadata.
const EXCLUDED_FIELDS: &[&str] = &[
    "url",
    "source_url",
    "processing_date",
    "filename",
    "identifier",
    "date",
    "date_formatted",
    "title",
    "collection",
];

/// A yearly debates collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub title: String,
    pub year: String,
    pub url: String,
    pub handle: String,
}

/// A sitting date pulled out of a file label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SittingDate {
    /// ISO `YYYY-MM-DD`.
    pub date: String,
    /// e.g. `16 March 2020`.
    pub formatted: String,
    /// No date could be found; `date` is January 1 of the collection year.
    pub fallback: bool,
}

/// Assam Legislative Assembly.
pub struct Assam {
    base_url: String,
    profile: SiteProfile,
}

impl Assam {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the scraper at another host.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Assam Legislative Assembly",
                search_creator: "Assam Legislative Assembly",
                search_prefix: "assamlegislature.",
                languages: &["English", "Assamese"],
                subjects: &["Assam Legislative Assembly"],
                collection: Some(PARLIAMENT_COLLECTION),
                field_prefix: "assam_legislature_",
                delay: Duration::from_secs(2),
            },
        }
    }

    async fn documents_in_collection(
        &self,
        ctx: &MirrorContext,
        collection: &Collection,
    ) -> Result<Vec<PendingDocument>> {
        info!(collection = %collection.title, "Fetching collection");
        let html = ctx.fetcher.get_text(&collection.url).await?;
        let items = parse_item_links(&html, &self.base_url);

        let mut documents = Vec::new();
        for (item_url, item_title) in items {
            info!(item = %item_title, url = %item_url, "Found item");
            let page = match ctx.fetcher.get_text(&item_url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %item_url, "Failed to fetch item page: {e:#}");
                    continue;
                }
            };
            for (pdf_url, label) in parse_pdf_links(&page, &self.base_url) {
                let source = if label.is_empty() { &item_title } else { &label };
                let date = extract_date(source, &collection.year);
                if date.fallback {
                    warn!(label = %source, date = %date.date, "No sitting date in label");
                }
                documents.push(self.pending_document(ctx, collection, &pdf_url, &date));
            }
        }
        Ok(documents)
    }

    fn pending_document(
        &self,
        ctx: &MirrorContext,
        collection: &Collection,
        pdf_url: &str,
        date: &SittingDate,
    ) -> PendingDocument {
        let identifier = format!("assamlegislature.{}", date.date);
        let filename = format!("{}.pdf", date.date);

        let sidecar = sitting_sidecar(collection, pdf_url, date, &identifier, &filename);

        PendingDocument {
            item: item_metadata(&self.profile, &sidecar, collection, pdf_url, &date.date),
            files: vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&filename),
                pdf_url,
                DownloadOptions {
                    referer: Some(collection.url.clone()),
                    check: PdfCheck::lenient(),
                },
            )],
            metadata_path: ctx.workspace.metadata_path(&date.date),
            sidecar,
            identifier,
            check_remote: true,
            cleanup: Cleanup::All,
        }
    }
}

impl Default for Assam {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for Assam {
    fn site_id(&self) -> &'static str {
        "assam"
    }

    fn name(&self) -> &'static str {
        "Assam Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["as"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        let listing_url = format!("{}{COLLECTIONS_PATH}", self.base_url);
        info!(url = %listing_url, "Fetching collections list");
        let collections = match ctx.fetcher.get_text(&listing_url).await {
            Ok(html) => parse_collections(&html, &self.base_url),
            Err(e) => {
                warn!("Error fetching collections list: {e:#}");
                Vec::new()
            }
        };
        if collections.is_empty() {
            bail!("Failed to fetch collections list");
        }
        info!(count = collections.len(), "Found collections");

        let mut summary = RunSummary::default();
        for (i, collection) in collections.iter().enumerate() {
            info!(
                "Processing collection {}/{}: {}",
                i + 1,
                collections.len(),
                collection.title
            );
            let documents = match self.documents_in_collection(ctx, collection).await {
                Ok(documents) => documents,
                Err(e) => {
                    warn!(collection = %collection.title, "Failed to list collection: {e:#}");
                    Vec::new()
                }
            };
            if documents.is_empty() {
                warn!(collection = %collection.title, "No documents found in collection");
                continue;
            }

            for (j, doc) in documents.iter().enumerate() {
                ctx.process_and_record(&mut summary, doc).await;
                ctx.checkpoint(j + 1, CHECKPOINT_INTERVAL).await;
            }
            ctx.fetcher.pause().await;
        }

        Ok(summary)
    }
}

/// Build the archive metadata for one sitting.
fn item_metadata(
    profile: &SiteProfile,
    sidecar: &Map<String, Value>,
    collection: &Collection,
    pdf_url: &str,
    date: &str,
) -> crate::archive::ItemMetadata {
    let mut meta = profile.item_metadata(pdf_url);
    meta.set("title", date);
    meta.set(
        "description",
        format!("Assam Legislative Assembly proceedings for {date}"),
    );
    meta.set("date", date);
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta.set("assam_legislature_collection", collection.title.as_str());
    meta.set("assam_legislature_collection_url", collection.url.as_str());
    meta
}

fn sitting_sidecar(
    collection: &Collection,
    pdf_url: &str,
    date: &SittingDate,
    identifier: &str,
    filename: &str,
) -> Map<String, Value> {
    let mut sidecar = Map::new();
    sidecar.insert("title".into(), json!(date.date));
    sidecar.insert("filename".into(), json!(filename));
    sidecar.insert("url".into(), json!(pdf_url));
    sidecar.insert("collection".into(), json!(collection));
    sidecar.insert("date".into(), json!(date.date));
    sidecar.insert("date_formatted".into(), json!(date.formatted));
    sidecar.insert("date_fallback".into(), json!(date.fallback));
    sidecar.insert("identifier".into(), json!(identifier));
    sidecar.insert("processing_date".into(), json!(processing_timestamp()));
    sidecar.insert("source_url".into(), json!(pdf_url));
    sidecar
}

fn join(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(String::from)
}

/// Yearly collections on the listing page, oldest first.
#[must_use]
pub fn parse_collections(html: &str, base_url: &str) -> Vec<Collection> {
    let document = Html::parse_document(html);
    let mut collections: Vec<Collection> = document
        .select(&LINK_SELECTOR)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let text = element_text_compact(&link);
            if !text.contains("Assam Legislative Assembly Debates-") || !href.starts_with("/handle/")
            {
                return None;
            }
            let year = COLLECTION_YEAR.captures(&text)?[1].to_string();
            Some(Collection {
                url: join(base_url, href)?,
                handle: href.to_string(),
                title: text,
                year,
            })
        })
        .collect();
    collections.sort_by_key(|c| c.year.parse::<u32>().unwrap_or(0));
    collections
}

/// `(url, title)` of every item linked from a collection's table rows.
#[must_use]
pub fn parse_item_links(html: &str, base_url: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let mut items = Vec::new();
    for row in document.select(&ROW_SELECTOR) {
        for link in row.select(&LINK_SELECTOR) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = element_text_compact(&link);
            if href.contains("/handle/") && !text.is_empty() {
                if let Some(url) = join(base_url, href) {
                    items.push((url, text));
                }
            }
        }
    }
    items
}

/// `(url, label)` of every PDF linked from an item page.
#[must_use]
pub fn parse_pdf_links(html: &str, base_url: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let text = element_text_compact(&link);
            if text == "View/Open" {
                return None;
            }
            if !(href.ends_with(".pdf") || href.to_lowercase().contains("pdf")) {
                return None;
            }
            Some((join(base_url, href)?, text))
        })
        .collect()
}

fn month_number(name: &str) -> Option<(&'static str, &'static str)> {
    let month = match name.to_lowercase().as_str() {
        "january" | "jan" => ("01", "January"),
        "february" | "feb" => ("02", "February"),
        "march" | "mar" => ("03", "March"),
        "april" | "apr" => ("04", "April"),
        "may" => ("05", "May"),
        "june" | "jun" => ("06", "June"),
        "july" | "jul" => ("07", "July"),
        "august" | "aug" => ("08", "August"),
        "september" | "sep" | "sept" => ("09", "September"),
        "october" | "oct" => ("10", "October"),
        "november" | "nov" => ("11", "November"),
        "december" | "dec" => ("12", "December"),
        _ => return None,
    };
    Some(month)
}

/// Pull a sitting date out of a label like `16th_March_2020`.
///
/// Falls back to January 1 of `collection_year` when the label has no usable date.
#[must_use]
pub fn extract_date(label: &str, collection_year: &str) -> SittingDate {
    for pattern in DATE_PATTERNS.iter() {
        let Some(caps) = pattern.captures(label) else {
            continue;
        };
        let day: String = caps[1].chars().filter(char::is_ascii_digit).collect();
        if day.is_empty() {
            continue;
        }
        let Some((month, display)) = month_number(&caps[2]) else {
            warn!(month = %&caps[2], label = %label, "Unknown month");
            continue;
        };
        let year = &caps[3];
        return SittingDate {
            date: format!("{year}-{month}-{day:0>2}"),
            formatted: format!("{day} {display} {year}"),
            fallback: false,
        };
    }

    let fallback = ANY_YEAR
        .captures(label)
        .is_none_or(|caps| &caps[1] != collection_year);
    SittingDate {
        date: format!("{collection_year}-01-01"),
        formatted: format!("1 January {collection_year}"),
        fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collections_sorted_by_year() {
        let html = r#"<html><body>
            <a href="/handle/123456789/50">Assam Legislative Assembly Debates-1999</a>
            <a href="/handle/123456789/40">Assam Legislative Assembly Debates-1972</a>
            <a href="/handle/123456789/60">Something else</a>
            <a href="http://elsewhere/handle/1">Assam Legislative Assembly Debates-2001</a>
        </body></html>"#;
        let collections = parse_collections(html, BASE_URL);
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].year, "1972");
        assert_eq!(
            collections[0].url,
            "http://aladigitallibrary.in/handle/123456789/40"
        );
        assert_eq!(collections[1].handle, "/handle/123456789/50");
    }

    #[test]
    fn test_parse_item_and_pdf_links() {
        let collection = r#"<table>
            <tr><td><a href="/handle/123456789/901">16th March 1999</a></td></tr>
            <tr><td><a href="/handle/123456789/902"></a></td></tr>
            <tr><td><a href="/browse?type=author">Author</a></td></tr>
        </table>"#;
        let items = parse_item_links(collection, BASE_URL);
        assert_eq!(
            items,
            vec![(
                "http://aladigitallibrary.in/handle/123456789/901".to_string(),
                "16th March 1999".to_string()
            )]
        );

        let item = r#"<div>
            <a href="/bitstream/123456789/901/1/ALA_Debates_The_16th_March_1999.pdf">ALA_Debates_The_16th_March_1999.pdf</a>
            <a href="/bitstream/123456789/901/1/ALA_Debates_The_16th_March_1999.pdf">View/Open</a>
            <a href="/handle/123456789/901?mode=full">Show full item record</a>
        </div>"#;
        let pdfs = parse_pdf_links(item, BASE_URL);
        assert_eq!(pdfs.len(), 1);
        assert!(pdfs[0].0.ends_with("ALA_Debates_The_16th_March_1999.pdf"));
    }

    #[test]
    fn test_extract_date_from_label() {
        let date = extract_date("ALA_Debates_The_16th_March_1999.pdf", "1999");
        assert_eq!(date.date, "1999-03-16");
        assert_eq!(date.formatted, "16 March 1999");
        assert!(!date.fallback);

        let date = extract_date("3 sept 1985", "1985");
        assert_eq!(date.date, "1985-09-03");
        assert_eq!(date.formatted, "3 September 1985");
    }

    #[test]
    fn test_extract_date_fallbacks() {
        let date = extract_date("Proceedings 1999", "1999");
        assert_eq!(date.date, "1999-01-01");
        assert!(!date.fallback);

        let date = extract_date("12 Smarch 1999", "1999");
        assert_eq!(date.date, "1999-01-01");

        let date = extract_date("Untitled", "1972");
        assert_eq!(date.date, "1972-01-01");
        assert_eq!(date.formatted, "1 January 1972");
        assert!(date.fallback);
    }

    #[test]
    fn test_sidecar_records_date_fallback() {
        let collection = Collection {
            title: "Assam Legislative Assembly Debates-1972".into(),
            year: "1972".into(),
            url: "http://aladigitallibrary.in/handle/123456789/7".into(),
            handle: "/handle/123456789/7".into(),
        };
        let date = extract_date("Untitled", "1972");
        let sidecar = sitting_sidecar(
            &collection,
            "http://x/a.pdf",
            &date,
            "assamlegislature.1972-01-01",
            "1972-01-01.pdf",
        );
        assert_eq!(sidecar["date_fallback"], json!(true));
        assert_eq!(sidecar["date"], json!("1972-01-01"));

        let site = Assam::new();
        let meta = item_metadata(
            site.profile(),
            &sidecar,
            &collection,
            "http://x/a.pdf",
            &date.date,
        );
        assert_eq!(meta.get_str("assam_legislature_date_fallback"), Some("true"));

        let date = extract_date("ALA_Debates_The_16th_March_1999.pdf", "1999");
        let sidecar = sitting_sidecar(
            &collection,
            "http://x/b.pdf",
            &date,
            "assamlegislature.1999-03-16",
            "1999-03-16.pdf",
        );
        assert_eq!(sidecar["date_fallback"], json!(false));
    }

    #[test]
    fn test_item_metadata_fields() {
        let site = Assam::new();
        let collection = Collection {
            title: "Assam Legislative Assembly Debates-1999".into(),
            year: "1999".into(),
            url: "http://aladigitallibrary.in/handle/123456789/50".into(),
            handle: "/handle/123456789/50".into(),
        };
        let mut sidecar = Map::new();
        sidecar.insert("title".into(), json!("1999-03-16"));
        sidecar.insert("date".into(), json!("1999-03-16"));
        let meta = item_metadata(
            site.profile(),
            &sidecar,
            &collection,
            "http://x/a.pdf",
            "1999-03-16",
        );
        assert_eq!(meta.get_str("creator"), Some("Assam Legislative Assembly"));
        assert_eq!(meta.get_str("collection"), Some("parliamentofindia"));
        assert_eq!(meta.get_str("source"), Some("http://x/a.pdf"));
        assert_eq!(
            meta.get_str("description"),
            Some("Assam Legislative Assembly proceedings for 1999-03-16")
        );
        assert_eq!(
            meta.get_str("assam_legislature_collection"),
            Some("Assam Legislative Assembly Debates-1999")
        );
        assert!(meta.get("assam_legislature_title").is_none());
    }
}
