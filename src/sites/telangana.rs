//! Telangana State Legislature debates from the archives tree.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{Legislature, SiteProfile};
use crate::archive::ItemMetadata;
use crate::constants::PARLIAMENT_COLLECTION;
use crate::fetch::{DownloadOptions, PdfCheck};
use crate::pipeline::{
    processing_timestamp, Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary,
};
use crate::text::{dmy_to_iso, element_text_compact};

const BASE_URL: &str = "https://legislature.telangana.gov.in";
const TREE_FILE: &str = "archives_tree.html";
const CHECKPOINT_EVERY: usize = 10;

/// Formed in 2014; earlier terms belong to the united Andhra Pradesh legislature.
const FIRST_TELANGANA_YEAR: u32 = 2014;

const EXCLUDED_FIELDS: &[&str] = &[
    "url",
    "source_url",
    "processing_date",
    "identifier",
    "filename",
];

static FILE_NAME_PARAM: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"fileName=([^&]+)").unwrap());
static DMY: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d{2}-\d{2}-\d{4})").unwrap());
static DAY_NUMBER: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"day\s*(\d+)").unwrap());
static YEAR: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d{4})").unwrap());

static TREE: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("ul.tree").expect("Invalid selector"));
static HOUSE_TOGGLER: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("span.English.toggler").expect("Invalid selector")
});
static SPAN: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("span").expect("Invalid selector"));
static UL: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("ul").expect("Invalid selector"));
static ANCHOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a").expect("Invalid selector"));

/// One sitting day's debate PDF in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeDocument {
    pub house: String,
    pub term: String,
    pub session: String,
    pub sitting: String,
    pub day: String,
    pub filename: String,
    pub url: String,
    /// Archive identifier.
    pub identifier: String,
}

/// Telangana State Legislature.
pub struct Telangana {
    base_url: String,
    profile: SiteProfile,
}

impl Telangana {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Telangana State Legislature",
                search_creator: "Telangana State Legislature",
                search_prefix: "telanganalegislature.",
                languages: &["Telugu", "English"],
                subjects: &["Telangana State Legislature"],
                collection: Some(PARLIAMENT_COLLECTION),
                field_prefix: "telangana_legislature_",
                delay: Duration::from_secs(1),
            },
        }
    }

    async fn fetch_tree(&self, ctx: &MirrorContext) -> Result<String> {
        let url = format!("{}/debates", self.base_url);
        info!(url = %url, "Fetching archives tree");
        let html = ctx.fetcher.get_text(&url).await?;
        let path = ctx.workspace.tree_path(TREE_FILE);
        tokio::fs::write(&path, &html)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        ctx.fetcher.pause().await;
        Ok(html)
    }

    fn pending_document(&self, ctx: &MirrorContext, doc: &TreeDocument) -> Result<PendingDocument> {
        let mut sidecar = match serde_json::to_value(doc)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        sidecar.insert("processing_date".into(), json!(processing_timestamp()));
        sidecar.insert("source_url".into(), json!(doc.url));

        let stem = doc.filename.trim_end_matches(".pdf");
        Ok(PendingDocument {
            identifier: doc.identifier.clone(),
            files: vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&doc.filename),
                &doc.url,
                DownloadOptions {
                    referer: None,
                    check: PdfCheck::Strict,
                },
            )],
            metadata_path: ctx.workspace.metadata_path(stem),
            item: item_metadata(&self.profile, doc, &sidecar),
            sidecar,
            check_remote: true,
            cleanup: Cleanup::All,
        })
    }
}

impl Default for Telangana {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for Telangana {
    fn site_id(&self) -> &'static str {
        "telangana"
    }

    fn name(&self) -> &'static str {
        "Telangana State Legislature"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["ts"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        let html = self
            .fetch_tree(ctx)
            .await
            .context("Failed to fetch archives tree")?;
        let documents = parse_tree(&html, &self.base_url);
        if documents.is_empty() {
            bail!("No documents found in archives tree");
        }
        info!(count = documents.len(), "Found Telangana documents to process");

        let mut summary = RunSummary::default();
        for (i, doc) in documents.iter().enumerate() {
            info!(
                identifier = %doc.identifier,
                "Processing document {}/{}",
                i + 1,
                documents.len()
            );
            match self.pending_document(ctx, doc) {
                Ok(pending) => {
                    ctx.process_and_record(&mut summary, &pending).await;
                }
                Err(e) => {
                    warn!(identifier = %doc.identifier, "Failed to prepare document: {e:#}");
                    summary.record(&Err(e));
                }
            }
            ctx.checkpoint(i + 1, CHECKPOINT_EVERY).await;
        }
        Ok(summary)
    }
}

fn item_metadata(
    profile: &SiteProfile,
    doc: &TreeDocument,
    sidecar: &Map<String, Value>,
) -> ItemMetadata {
    let mut meta = profile.item_metadata(&doc.url);
    meta.set("title", format!("{} ({})", doc.house, doc.day));
    meta.set(
        "description",
        format!(
            "Telangana State Legislature {} proceedings - {}, {}, {}, Day {}",
            doc.house, doc.term, doc.session, doc.sitting, doc.day
        ),
    );
    if let Some(date) = dmy_to_iso(&doc.filename) {
        meta.set("date", date);
    }
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta
}

/// Element children of `parent` with the given tag name.
fn children<'a>(parent: ElementRef<'a>, tag: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |e| e.value().name() == tag)
}

/// Text of the first `span` under `element`.
fn span_text(element: ElementRef<'_>) -> Option<String> {
    element.select(&SPAN).next().map(|s| element_text_compact(&s))
}

/// Terms, sessions and links from the united Andhra Pradesh legislature or
/// the former Hyderabad state.
#[must_use]
pub fn is_excluded(href: &str, term: &str, session: &str) -> bool {
    let term_lower = term.to_lowercase();
    if href.contains("aplegislature.org") {
        return true;
    }
    if term_lower.contains("hyderabad") && !term_lower.contains("telangana") {
        return true;
    }
    if term_lower.contains("andhra pradesh") || session.to_lowercase().contains("andhra pradesh") {
        return true;
    }
    YEAR.captures(term)
        .and_then(|c| c[1].parse::<u32>().ok())
        .is_some_and(|year| year < FIRST_TELANGANA_YEAR)
}

/// PDF file name for a day link: the `fileName=` query, a base64 `q=` payload
/// carrying one, a date in the day label, or the day number.
#[must_use]
pub fn extract_filename(href: &str, day: &str) -> Option<String> {
    if let Some(caps) = FILE_NAME_PARAM.captures(href) {
        return Some(caps[1].to_string());
    }

    if let Some((_, encoded)) = href.split_once("q=") {
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        let encoded = urlencoding::decode(encoded).map_or_else(|_| encoded.to_string(), |e| e.into_owned());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some(caps) = decoded.as_deref().and_then(|d| FILE_NAME_PARAM.captures(d)) {
            if let Ok(name) = urlencoding::decode(&caps[1]) {
                return Some(name.into_owned());
            }
        }
    }

    if let Some(caps) = DMY.captures(day) {
        return Some(format!("day_{}.pdf", caps[1].replace('-', "_")));
    }
    DAY_NUMBER
        .captures(&day.to_lowercase())
        .map(|caps| format!("day_{}.pdf", &caps[1]))
}

/// Archive identifier for a document in `house` with PDF `filename`.
#[must_use]
pub fn identifier_for(house: &str, filename: &str) -> String {
    let stem = filename
        .replace(".pdf", "")
        .replace('-', ".")
        .replace(' ', "_")
        .replace("Uploads/", "");
    format!("telanganalegislature.{}.{stem}", house.to_lowercase())
}

/// Walk the archives tree: house, term, session, sitting, then day links.
#[must_use]
pub fn parse_tree(html: &str, base_url: &str) -> Vec<TreeDocument> {
    let document = Html::parse_document(html);
    let Some(tree) = document.select(&TREE).next() else {
        warn!("No main tree found in archives page");
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut documents = Vec::new();
    for house_li in children(tree, "li") {
        let Some(toggler) = house_li.select(&HOUSE_TOGGLER).next() else {
            continue;
        };
        let house_text = element_text_compact(&toggler);
        let house = if house_text.contains("Assembly") {
            "Assembly"
        } else if house_text.contains("Council") {
            "Council"
        } else {
            "Unknown"
        };
        let Some(house_ul) = house_li.select(&UL).next() else {
            continue;
        };

        for term_li in children(house_ul, "li") {
            let Some(term) = span_text(term_li) else {
                continue;
            };
            let term_html = term_li.html();
            if term_html.contains("unitedCouncilID") || term_html.contains("aplegislature.org") {
                info!(house, term = %term, "Skipping pre-bifurcation term");
                continue;
            }

            for session_li in children(term_li, "ul").flat_map(|ul| children(ul, "li")) {
                let Some(session) = span_text(session_li) else {
                    continue;
                };
                for sitting_li in children(session_li, "ul").flat_map(|ul| children(ul, "li")) {
                    let Some(sitting) = span_text(sitting_li) else {
                        continue;
                    };
                    for day_li in children(sitting_li, "ul").flat_map(|ul| children(ul, "li")) {
                        let Some(link) = day_li.select(&ANCHOR).next() else {
                            continue;
                        };
                        let href = link.value().attr("href").unwrap_or_default();
                        let day = element_text_compact(&link)
                            .replace("Day", "")
                            .replace(['(', ')', ' '], "");

                        if href.is_empty() || href == "#" || href.contains("No PDF Found") {
                            continue;
                        }
                        if is_excluded(href, &term, &session) {
                            debug!(day = %day, "Skipping non-Telangana document");
                            continue;
                        }
                        let Some(filename) = extract_filename(href, &day) else {
                            continue;
                        };
                        let url = base
                            .as_ref()
                            .and_then(|b| b.join(href).ok())
                            .map_or_else(|| href.to_string(), String::from);

                        documents.push(TreeDocument {
                            house: house.to_string(),
                            term: term.clone(),
                            session: session.clone(),
                            sitting: sitting.clone(),
                            day,
                            filename: filename.replace(' ', "_").replace("Uploads/", ""),
                            identifier: identifier_for(house, &filename),
                            url,
                        });
                    }
                }
            }
        }
    }
    info!(count = documents.len(), "Parsed archives tree");
    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE_PAGE: &str = r##"<html><body>
    <ul class="tree">
      <li><span class="English toggler">Legislative Assembly</span>
        <ul>
          <li><span>Second Legislative Assembly (2018-2023)</span>
            <ul>
              <li><span>Eighth Session</span>
                <ul>
                  <li><span>First Sitting</span>
                    <ul>
                      <li><a href="https://sessions-legislature.telangana.gov.in/PreviewPage.do?fileName=Uploads/12-03-2021 Assembly.pdf">Day 1 (12-03-2021)</a></li>
                      <li><a href="#">Day 2</a></li>
                      <li><a href="/PreviewPage.do?q=ZmlsZU5hbWU9VXBsb2Fkcy8xNS0wMy0yMDIxLnBkZg==">Day 3</a></li>
                    </ul>
                  </li>
                </ul>
              </li>
            </ul>
          </li>
          <li><span>Combined Legislative Assembly (2014)</span>
            <ul><li><span>Budget Session</span><ul><li><span>Sitting</span><ul>
              <li><a href="/PreviewPage.do?fileName=combined.pdf">Day 1</a></li>
              <li><a href="https://aplegislature.org/doc.pdf">Day 4</a></li>
            </ul></li></ul></li></ul>
          </li>
          <li><span>Thirteenth Legislative Assembly (2009-2014)</span>
            <ul><li><span>First Session</span><ul><li><span>Sitting</span><ul>
              <li><a href="/PreviewPage.do?fileName=old.pdf">Day 1</a></li>
            </ul></li></ul></li></ul>
          </li>
          <li><span>United Council</span><a id="unitedCouncilID" href="#">x</a></li>
        </ul>
      </li>
      <li><span>No toggler here</span></li>
    </ul>
    </body></html>"##;

    #[test]
    fn test_parse_tree() {
        let docs = parse_tree(TREE_PAGE, BASE_URL);
        assert_eq!(docs.len(), 2);
        assert!(!docs.iter().any(|d| d.filename == "combined.pdf"));

        let first = &docs[0];
        assert_eq!(first.house, "Assembly");
        assert_eq!(first.term, "Second Legislative Assembly (2018-2023)");
        assert_eq!(first.session, "Eighth Session");
        assert_eq!(first.sitting, "First Sitting");
        assert_eq!(first.day, "112-03-2021");
        assert_eq!(first.filename, "12-03-2021_Assembly.pdf");
        assert_eq!(
            first.identifier,
            "telanganalegislature.assembly.12.03.2021_Assembly"
        );

        let second = &docs[1];
        assert_eq!(second.filename, "15-03-2021.pdf");
        assert_eq!(second.identifier, "telanganalegislature.assembly.15.03.2021");
        assert_eq!(
            second.url,
            "https://legislature.telangana.gov.in/PreviewPage.do?q=ZmlsZU5hbWU9VXBsb2Fkcy8xNS0wMy0yMDIxLnBkZg=="
        );
    }

    #[test]
    fn test_is_excluded() {
        assert!(is_excluded("https://aplegislature.org/x", "Term", "Session"));
        assert!(is_excluded("/x", "Hyderabad Legislative Assembly", "Session"));
        assert!(!is_excluded("/x", "Telangana Hyderabad Term (2014)", "Session"));
        assert!(is_excluded("/x", "Term", "Andhra Pradesh Budget Session"));
        assert!(is_excluded("/x", "Assembly (1999-2004)", "Session"));
        assert!(!is_excluded("/x", "Assembly (2014-2018)", "Session"));
    }

    #[test]
    fn test_extract_filename_fallbacks() {
        assert_eq!(
            extract_filename("/x?fileName=a.pdf&y=1", ""),
            Some("a.pdf".to_string())
        );
        assert_eq!(
            extract_filename("/x?q=not-base64", "05-06-2019"),
            Some("day_05_06_2019.pdf".to_string())
        );
        assert_eq!(extract_filename("/x", "day 7"), Some("day_7.pdf".to_string()));
        assert_eq!(extract_filename("/x", "7"), None);
    }

    #[test]
    fn test_item_metadata() {
        let site = Telangana::new();
        let doc = parse_tree(TREE_PAGE, BASE_URL).remove(0);
        let mut sidecar = match serde_json::to_value(&doc).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        sidecar.insert("processing_date".into(), json!("2024-01-01T00:00:00"));
        let meta = item_metadata(site.profile(), &doc, &sidecar);
        assert_eq!(meta.get_str("title"), Some("Assembly (112-03-2021)"));
        assert_eq!(meta.get_str("date"), Some("2021-03-12"));
        assert_eq!(meta.get_str("collection"), Some("parliamentofindia"));
        assert_eq!(
            meta.get_str("telangana_legislature_session"),
            Some("Eighth Session")
        );
        assert!(meta.get("telangana_legislature_url").is_none());
        assert!(meta.get("telangana_legislature_filename").is_none());
    }
}
