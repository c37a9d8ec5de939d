//! Rajasthan Legislative Assembly house proceedings.
//!
//! The proceedings page is an ASP.NET WebForm: houses are selected and PDFs
//! are requested through postbacks that must carry the page's current view
//! state.

mod postback;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use url::Url;

pub use postback::PageState;

use super::traits::{Legislature, SiteProfile};
use crate::archive::ItemMetadata;
use crate::constants::{CHECKPOINT_INTERVAL, PARLIAMENT_COLLECTION};
use crate::fetch::{content_type_of, DownloadOptions, PdfCheck};
use crate::pipeline::{
    processing_timestamp, Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary,
};
use crate::text::{dmy_to_iso, element_text, element_text_compact, roman_to_int};
use crate::workspace::{exists, read_json};

const BASE_URL: &str = "https://rlaaprise.rajasthan.gov.in";
const PROCEEDINGS_PAGE: &str = "HouseProceedingView.aspx";
const HOUSES: std::ops::RangeInclusive<u32> = 1..=16;

const EXCLUDED_FIELDS: &[&str] = &[
    "source_url",
    "processing_date",
    "filename",
    "event_target",
    "assembly_ordinal",
    "session_roman",
    "house_id",
    "session_id",
    "date_text",
    "identifier",
    "session_name",
    "house_text",
];

static SESSION_INFO: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(st|nd|rd|th)\s+Assembly,?\s+([IVX]+)\s+Session").unwrap()
});
static QUOTED: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"'([^']+)'").unwrap());
static WINDOW_OPEN: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r#"window\.open\(['"]\./(.*?\.pdf)['"]"#).unwrap()
});

static SESSION_SPANS: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse(r#"span[id*="LblInfo"][id*="Outer"]"#).expect("Invalid selector")
});
static SPAN_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("span[id]").expect("Invalid selector"));
static TABLE_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("table[id]").expect("Invalid selector"));
static DATE_BUTTONS: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse(r#"a[id*="LinkButton2"]"#).expect("Invalid selector")
});
static ONCLICK_LINKS: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[onclick]").expect("Invalid selector"));

/// Assembly and session numbers parsed from a session heading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub assembly_number: Option<u32>,
    pub session_number: Option<u32>,
    pub assembly_ordinal: Option<String>,
    pub session_roman: Option<String>,
}

/// One sitting day: a postback target that yields the day's PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sitting {
    pub house_id: u32,
    pub session_id: String,
    pub event_target: String,
    pub date_text: String,
    pub identifier: String,
    #[serde(flatten)]
    pub session: SessionInfo,
    pub session_name: String,
    pub house_text: String,
}

impl Sitting {
    fn date_slug(&self) -> String {
        self.date_text.replace('/', "-")
    }

    #[must_use]
    pub fn filename(&self) -> String {
        format!(
            "assembly{}_session{}_{}.pdf",
            self.house_id,
            self.session.session_number.unwrap_or_default(),
            self.date_slug()
        )
    }
}

/// Rajasthan Legislative Assembly.
pub struct Rajasthan {
    base_url: String,
    profile: SiteProfile,
}

impl Rajasthan {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Rajasthan Legislative Assembly",
                search_creator: "Rajasthan Legislative Assembly",
                search_prefix: "rajasthanlegislature.",
                languages: &["Hindi", "English"],
                subjects: &["Rajasthan Legislative Assembly"],
                collection: Some(PARLIAMENT_COLLECTION),
                field_prefix: "rajasthan_legislature_",
                delay: Duration::from_secs(1),
            },
        }
    }

    fn page_url(&self) -> String {
        format!("{}/{PROCEEDINGS_PAGE}", self.base_url)
    }

    fn postback_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&self.page_url())?);
        Ok(headers)
    }

    /// Select a house and return the sittings listed for it.
    async fn house_sittings(
        &self,
        ctx: &MirrorContext,
        state: &mut PageState,
        house: u32,
    ) -> Result<Vec<Sitting>> {
        info!(house, "Getting sessions for house");
        let form = state.form(postback::HOUSE_FIELD, house);
        let html = ctx
            .fetcher
            .post_form(&self.page_url(), &form, self.postback_headers()?)
            .await?
            .text()
            .await
            .context("Failed to read house page")?;
        state.update(&html);
        ctx.fetcher.pause().await;
        Ok(parse_sittings(&html, house))
    }

    /// Fire the sitting's postback and save the PDF to `dest`.
    ///
    /// Returns the URL the PDF came from.
    async fn download(
        &self,
        ctx: &MirrorContext,
        state: &mut PageState,
        sitting: &Sitting,
        dest: &Path,
    ) -> Result<String> {
        let page_url = self.page_url();
        let form = state.form(&sitting.event_target, sitting.house_id);
        let response = ctx
            .fetcher
            .post_form(&page_url, &form, self.postback_headers()?)
            .await?;

        if content_type_of(&response).contains("application/pdf") {
            ctx.fetcher
                .save_pdf_response(response, &page_url, dest, PdfCheck::Strict)
                .await?;
            ctx.fetcher.pause().await;
            return Ok(page_url);
        }

        let html = response
            .text()
            .await
            .context("Failed to read postback response")?;
        state.update(&html);
        let path = WINDOW_OPEN
            .captures(&html)
            .map(|c| c[1].to_string())
            .context("Postback response has no PDF link")?;
        let pdf_url = Url::parse(&format!("{}/", self.base_url))?
            .join(&path)?
            .to_string();
        info!(url = %pdf_url, "Found PDF URL in postback response");

        ctx.fetcher
            .download_pdf(&pdf_url, dest, &DownloadOptions::default())
            .await?;
        Ok(pdf_url)
    }

    /// Source URL recorded by an earlier run, if its sidecar is still around.
    async fn recorded_source(&self, ctx: &MirrorContext, stem: &str) -> Option<String> {
        let sidecar = read_json(&ctx.workspace.metadata_path(stem)).await.ok()?;
        sidecar.get("source_url")?.as_str().map(String::from)
    }

    async fn process_sitting(
        &self,
        ctx: &MirrorContext,
        state: &mut PageState,
        sitting: &Sitting,
        summary: &mut RunSummary,
    ) {
        match ctx.precheck(&sitting.identifier, true).await {
            Ok(Some(outcome)) => {
                summary.record(&Ok(outcome));
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(identifier = %sitting.identifier, "Failed to check document: {e:#}");
                summary.record(&Err(e));
                return;
            }
        }

        let filename = sitting.filename();
        let stem = filename.trim_end_matches(".pdf").to_string();
        let pdf_path = ctx.workspace.pdf_path(&filename);

        let source_url = if exists(&pdf_path).await {
            self.recorded_source(ctx, &stem)
                .await
                .unwrap_or_else(|| self.page_url())
        } else {
            info!(date = %sitting.date_text, "Downloading document");
            match self.download(ctx, state, sitting, &pdf_path).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(identifier = %sitting.identifier, "Failed to download PDF: {e:#}");
                    summary.record(&Err(e));
                    return;
                }
            }
        };

        let mut sidecar = match serde_json::to_value(sitting) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        sidecar.insert("filename".into(), json!(filename));
        sidecar.insert("processing_date".into(), json!(processing_timestamp()));
        sidecar.insert("source_url".into(), json!(source_url));

        let doc = PendingDocument {
            identifier: sitting.identifier.clone(),
            item: item_metadata(&self.profile, sitting, &sidecar, &source_url),
            files: vec![DocumentFile::local(pdf_path)],
            metadata_path: ctx.workspace.metadata_path(&stem),
            sidecar,
            check_remote: false,
            cleanup: Cleanup::All,
        };
        ctx.process_and_record(summary, &doc).await;
    }
}

impl Default for Rajasthan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for Rajasthan {
    fn site_id(&self) -> &'static str {
        "rajasthan"
    }

    fn name(&self) -> &'static str {
        "Rajasthan Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["rj"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        info!("Fetching initial house proceedings page");
        let html = ctx
            .fetcher
            .get_text(&self.page_url())
            .await
            .context("Failed to fetch initial page")?;
        let mut state = PageState::default();
        state.update(&html);
        if state.is_empty() {
            bail!("Initial page carries no view state");
        }
        ctx.fetcher.pause().await;

        let mut summary = RunSummary::default();
        let mut found = 0;
        for house in HOUSES {
            let sittings = match self.house_sittings(ctx, &mut state, house).await {
                Ok(sittings) => sittings,
                Err(e) => {
                    warn!(house, "Error getting sessions: {e:#}");
                    continue;
                }
            };
            if sittings.is_empty() {
                warn!(house, "No sessions found");
                continue;
            }
            info!(house, count = sittings.len(), "Found sittings");

            for sitting in &sittings {
                found += 1;
                self.process_sitting(ctx, &mut state, sitting, &mut summary)
                    .await;
                ctx.checkpoint(found, CHECKPOINT_INTERVAL).await;
            }
        }

        if found == 0 {
            bail!("No documents found to process");
        }
        Ok(summary)
    }
}

/// Parse `15th Assembly, VII Session [...]`.
#[must_use]
pub fn parse_session_info(text: &str) -> SessionInfo {
    let Some(caps) = SESSION_INFO.captures(text) else {
        warn!(text = %text, "Could not parse assembly/session info");
        return SessionInfo::default();
    };
    SessionInfo {
        assembly_number: caps[1].parse().ok(),
        session_number: roman_to_int(&caps[3]),
        assembly_ordinal: Some(format!("{}{}", &caps[1], &caps[2])),
        session_roman: Some(caps[3].to_string()),
    }
}

fn find_by_id<'a>(document: &'a Html, selector: &Selector, id: &str) -> Option<ElementRef<'a>> {
    document
        .select(selector)
        .find(|el| el.value().id() == Some(id))
}

/// Every sitting listed on a house page.
///
/// Sittings whose session number cannot be determined are logged and dropped,
/// since the number is part of the identifier.
#[must_use]
pub fn parse_sittings(html: &str, house: u32) -> Vec<Sitting> {
    let document = Html::parse_document(html);
    let mut sittings = Vec::new();

    for (index, span) in document.select(&SESSION_SPANS).enumerate() {
        let Some(span_id) = span.value().id() else {
            continue;
        };
        let session_name = element_text(&span);
        let house_text = find_by_id(&document, &SPAN_SELECTOR, &span_id.replace("LblInfo", "LblHouse"))
            .map_or_else(|| format!("House {house}"), |s| element_text(&s));
        let session = parse_session_info(&format!("{house_text} {session_name}"));

        let Some(table) = find_by_id(&document, &TABLE_SELECTOR, &span_id.replace("LblInfo", "DataList1"))
        else {
            continue;
        };
        let mut links: Vec<ElementRef<'_>> = table.select(&DATE_BUTTONS).collect();
        if links.is_empty() {
            links = table.select(&ONCLICK_LINKS).collect();
        }

        let Some(session_number) = session.session_number else {
            if !links.is_empty() {
                warn!(session = %session_name, "Skipping session without a session number");
            }
            continue;
        };

        for link in links {
            let onclick = link.value().attr("onclick").unwrap_or("");
            let href = link.value().attr("href").unwrap_or("");
            if !onclick.contains("__doPostBack") && !href.contains("__doPostBack") {
                continue;
            }
            let source = if onclick.is_empty() { href } else { onclick };
            let Some(target) = QUOTED.captures(source).map(|c| c[1].to_string()) else {
                continue;
            };
            let date_text = element_text_compact(&link);
            if date_text.is_empty() || date_text == "unknown_date" {
                continue;
            }

            sittings.push(Sitting {
                house_id: house,
                session_id: format!("session_{}", index + 1),
                event_target: target,
                identifier: format!(
                    "rajasthanlegislature.assembly{house}.session{session_number}.{}",
                    date_text.replace('/', "-")
                ),
                date_text,
                session: session.clone(),
                session_name: session_name.clone(),
                house_text: house_text.clone(),
            });
        }
    }
    sittings
}

fn item_metadata(
    profile: &SiteProfile,
    sitting: &Sitting,
    sidecar: &Map<String, Value>,
    source_url: &str,
) -> ItemMetadata {
    let assembly = sitting
        .session
        .assembly_number
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    let session = sitting
        .session
        .session_number
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());

    let mut meta = profile.item_metadata(source_url);
    meta.set(
        "title",
        format!("Assembly {assembly}, Session {session}, {}", sitting.date_text),
    );
    meta.set(
        "description",
        format!(
            "Rajasthan Legislative Assembly proceedings for Assembly {assembly}, Session {session} on {}",
            sitting.date_text
        ),
    );
    if let Some(date) = dmy_to_iso(&sitting.date_text) {
        meta.set("date", date);
    }
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUSE_PAGE: &str = r#"<html><body><form>
        <input type="hidden" id="__VIEWSTATE" value="abc" />
        <span id="ctl00_ContentPlaceHolder1_Outer_ctl00_LblHouse">15<sup>th</sup> Assembly,</span>
        <span id="ctl00_ContentPlaceHolder1_Outer_ctl00_LblInfo">VII Session [ 12 Feb 2018 - 23 Mar 2018 ] - 20 Sittings</span>
        <table id="ctl00_ContentPlaceHolder1_Outer_ctl00_DataList1">
            <tr><td><a id="ctl00_ContentPlaceHolder1_Outer_ctl00_DataList1_ctl00_LinkButton2"
                href="javascript:__doPostBack('ctl00$ContentPlaceHolder1$Outer$ctl00$DataList1$ctl00$LinkButton2','')">12/02/2018</a></td></tr>
            <tr><td><a id="ctl00_ContentPlaceHolder1_Outer_ctl00_DataList1_ctl01_LinkButton2"
                href="javascript:void(0)">13/02/2018</a></td></tr>
        </table>
        <span id="ctl00_ContentPlaceHolder1_Outer_ctl01_LblHouse">15th Assembly,</span>
        <span id="ctl00_ContentPlaceHolder1_Outer_ctl01_LblInfo">Special Sitting</span>
        <table id="ctl00_ContentPlaceHolder1_Outer_ctl01_DataList1">
            <tr><td><a onclick="__doPostBack('x','')">01/01/2019</a></td></tr>
        </table>
    </form></body></html>"#;

    #[test]
    fn test_parse_session_info() {
        let info = parse_session_info("15th Assembly, VII Session [ 12 Feb 2018 - 23 Mar 2018 ]");
        assert_eq!(info.assembly_number, Some(15));
        assert_eq!(info.session_number, Some(7));
        assert_eq!(info.assembly_ordinal.as_deref(), Some("15th"));
        assert_eq!(info.session_roman.as_deref(), Some("VII"));

        let info = parse_session_info("2nd Assembly, I Session");
        assert_eq!(info.session_number, Some(1));
        assert_eq!(parse_session_info("Special Sitting"), SessionInfo::default());
    }

    #[test]
    fn test_parse_sittings() {
        let sittings = parse_sittings(HOUSE_PAGE, 15);
        assert_eq!(sittings.len(), 1);
        let sitting = &sittings[0];
        assert_eq!(
            sitting.event_target,
            "ctl00$ContentPlaceHolder1$Outer$ctl00$DataList1$ctl00$LinkButton2"
        );
        assert_eq!(sitting.date_text, "12/02/2018");
        assert_eq!(
            sitting.identifier,
            "rajasthanlegislature.assembly15.session7.12-02-2018"
        );
        assert_eq!(sitting.filename(), "assembly15_session7_12-02-2018.pdf");
        assert_eq!(sitting.session_id, "session_1");
    }

    #[test]
    fn test_item_metadata() {
        let profile = Rajasthan::new().profile().clone();
        let sitting = parse_sittings(HOUSE_PAGE, 15).remove(0);
        let mut sidecar = match serde_json::to_value(&sitting).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        sidecar.insert("source_url".into(), json!("http://x/a.pdf"));

        let meta = item_metadata(&profile, &sitting, &sidecar, "http://x/a.pdf");
        assert_eq!(meta.get_str("title"), Some("Assembly 15, Session 7, 12/02/2018"));
        assert_eq!(meta.get_str("date"), Some("2018-02-12"));
        assert_eq!(meta.get_str("rajasthan_legislature_assembly_number"), Some("15"));
        assert_eq!(meta.get_str("rajasthan_legislature_session_number"), Some("7"));
        assert!(meta.get("rajasthan_legislature_event_target").is_none());
        assert_eq!(meta.get_str("collection"), Some("parliamentofindia"));
    }

    #[test]
    fn test_window_open_pattern() {
        let html = r#"<script>window.open('./Proceedings/15/12022018.pdf','_blank');</script>"#;
        let caps = WINDOW_OPEN.captures(html).unwrap();
        assert_eq!(&caps[1], "Proceedings/15/12022018.pdf");
    }
}
