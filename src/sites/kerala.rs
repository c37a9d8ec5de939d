//! Kerala Legislative Assembly proceedings from the niyamasabha digital archive.
//!
//! The advanced search form is posted once per assembly and result page. Each
//! result row carries a document id used for both the member list and the PDF.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use url::Url;

use super::traits::{Legislature, SiteProfile};
use crate::archive::ItemMetadata;
use crate::fetch::DownloadOptions;
use crate::pipeline::{Cleanup, DocumentFile, MirrorContext, Outcome, PendingDocument, RunSummary};
use crate::store::ProcessedSet;
use crate::text::element_text_compact;
use crate::workspace::exists;

const BASE_URL: &str = "http://klaproceedings.niyamasabha.org/digital";
const ASSEMBLY_OPTIONS_FILE: &str = "assembly.html";
const UPLOADED_FILE: &str = "uploaded_documents.json";
const PROCESSED_PAGES_FILE: &str = "processed_assemblies.json";
const MAX_PAGES: u32 = 1000;
const FALLBACK_ASSEMBLIES: std::ops::RangeInclusive<u32> = 1..=15;

const EXCLUDED_FIELDS: &[&str] = &["id", "member_list_html", "has_pdf", "has_members", "members"];

static DOC_ID_PATTERNS: std::sync::LazyLock<[Regex; 4]> = std::sync::LazyLock::new(|| {
    [
        Regex::new(r"OpenClick2\('(\d+)'\)").unwrap(),
        Regex::new(r"OpenClick1\('(\d+)'\)").unwrap(),
        Regex::new(r"showhidelang\((\d+)\)").unwrap(),
        Regex::new(r"memberList=(\d+)").unwrap(),
    ]
});
static NEXT_PAGE: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"Next\s*>>").unwrap());

static OPTION_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("option").expect("Invalid selector"));
static RESULT_ROWS: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("div#results tr").expect("Invalid selector"));
static CELL_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("td").expect("Invalid selector"));
static ENGLISH_DIV: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse(r#"div[style*="display:block"]"#).expect("Invalid selector")
});
static MALAYALAM_DIV: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse(r#"div[style*="display:none"]"#).expect("Invalid selector")
});
static TABLE_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("table").expect("Invalid selector"));
static ROW_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("tr").expect("Invalid selector"));
static LINK_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a").expect("Invalid selector"));

/// One row of the search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proceeding {
    pub id: String,
    pub date: String,
    pub assembly: String,
    pub session: String,
    pub event_eng: String,
    pub event_mal: String,
    pub subject_eng: String,
    pub subject_mal: String,
    pub has_pdf: bool,
    pub has_members: bool,
}

impl Proceeding {
    #[must_use]
    pub fn identifier(&self) -> String {
        format!("keralalegislativeassembly.proceedings.{}", self.id)
    }

    /// `DD-MM-YYYY` rewritten as `YYYY-MM-DD`.
    #[must_use]
    pub fn iso_date(&self) -> Option<String> {
        let parts: Vec<&str> = self.date.split('-').collect();
        match parts.as_slice() {
            [day, month, year] => Some(format!("{year}-{month}-{day}")),
            _ => None,
        }
    }
}

/// A member named in a proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub no: String,
    pub english_name: String,
    pub malayalam_name: String,
}

/// Kerala Legislative Assembly.
pub struct Kerala {
    base_url: String,
    profile: SiteProfile,
}

impl Kerala {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Kerala Legislative Assembly",
                search_creator: "Kerala Legislative Assembly",
                search_prefix: "keralalegislativeassembly.proceedings.",
                languages: &["English", "Malayalam"],
                subjects: &["Kerala Legislative Assembly", "Government Documents", "Kerala"],
                collection: None,
                field_prefix: "kla_",
                delay: Duration::from_secs(1),
            },
        }
    }

    fn member_list_url(&self, id: &str) -> String {
        format!("{}/ListSearchMembers.php?memberList={id}", self.base_url)
    }

    fn pdf_url(&self, id: &str) -> String {
        format!("{}/docs_to_pdf.php?memberList={id}", self.base_url)
    }

    /// Assembly numbers to walk, from the saved search form or the known range.
    async fn assemblies(&self, ctx: &MirrorContext) -> Vec<String> {
        let path = ctx.workspace.state_path(ASSEMBLY_OPTIONS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => {
                let options = parse_assembly_options(&html);
                info!(count = options.len(), "Loaded assembly options");
                options
            }
            Err(_) => {
                warn!(path = %path.display(), "Assembly options file not found, using the known assemblies");
                FALLBACK_ASSEMBLIES.map(|n| n.to_string()).collect()
            }
        }
    }

    fn search_headers(&self) -> Result<HeaderMap> {
        let origin = Url::parse(&self.base_url)
            .context("Invalid Kerala base URL")?
            .origin()
            .ascii_serialization();
        let referer = format!("{origin}/index.php?pg=advanced_search_combo");

        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(ORIGIN, HeaderValue::from_str(&origin)?);
        headers.insert(REFERER, HeaderValue::from_str(&referer)?);
        Ok(headers)
    }

    /// Fetch one page of search results, caching the raw HTML.
    async fn search_page(&self, ctx: &MirrorContext, assembly: &str, page: u32) -> Result<String> {
        let path = ctx.workspace.list_path(&format!("{assembly}_{page}.html"));
        if exists(&path).await {
            return tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()));
        }

        info!(assembly = %assembly, page, "Fetching search results");
        let page_str = page.to_string();
        let form = [
            ("FlagPost", "1"),
            ("assembly", assembly),
            ("session", ""),
            ("date_search", ""),
            ("date_search1", ""),
            ("class_search", ""),
            ("member", ""),
            ("subject", ""),
            ("lang", "eng"),
            ("curpage", page_str.as_str()),
        ];
        let url = format!("{}/adv_search_result.php", self.base_url);
        let html = ctx
            .fetcher
            .post_form(&url, &form, self.search_headers()?)
            .await?
            .text()
            .await
            .context("Failed to read search results")?;

        tokio::fs::write(&path, &html)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        ctx.fetcher.pause().await;
        Ok(html)
    }

    async fn members(&self, ctx: &MirrorContext, id: &str) -> Vec<Member> {
        match ctx.fetcher.get_text(&self.member_list_url(id)).await {
            Ok(html) => {
                ctx.fetcher.pause().await;
                parse_members(&html)
            }
            Err(e) => {
                warn!(id = %id, "Failed to fetch member list: {e:#}");
                Vec::new()
            }
        }
    }

    fn pending_document(
        &self,
        ctx: &MirrorContext,
        proceeding: &Proceeding,
        members: &[Member],
    ) -> Result<PendingDocument> {
        let id = proceeding.id.as_str();
        let pdf_url = self.pdf_url(id);

        let mut sidecar = match serde_json::to_value(proceeding)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        sidecar.insert("member_list_url".into(), json!(self.member_list_url(id)));
        sidecar.insert("document_pdf_url".into(), json!(pdf_url));
        sidecar.insert("members".into(), serde_json::to_value(members)?);

        let files = if proceeding.has_pdf {
            vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&format!("{id}.pdf")),
                pdf_url,
                DownloadOptions::default(),
            )]
        } else {
            Vec::new()
        };

        Ok(PendingDocument {
            identifier: proceeding.identifier(),
            item: self.item_metadata(proceeding, members, &sidecar),
            files,
            metadata_path: ctx.workspace.metadata_path(id),
            sidecar,
            check_remote: false,
            cleanup: Cleanup::PdfOnly,
        })
    }

    fn item_metadata(
        &self,
        proceeding: &Proceeding,
        members: &[Member],
        sidecar: &Map<String, Value>,
    ) -> ItemMetadata {
        let profile = &self.profile;
        let mut meta = profile.item_metadata(&self.base_url);

        if proceeding.subject_eng.is_empty() {
            meta.set("title", proceeding.id.as_str());
        } else {
            meta.set(
                "title",
                format!("{} / {}", proceeding.subject_eng, proceeding.subject_mal),
            );
        }

        let mut description = String::from("Kerala Legislative Assembly Proceedings\n");
        let parts: Vec<String> = [
            ("Date", &proceeding.date),
            ("Assembly", &proceeding.assembly),
            ("Session", &proceeding.session),
            ("Event", &proceeding.event_eng),
            ("Subject", &proceeding.subject_eng),
        ]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(label, value)| format!("{label}: {value}"))
        .collect();
        description.push_str(&parts.join("\n"));
        meta.set("description", description);

        if let Some(date) = proceeding.iso_date() {
            meta.set("date", date);
        }

        meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);

        if !members.is_empty() {
            let names = |pick: fn(&Member) -> &str| {
                members
                    .iter()
                    .map(pick)
                    .filter(|n| !n.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            meta.set("kla_members_eng", names(|m| m.english_name.as_str()));
            meta.set("kla_members_mal", names(|m| m.malayalam_name.as_str()));
        }

        meta.move_to_end("kla_document_pdf_url");
        meta.move_to_end("kla_member_list_url");
        meta
    }

    /// Process every proceeding on one page.
    ///
    /// Returns the page HTML, or `None` if the page could not be fetched.
    async fn process_page(
        &self,
        ctx: &MirrorContext,
        pages: &ProcessedSet,
        uploaded: &ProcessedSet,
        assembly: &str,
        page: u32,
        summary: &mut RunSummary,
    ) -> Option<String> {
        let html = match self.search_page(ctx, assembly, page).await {
            Ok(html) => html,
            Err(e) => {
                warn!(assembly = %assembly, page, "Failed to fetch search results: {e:#}");
                return None;
            }
        };

        let proceedings = parse_results(&html);
        if proceedings.is_empty() {
            info!(assembly = %assembly, page, "No documents found");
        }

        for proceeding in &proceedings {
            if uploaded.contains(&proceeding.id).await
                || ctx.processed.contains(&proceeding.identifier()).await
            {
                info!(id = %proceeding.id, "Document already uploaded");
                continue;
            }

            let members = if proceeding.has_members {
                self.members(ctx, &proceeding.id).await
            } else {
                Vec::new()
            };

            let doc = match self.pending_document(ctx, proceeding, &members) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(id = %proceeding.id, "Failed to build document: {e:#}");
                    continue;
                }
            };
            if let Some(Outcome::Uploaded { .. }) = ctx.process_and_record(summary, &doc).await {
                uploaded.insert(proceeding.id.as_str()).await;
                if let Err(e) = uploaded.save().await {
                    warn!("Failed to save uploaded documents: {e:#}");
                }
            }
        }

        if !ctx.config.dry_run {
            pages.insert(format!("{assembly}_{page}")).await;
            if let Err(e) = pages.save().await {
                warn!("Failed to save processed pages: {e:#}");
            }
        }
        Some(html)
    }
}

impl Default for Kerala {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for Kerala {
    fn site_id(&self) -> &'static str {
        "kerala"
    }

    fn name(&self) -> &'static str {
        "Kerala Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["kl"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;
        let uploaded = ctx.open_state(UPLOADED_FILE).await?;
        let pages = ctx.open_state(PROCESSED_PAGES_FILE).await?;

        let assemblies = self.assemblies(ctx).await;
        if assemblies.is_empty() {
            anyhow::bail!("No assembly options found");
        }

        let mut summary = RunSummary::default();
        for assembly in &assemblies {
            info!(assembly = %assembly, "Processing assembly");
            let mut page = 1;
            while page <= MAX_PAGES {
                let key = format!("{assembly}_{page}");
                if pages.contains(&key).await {
                    info!(key = %key, "Assembly page already processed");
                    page += 1;
                    continue;
                }

                let Some(html) = self
                    .process_page(ctx, &pages, &uploaded, assembly, page, &mut summary)
                    .await
                else {
                    break;
                };
                if !has_next_page(&html) {
                    info!(assembly = %assembly, "No more pages");
                    break;
                }
                page += 1;
            }
            if page > MAX_PAGES {
                warn!(assembly = %assembly, "Reached maximum page limit");
            }
            ctx.flush_state().await;
        }

        Ok(summary)
    }
}

/// Assembly values from the search form's `<option>` list.
#[must_use]
pub fn parse_assembly_options(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&OPTION_SELECTOR)
        .filter_map(|option| option.value().attr("value"))
        .filter(|value| !value.is_empty() && *value != "0")
        .map(String::from)
        .collect()
}

fn bilingual(cell: &ElementRef<'_>) -> (String, String) {
    let pick = |selector: &Selector| {
        cell.select(selector)
            .next()
            .map(|div| element_text_compact(&div))
            .unwrap_or_default()
    };
    (pick(&ENGLISH_DIV), pick(&MALAYALAM_DIV))
}

/// Proceedings listed on a search result page.
#[must_use]
pub fn parse_results(html: &str) -> Vec<Proceeding> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_ROWS)
        .skip(1)
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
            if cells.len() < 6 {
                return None;
            }
            let actions = cells[5].html();
            let id = DOC_ID_PATTERNS
                .iter()
                .find_map(|pattern| pattern.captures(&actions).map(|c| c[1].to_string()))?;

            let (event_eng, event_mal) = bilingual(&cells[3]);
            let (subject_eng, subject_mal) = bilingual(&cells[4]);
            Some(Proceeding {
                id,
                date: element_text_compact(&cells[0]),
                assembly: element_text_compact(&cells[1]),
                session: element_text_compact(&cells[2]),
                event_eng,
                event_mal,
                subject_eng,
                subject_mal,
                has_pdf: actions.contains("docs_to_pdf.php") && !actions.contains("PDF not found!"),
                has_members: actions.contains("OpenClick2")
                    && !actions.contains("Members not found"),
            })
        })
        .collect()
}

/// Whether the page has a clickable `Next >>` link.
#[must_use]
pub fn has_next_page(html: &str) -> bool {
    let document = Html::parse_document(html);
    document.select(&LINK_SELECTOR).any(|link| {
        NEXT_PAGE.is_match(&link.text().collect::<String>())
            && link.value().attr("onclick").is_some_and(|s| !s.is_empty())
    })
}

/// Members from a member-list popup table.
#[must_use]
pub fn parse_members(html: &str) -> Vec<Member> {
    let document = Html::parse_document(html);
    let Some(table) = document.select(&TABLE_SELECTOR).next() else {
        warn!("No table found in member list");
        return Vec::new();
    };
    table
        .select(&ROW_SELECTOR)
        .skip(1)
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
            if cells.len() < 3 {
                return None;
            }
            let member = Member {
                no: element_text_compact(&cells[0]),
                english_name: element_text_compact(&cells[1]),
                malayalam_name: element_text_compact(&cells[2]),
            };
            (!member.english_name.is_empty() || !member.malayalam_name.is_empty())
                .then_some(member)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = r#"<html><body><div id="results"><table>
        <tr><th>Date</th><th>Assembly</th><th>Session</th><th>Event</th><th>Subject</th><th></th></tr>
        <tr>
            <td>05-03-1958</td><td>1</td><td>4</td>
            <td><div style="display:block">Questions</div><div style="display:none">ചോദ്യങ്ങൾ</div></td>
            <td><div style="display:block">Land Reforms</div><div style="display:none">ഭൂപരിഷ്കരണം</div></td>
            <td><a onclick="OpenClick2('7714')">Members</a> <a href="docs_to_pdf.php?memberList=7714">PDF</a></td>
        </tr>
        <tr>
            <td>06-03-1958</td><td>1</td><td>4</td><td></td><td></td>
            <td><a onclick="showhidelang(7715)">Lang</a> PDF not found! Members not found</td>
        </tr>
        <tr><td>short</td></tr>
    </table>
    <a onclick="paginate(2)">Next &gt;&gt;</a>
    </div></body></html>"#;

    #[test]
    fn test_parse_results() {
        let rows = parse_results(RESULTS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "7714");
        assert_eq!(rows[0].event_eng, "Questions");
        assert_eq!(rows[0].subject_mal, "ഭൂപരിഷ്കരണം");
        assert!(rows[0].has_pdf);
        assert!(rows[0].has_members);
        assert_eq!(rows[0].iso_date().as_deref(), Some("1958-03-05"));

        assert_eq!(rows[1].id, "7715");
        assert!(!rows[1].has_pdf);
        assert!(!rows[1].has_members);
    }

    #[test]
    fn test_has_next_page() {
        assert!(has_next_page(RESULTS));
        assert!(!has_next_page("<a>Next &gt;&gt;</a>"));
        assert!(!has_next_page("<a onclick='x()'>Previous</a>"));
    }

    #[test]
    fn test_parse_assembly_options() {
        let html = r#"<select><option value="0">Select</option><option value="">-</option>
            <option value="1">First</option><option value="15">Fifteenth</option></select>"#;
        assert_eq!(parse_assembly_options(html), vec!["1", "15"]);
    }

    #[test]
    fn test_parse_members() {
        let html = r"<table><tr><th>No</th><th>Name</th><th>Name</th></tr>
            <tr><td>1</td><td>E.M.S. Namboodiripad</td><td>ഇ.എം.എസ്</td></tr>
            <tr><td>2</td><td></td><td></td></tr></table>";
        let members = parse_members(html);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].english_name, "E.M.S. Namboodiripad");
    }

    #[test]
    fn test_item_metadata() {
        let site = Kerala::new();
        let proceeding = parse_results(RESULTS).remove(0);
        let members = vec![Member {
            no: "1".into(),
            english_name: "A".into(),
            malayalam_name: "എ".into(),
        }];
        let mut sidecar = match serde_json::to_value(&proceeding).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        sidecar.insert("member_list_url".into(), json!("http://m"));
        sidecar.insert("document_pdf_url".into(), json!("http://p"));
        sidecar.insert("members".into(), serde_json::to_value(&members).unwrap());

        let meta = site.item_metadata(&proceeding, &members, &sidecar);
        assert_eq!(meta.get_str("title"), Some("Land Reforms / ഭൂപരിഷ്കരണം"));
        assert_eq!(meta.get_str("date"), Some("1958-03-05"));
        assert_eq!(
            meta.get_str("description"),
            Some("Kerala Legislative Assembly Proceedings\nDate: 05-03-1958\nAssembly: 1\nSession: 4\nEvent: Questions\nSubject: Land Reforms")
        );
        assert_eq!(meta.get_str("kla_members_eng"), Some("A"));
        assert!(meta.get("kla_has_pdf").is_none());
        assert!(meta.get("kla_id").is_none());

        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(
            &keys[keys.len() - 2..],
            &["kla_document_pdf_url", "kla_member_list_url"]
        );
    }
}
