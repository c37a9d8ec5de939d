//! Karnataka Legislative Assembly debates, listed per sitting day by a JSON API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::traits::{Legislature, SiteProfile};
use crate::archive::ItemMetadata;
use crate::fetch::DownloadOptions;
use crate::pipeline::{Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary};
use crate::workspace::{exists, read_json, write_json};

const BASE_URL: &str = "http://103.138.196.55:9200";
const FIRST_SITTING: &str = "1952-06-18";
const PROCESSED_DATES_FILE: &str = "processed_dates.json";
const BATCH_SIZE: usize = 10;
const CLEANUP_EVERY: usize = 50;
const LIST_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const EXCLUDED_FIELDS: &[&str] = &["book_id", "start_page", "end_page", "source_url"];

/// Query parameters of the search API. Everything but the date range is blank.
const BLANK_PARAMS: &[&str] = &[
    "ln", "srt", "qp", "dtf", "anf", "snf", "dsubfEng", "dsubfKan", "dpfEng", "dpfKan", "dbf",
    "ytf", "issfEng", "issfKan", "tagfKan", "tagfEng",
];

/// One debate section: a page range of a printed proceedings book.
#[derive(Debug, Clone, PartialEq)]
pub struct Debate {
    pub book_id: String,
    pub start_page: String,
    pub end_page: String,
    /// The `_source` object as returned by the API.
    pub fields: Map<String, Value>,
}

impl Debate {
    /// Local file stem, `{book}_{start}_{end}`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.book_id, self.start_page, self.end_page)
    }

    #[must_use]
    pub fn identifier(&self) -> String {
        format!(
            "karnatakalegislativeassembly.debates.{}.{}.{}",
            self.book_id, self.start_page, self.end_page
        )
    }
}

/// Karnataka Legislative Assembly.
pub struct Karnataka {
    base_url: String,
    first_day: NaiveDate,
    last_day: Option<NaiveDate>,
    profile: SiteProfile,
}

impl Karnataka {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            first_day: NaiveDate::parse_from_str(FIRST_SITTING, "%Y-%m-%d")
                .unwrap_or(NaiveDate::MIN),
            last_day: None,
            profile: SiteProfile {
                creator: "Karnataka Legislative Assembly Secretariat",
                search_creator: "Karnataka Legislative Assembly",
                search_prefix: "kla.debates.",
                languages: &["English", "Kannada"],
                subjects: &["Karnataka Legislative Assembly"],
                collection: None,
                field_prefix: "kla_",
                delay: Duration::from_secs(1),
            },
        }
    }

    /// Restrict the walk to an inclusive date range.
    #[must_use]
    pub fn with_date_range(mut self, first: NaiveDate, last: NaiveDate) -> Self {
        self.first_day = first;
        self.last_day = Some(last);
        self
    }

    fn document_url(&self, debate: &Debate) -> String {
        format!(
            "{}/api/fs/section/debates/kla/{}/{}/{}",
            self.base_url, debate.book_id, debate.start_page, debate.end_page
        )
    }

    /// Fetch the debate list for `date`, using the cached copy when present.
    async fn daily_list(&self, ctx: &MirrorContext, date: &str) -> Result<Value> {
        let path = ctx.workspace.list_path(&format!("{date}.json"));
        if exists(&path).await {
            info!(date = %date, "Document list already cached");
            return read_json(&path).await;
        }

        info!(date = %date, "Fetching document list");
        let mut params: Vec<(&str, &str)> = BLANK_PARAMS.iter().map(|k| (*k, "")).collect();
        params.push(("qt", "PRC"));
        params.push(("sectionDateFrm", date));
        params.push(("sectionDateTo", date));

        let url = format!("{}/api/sd/sh", self.base_url);
        let response = ctx
            .fetcher
            .client()
            .get(&url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("Document list request failed for {date}"))?;
        let data: Value = response
            .json()
            .await
            .with_context(|| format!("Invalid document list JSON for {date}"))?;

        write_json(&path, &data).await?;
        ctx.fetcher.pause().await;
        Ok(data)
    }

    fn pending_document(&self, ctx: &MirrorContext, debate: &Debate, date: &str) -> PendingDocument {
        let source_url = self.document_url(debate);
        let key = debate.key();

        let mut sidecar = Map::new();
        sidecar.insert("book_id".into(), json!(debate.book_id));
        sidecar.insert("start_page".into(), json!(debate.start_page));
        sidecar.insert("end_page".into(), json!(debate.end_page));
        sidecar.insert("source_url".into(), json!(source_url));
        for (k, v) in &debate.fields {
            sidecar.insert(k.clone(), v.clone());
        }
        sidecar.insert("processing_date".into(), json!(date));

        PendingDocument {
            identifier: debate.identifier(),
            item: item_metadata(&self.profile, debate, &sidecar, &source_url),
            files: vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&format!("{key}.pdf")),
                source_url,
                DownloadOptions::default(),
            )],
            metadata_path: ctx.workspace.metadata_path(&key),
            sidecar,
            check_remote: true,
            cleanup: Cleanup::Keep,
        }
    }

    /// Process every debate of one sitting day.
    ///
    /// Returns `false` if the day's list could not be fetched; the day then
    /// stays unprocessed.
    async fn process_date(
        &self,
        ctx: &MirrorContext,
        dates: &crate::store::ProcessedSet,
        date: &str,
        summary: &mut RunSummary,
    ) -> bool {
        let data = match self.daily_list(ctx, date).await {
            Ok(data) => data,
            Err(e) => {
                warn!(date = %date, "Failed to fetch document list: {e:#}");
                return false;
            }
        };

        let debates = parse_debates(&data);
        if debates.is_empty() {
            info!(date = %date, "No debates found");
        }
        for debate in &debates {
            let doc = self.pending_document(ctx, debate, date);
            ctx.process_and_record(summary, &doc).await;
        }

        if ctx.config.dry_run {
            return true;
        }
        dates.insert(date).await;
        if let Err(e) = dates.save().await {
            warn!("Failed to save processed dates: {e:#}");
        }
        true
    }

    /// Delete downloaded PDFs and list files older than a week.
    async fn cleanup_files(&self, ctx: &MirrorContext) {
        info!("Cleaning up downloaded files");
        if let Err(e) = ctx.workspace.clear_dir(&ctx.workspace.documents_dir()).await {
            warn!("Failed to clean up documents: {e:#}");
        }
        if let Err(e) = ctx
            .workspace
            .remove_older_than(&ctx.workspace.list_dir(), LIST_MAX_AGE)
            .await
        {
            warn!("Failed to clean up list files: {e:#}");
        }
    }
}

impl Default for Karnataka {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for Karnataka {
    fn site_id(&self) -> &'static str {
        "karnataka"
    }

    fn name(&self) -> &'static str {
        "Karnataka Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["ka", "kla"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;
        let processed_dates = ctx.open_state(PROCESSED_DATES_FILE).await?;

        let last_day = self.last_day.unwrap_or_else(|| Local::now().date_naive());
        let all_dates = date_range(self.first_day, last_day);
        info!(count = all_dates.len(), first = %self.first_day, "Generated dates to process");

        let mut remaining = Vec::new();
        for date in all_dates {
            if !processed_dates.contains(&date).await {
                remaining.push(date);
            }
        }
        info!(count = remaining.len(), "Remaining dates to process");

        let batches = remaining.len().div_ceil(BATCH_SIZE);
        let mut summary = RunSummary::default();
        for (batch_no, batch) in remaining.chunks(BATCH_SIZE).enumerate() {
            info!("Processing batch {}/{batches}", batch_no + 1);
            for date in batch {
                self.process_date(ctx, &processed_dates, date, &mut summary)
                    .await;
            }
            ctx.checkpoint(batch_no + 1, 1).await;

            if !ctx.config.dry_run && (batch_no * BATCH_SIZE) % CLEANUP_EVERY == 0 {
                self.cleanup_files(ctx).await;
            }
        }

        Ok(summary)
    }
}

/// Every day from `first` to `last` inclusive, as `YYYY-MM-DD`.
#[must_use]
pub fn date_range(first: NaiveDate, last: NaiveDate) -> Vec<String> {
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect()
}

/// Required key field as a string. Empty strings and zero count as missing.
fn key_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        _ => None,
    }
}

/// Debates listed in a daily API response.
///
/// Entries missing `bookId`, `startPage` or `endPage` are logged and dropped.
#[must_use]
pub fn parse_debates(data: &Value) -> Vec<Debate> {
    let Some(results) = data.get("debateResults").and_then(Value::as_array) else {
        warn!("No debateResults in document list");
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|entry| {
            let fields = entry.get("_source")?.as_object()?;
            let (Some(book_id), Some(start_page), Some(end_page)) = (
                key_field(fields, "bookId"),
                key_field(fields, "startPage"),
                key_field(fields, "endPage"),
            ) else {
                warn!("Missing required fields in debate data");
                return None;
            };
            Some(Debate {
                book_id,
                start_page,
                end_page,
                fields: fields.clone(),
            })
        })
        .collect()
}

fn item_metadata(
    profile: &SiteProfile,
    debate: &Debate,
    sidecar: &Map<String, Value>,
    source_url: &str,
) -> ItemMetadata {
    let mut meta = profile.item_metadata(source_url);
    let title = ["debate_subject_kan", "debate_subject_eng"]
        .iter()
        .find_map(|k| debate.fields.get(*k).and_then(crate::archive::flatten_value))
        .unwrap_or_else(|| debate.identifier());
    meta.set("title", title);
    meta.set(
        "description",
        format!(
            "Karnataka Legislative Assembly Debates - Book {}, Pages {}-{}",
            debate.book_id, debate.start_page, debate.end_page
        ),
    );
    if let Some(date) = debate
        .fields
        .get("debate_section_date")
        .and_then(crate::archive::flatten_value)
    {
        meta.set("date", date);
    }
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list() -> Value {
        json!({
            "debateResults": [
                {"_source": {
                    "bookId": "B123",
                    "startPage": 4,
                    "endPage": "9",
                    "debate_subject_kan": "ಪ್ರಶ್ನೋತ್ತರ",
                    "debate_section_date": "1952-06-18",
                    "members": ["A", "B"]
                }},
                {"_source": {"bookId": "B124", "startPage": 1}},
                {"other": {}}
            ]
        })
    }

    #[test]
    fn test_parse_debates_requires_page_range() {
        let debates = parse_debates(&sample_list());
        assert_eq!(debates.len(), 1);
        assert_eq!(debates[0].key(), "B123_4_9");
        assert_eq!(
            debates[0].identifier(),
            "karnatakalegislativeassembly.debates.B123.4.9"
        );
        assert!(parse_debates(&json!({"hits": 0})).is_empty());
    }

    #[test]
    fn test_date_range_inclusive() {
        let first = NaiveDate::from_ymd_opt(2020, 2, 27).unwrap();
        let last = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        assert_eq!(
            date_range(first, last),
            vec!["2020-02-27", "2020-02-28", "2020-02-29", "2020-03-01"]
        );
        assert!(date_range(last, first).is_empty());
    }

    #[test]
    fn test_item_metadata() {
        let site = Karnataka::new();
        let debate = parse_debates(&sample_list()).remove(0);
        let mut sidecar = Map::new();
        sidecar.insert("book_id".into(), json!("B123"));
        sidecar.insert("source_url".into(), json!("http://x"));
        sidecar.extend(debate.fields.clone());
        sidecar.insert("processing_date".into(), json!("1952-06-18"));

        let meta = item_metadata(site.profile(), &debate, &sidecar, "http://x");
        assert_eq!(meta.get_str("title"), Some("ಪ್ರಶ್ನೋತ್ತರ"));
        assert_eq!(meta.get_str("date"), Some("1952-06-18"));
        assert_eq!(
            meta.get_str("description"),
            Some("Karnataka Legislative Assembly Debates - Book B123, Pages 4-9")
        );
        assert_eq!(
            meta.get_str("creator"),
            Some("Karnataka Legislative Assembly Secretariat")
        );
        assert_eq!(meta.get_str("kla_members"), Some("A, B"));
        assert_eq!(meta.get_str("kla_startPage"), Some("4"));
        assert!(meta.get("kla_book_id").is_none());
        assert!(meta.get("collection").is_none());
    }
}
