//! West Bengal Legislative Assembly and Council proceedings from the assembly library.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::traits::{Legislature, SiteProfile};
use crate::archive::{flatten_value, ItemMetadata};
use crate::constants::PARLIAMENT_COLLECTION;
use crate::fetch::DownloadOptions;
use crate::pipeline::{
    processing_timestamp, Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary,
};
use crate::workspace::{exists, read_json, write_json};

const BASE_URL: &str = "https://lalib.wb.gov.in";
const CHECKPOINT_EVERY: usize = 10;
const MAX_FILENAME_LEN: usize = 200;
const DATATABLE_COLUMNS: usize = 7;
const PAGE_LENGTH: usize = 500;

const EXCLUDED_FIELDS: &[&str] = &[
    "url",
    "source_url",
    "processing_date",
    "identifier",
    "filename",
];

static YEAR: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d{4})").unwrap());
static LINE_BREAK: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"<br/?>").unwrap());

/// A chamber of the West Bengal legislature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum House {
    Assembly,
    Council,
}

impl House {
    pub const ALL: [Self; 2] = [Self::Assembly, Self::Council];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Assembly => "Assembly",
            Self::Council => "Council",
        }
    }

    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Assembly => "assembly",
            Self::Council => "council",
        }
    }
}

/// One proceedings volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proceeding {
    pub house: String,
    pub document_id: String,
    pub document_type_id: String,
    pub title: String,
    pub proceeding_year: String,
    pub volume: String,
    pub number: String,
    pub period: String,
    pub dates: String,
    pub filename: String,
    pub url: String,
    /// Archive identifier.
    pub identifier: String,
}

/// West Bengal State Legislature.
pub struct WestBengal {
    base_url: String,
    profile: SiteProfile,
}

impl WestBengal {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "West Bengal State Legislature",
                search_creator: "West Bengal State Legislature",
                search_prefix: "westbengallegislature.",
                languages: &["English", "Bengali"],
                subjects: &["West Bengal State Legislature"],
                collection: Some(PARLIAMENT_COLLECTION),
                field_prefix: "westbengal_legislature_",
                delay: Duration::from_secs(1),
            },
        }
    }

    /// DataTables listing request for `house`.
    fn listing_url(&self, house: House) -> String {
        let mut query = format!(
            "sEcho=2&iColumns={DATATABLE_COLUMNS}&sColumns=,,,,,,&iDisplayStart=0&iDisplayLength={PAGE_LENGTH}"
        );
        for i in 0..DATATABLE_COLUMNS {
            query.push_str(&format!(
                "&mDataProp_{i}=&sSearch_{i}=&bRegex_{i}=false&bSearchable_{i}=true&bSortable_{i}=true"
            ));
        }
        query.push_str("&sSearch=&bRegex=false&iSortCol_0=0&sSortDir_0=asc&iSortingCols=1");
        if house == House::Council {
            query.push_str("&_");
        }
        format!("{}/showProceedingsRecordList?{query}", self.base_url)
    }

    /// Load the proceedings page once so the session carries its cookies.
    async fn prime_session(&self, ctx: &MirrorContext) -> Result<()> {
        let url = format!("{}/showChangeProceedings", self.base_url);
        ctx.fetcher.get(&url).await?;
        ctx.fetcher.pause().await;
        Ok(())
    }

    async fn listing(&self, ctx: &MirrorContext, house: House) -> Result<Value> {
        let path = ctx
            .workspace
            .tree_path(&format!("{}_proceedings.json", house.slug()));
        if !ctx.config.force_refetch && exists(&path).await {
            return read_json(&path).await;
        }

        info!(house = house.name(), "Fetching proceedings listing");
        let body = ctx.fetcher.get_bytes(&self.listing_url(house)).await?;
        let data: Value = serde_json::from_slice(&body)
            .with_context(|| format!("Invalid {} proceedings JSON", house.slug()))?;
        write_json(&path, &data).await?;
        ctx.fetcher.pause().await;
        Ok(data)
    }

    fn pending_document(&self, ctx: &MirrorContext, proceeding: &Proceeding) -> Result<PendingDocument> {
        let mut sidecar = match serde_json::to_value(proceeding)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        sidecar.insert("processing_date".into(), json!(processing_timestamp()));
        sidecar.insert("source_url".into(), json!(proceeding.url));

        Ok(PendingDocument {
            identifier: proceeding.identifier.clone(),
            files: vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&proceeding.filename),
                &proceeding.url,
                DownloadOptions::default(),
            )],
            metadata_path: ctx
                .workspace
                .metadata_path(proceeding.filename.trim_end_matches(".pdf")),
            item: item_metadata(&self.profile, proceeding, &sidecar),
            sidecar,
            check_remote: true,
            cleanup: Cleanup::All,
        })
    }
}

impl Default for WestBengal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for WestBengal {
    fn site_id(&self) -> &'static str {
        "west-bengal"
    }

    fn name(&self) -> &'static str {
        "West Bengal State Legislature"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["wb"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        self.prime_session(ctx)
            .await
            .context("Failed to load change proceedings page")?;

        let mut proceedings = Vec::new();
        for house in House::ALL {
            match self.listing(ctx, house).await {
                Ok(data) => proceedings.extend(parse_proceedings(&data, house, &self.base_url)),
                Err(e) => warn!(house = house.name(), "Error fetching proceedings: {e:#}"),
            }
        }
        if proceedings.is_empty() {
            bail!("No documents found in proceedings data");
        }
        info!(count = proceedings.len(), "Found proceedings to process");

        let mut summary = RunSummary::default();
        for (i, proceeding) in proceedings.iter().enumerate() {
            match self.pending_document(ctx, proceeding) {
                Ok(doc) => {
                    ctx.process_and_record(&mut summary, &doc).await;
                }
                Err(e) => {
                    warn!(identifier = %proceeding.identifier, "Failed to prepare document: {e:#}");
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
    proceeding: &Proceeding,
    sidecar: &Map<String, Value>,
) -> ItemMetadata {
    let heading = format!(
        "{} {} {} {}",
        proceeding.title, proceeding.proceeding_year, proceeding.volume, proceeding.number
    );
    let mut meta = profile.item_metadata(&proceeding.url);
    meta.set("title", heading.as_str());
    meta.set(
        "description",
        format!("West Bengal State Legislature - {heading}"),
    );
    if let Some(caps) = YEAR.captures(&proceeding.proceeding_year) {
        meta.set("date", &caps[1]);
    }
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta
}

/// Keep `[A-Za-z0-9_.-]`, replacing anything else with `_`.
fn clean_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name built from the stored file name plus year, volume and number.
#[must_use]
pub fn build_filename(stored_name: &str, year: &str, volume: &str, number: &str) -> String {
    let base = if stored_name.ends_with(".pdf") {
        stored_name.replace(".pdf", "")
    } else if stored_name.is_empty() {
        "unknown".to_string()
    } else {
        stored_name.to_string()
    };
    let clean_base = clean_component(&base);

    let year_suffix = YEAR
        .captures(&year.replace("<br/>", " ").replace("<br>", " "))
        .map(|caps| format!("_{}", &caps[1]))
        .unwrap_or_default();
    let suffix = |label: &str, value: &str| {
        let clean = clean_component(&LINE_BREAK.replace_all(value, "_"));
        if clean.is_empty() {
            String::new()
        } else {
            format!("_{label}_{clean}")
        }
    };
    let volume_suffix = suffix("vol", volume);
    let number_suffix = suffix("no", number);

    let parts: Vec<&str> = [
        clean_base.as_str(),
        year_suffix.as_str(),
        volume_suffix.as_str(),
        number_suffix.as_str(),
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect();
    let filename = format!("{}.pdf", parts.join("_"));

    if filename.len() > MAX_FILENAME_LEN {
        format!("{clean_base}{year_suffix}.pdf")
    } else {
        filename
    }
}

fn field(record: &Map<String, Value>, key: &str) -> String {
    record.get(key).and_then(flatten_value).unwrap_or_default()
}

/// Downloadable proceedings in a DataTables `data[]` listing.
#[must_use]
pub fn parse_proceedings(data: &Value, house: House, base_url: &str) -> Vec<Proceeding> {
    let Some(records) = data.get("data").and_then(Value::as_array) else {
        warn!(house = house.name(), "No 'data' field in proceedings JSON");
        return Vec::new();
    };

    let proceedings: Vec<Proceeding> = records
        .iter()
        .filter_map(|record| {
            let Some(record) = record.as_object() else {
                warn!("Invalid proceeding record: {record}");
                return None;
            };
            let stored_name = field(record, "res7");
            if stored_name.is_empty() || stored_name == "#" || stored_name.contains("No PDF Found") {
                return None;
            }

            let document_id = field(record, "document_id");
            let document_type_id = field(record, "document_type_id");
            let proceeding_year = field(record, "res3");
            let volume = field(record, "res4");
            let number = field(record, "res5");
            let filename = build_filename(&stored_name, &proceeding_year, &volume, &number);

            Some(Proceeding {
                house: house.name().to_string(),
                url: format!("{base_url}/Elibrary_VirtualPath/{document_type_id}/{stored_name}"),
                identifier: format!(
                    "westbengallegislature.{}.{document_id}.{}",
                    house.slug(),
                    filename.replace(".pdf", "")
                ),
                document_id,
                document_type_id,
                title: field(record, "document_name"),
                proceeding_year,
                volume,
                number,
                period: field(record, "res6"),
                dates: field(record, "res8"),
                filename,
            })
        })
        .collect();

    info!(house = house.name(), count = proceedings.len(), "Parsed proceedings");
    proceedings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Value {
        json!({
            "sEcho": 2,
            "data": [
                {
                    "document_id": 341,
                    "document_name": "Assembly Proceedings",
                    "document_type_id": "7",
                    "res3": "1952<br/>",
                    "res4": "I<br/>II",
                    "res5": "3",
                    "res6": "June-July",
                    "res7": "AP 1952 (1).pdf",
                    "res8": "18.06.1952"
                },
                { "document_id": 342, "res7": "No PDF Found" },
                { "document_id": 343, "res7": "#" },
                "not an object"
            ]
        })
    }

    #[test]
    fn test_build_filename() {
        assert_eq!(
            build_filename("AP 1952 (1).pdf", "1952<br/>", "I<br/>II", "3"),
            "AP_1952__1___1952__vol_I_II__no_3.pdf"
        );
        assert_eq!(build_filename("", "", "", ""), "unknown.pdf");
        assert_eq!(build_filename("doc.v2", "n/a", "", ""), "doc.v2.pdf");

        let long = "x".repeat(250);
        assert_eq!(
            build_filename(&format!("{long}.pdf"), "1990", "1", "2"),
            format!("{long}_1990.pdf")
        );
    }

    #[test]
    fn test_parse_proceedings() {
        let proceedings = parse_proceedings(&listing(), House::Council, BASE_URL);
        assert_eq!(proceedings.len(), 1);
        let p = &proceedings[0];
        assert_eq!(p.house, "Council");
        assert_eq!(p.document_id, "341");
        assert_eq!(
            p.url,
            "https://lalib.wb.gov.in/Elibrary_VirtualPath/7/AP 1952 (1).pdf"
        );
        assert_eq!(
            p.identifier,
            "westbengallegislature.council.341.AP_1952__1___1952__vol_I_II__no_3"
        );
        assert!(parse_proceedings(&json!({}), House::Assembly, BASE_URL).is_empty());
    }

    #[test]
    fn test_listing_urls() {
        let site = WestBengal::new();
        let assembly = site.listing_url(House::Assembly);
        assert!(assembly.starts_with(
            "https://lalib.wb.gov.in/showProceedingsRecordList?sEcho=2&iColumns=7&sColumns=,,,,,,&iDisplayStart=0&iDisplayLength=500&mDataProp_0="
        ));
        assert!(assembly.ends_with("&iSortingCols=1"));
        assert!(assembly.contains("&bSortable_6=true&sSearch="));
        assert_eq!(site.listing_url(House::Council), format!("{assembly}&_"));
    }

    #[test]
    fn test_item_metadata() {
        let site = WestBengal::new();
        let proceeding = parse_proceedings(&listing(), House::Assembly, BASE_URL).remove(0);
        let sidecar = match serde_json::to_value(&proceeding).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let meta = item_metadata(site.profile(), &proceeding, &sidecar);
        assert_eq!(
            meta.get_str("title"),
            Some("Assembly Proceedings 1952<br/> I<br/>II 3")
        );
        assert_eq!(meta.get_str("date"), Some("1952"));
        assert_eq!(meta.get_str("westbengal_legislature_period"), Some("June-July"));
        assert!(meta.get("westbengal_legislature_url").is_none());
    }
}
