//! Uttar Pradesh Legislative Assembly proceedings from the assembly's JSON API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::traits::{Legislature, SiteProfile};
use crate::archive::{flatten_value, ItemMetadata};
use crate::constants::{MIN_PDF_BYTES, PARLIAMENT_COLLECTION};
use crate::fetch::{DownloadOptions, PdfCheck};
use crate::pipeline::{
    processing_timestamp, Cleanup, DocumentFile, MirrorContext, PendingDocument, RunSummary,
};
use crate::text::dmy_to_iso;
use crate::workspace::{exists, read_json, write_json};

const BASE_URL: &str = "https://uplegisassembly.gov.in";
const TABLE_FILE: &str = "table.json";
const SYNOPSIS_PAGE: &str = "/Karyawahi/Proceeding_Synopsis_en.aspx";
const CHECKPOINT_EVERY: usize = 10;

const EXCLUDED_FIELDS: &[&str] = &[
    "pdf_url",
    "source_url",
    "processing_date",
    "filename",
    "valueId",
    "date",
    "identifier",
];

/// Number for an English ordinal as used in assembly and session names.
///
/// "Election" sessions have no number and are labelled "Election of Speaker".
#[must_use]
pub fn ordinal_number(word: &str) -> Option<String> {
    let n = match word {
        "First" => 1,
        "Second" => 2,
        "Third" => 3,
        "Fourth" => 4,
        "Fifth" => 5,
        "Sixth" => 6,
        "Seventh" => 7,
        "Eighth" | "Eight" => 8,
        "Ninth" => 9,
        "Tenth" => 10,
        "Eleventh" => 11,
        "Twelfth" => 12,
        "Thirteenth" => 13,
        "Fourteenth" => 14,
        "Fifteenth" => 15,
        "Sixteenth" => 16,
        "Seventeenth" => 17,
        "Eighteenth" => 18,
        "Nineteenth" => 19,
        "Twentieth" => 20,
        "Election" => return Some("Election of Speaker".to_string()),
        _ => return None,
    };
    Some(n.to_string())
}

/// One sitting's proceedings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proceeding {
    #[serde(rename = "valueId")]
    pub value_id: String,
    pub assembly_name: String,
    pub assembly_number: String,
    pub date: String,
    pub session_year: String,
    pub session_name: String,
    pub session_number: String,
    pub pdf_url: String,
    pub identifier: String,
    pub filename: String,
}

/// Uttar Pradesh Legislative Assembly.
pub struct UttarPradesh {
    base_url: String,
    profile: SiteProfile,
}

impl UttarPradesh {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: SiteProfile {
                creator: "Uttar Pradesh Legislative Assembly",
                search_creator: "Uttar Pradesh Legislative Assembly",
                search_prefix: "uplegislature.",
                languages: &["Hindi", "English"],
                subjects: &["Uttar Pradesh Legislative Assembly"],
                collection: Some(PARLIAMENT_COLLECTION),
                field_prefix: "up_legislature_",
                delay: Duration::from_secs(1),
            },
        }
    }

    fn synopsis_url(&self) -> String {
        format!("{}{SYNOPSIS_PAGE}", self.base_url)
    }

    /// The proceedings table, from the cache unless a refetch is forced.
    async fn proceedings_table(&self, ctx: &MirrorContext) -> Result<Value> {
        let path = ctx.workspace.tree_path(TABLE_FILE);
        if !ctx.config.force_refetch && exists(&path).await {
            match read_json(&path).await {
                Ok(data) => {
                    info!(path = %path.display(), "Loaded proceedings table from cache");
                    return Ok(data);
                }
                Err(e) => warn!("Error loading cached proceedings table, refetching: {e:#}"),
            }
        }

        let url = format!("{}/angular.asmx/Download_Proceedings_Table", self.base_url);
        info!(url = %url, "Fetching proceedings table");
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ORIGIN, HeaderValue::from_str(&self.base_url)?);
        headers.insert(REFERER, HeaderValue::from_str(&self.synopsis_url())?);

        let body = json!({
            "parm1": "proceeding_download",
            "parm2": "",
            "parm3": "",
            "parm4": "",
        });
        let data: Value = ctx
            .fetcher
            .post_json(&url, &body, headers)
            .await?
            .json()
            .await
            .context("Invalid proceedings table JSON")?;

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
        sidecar.insert("source_url".into(), json!(proceeding.pdf_url));

        Ok(PendingDocument {
            identifier: proceeding.identifier.clone(),
            files: vec![DocumentFile::remote(
                ctx.workspace.pdf_path(&proceeding.filename),
                &proceeding.pdf_url,
                DownloadOptions {
                    referer: Some(self.synopsis_url()),
                    check: PdfCheck::Lenient {
                        min_bytes: MIN_PDF_BYTES,
                    },
                },
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

impl Default for UttarPradesh {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Legislature for UttarPradesh {
    fn site_id(&self) -> &'static str {
        "uttar-pradesh"
    }

    fn name(&self) -> &'static str {
        "Uttar Pradesh Legislative Assembly"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["up"]
    }

    fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        ctx.seed_from_archive(&self.profile).await;

        let data = self
            .proceedings_table(ctx)
            .await
            .context("Failed to fetch or load proceedings table data")?;
        let mut proceedings = parse_proceedings(&data, &self.base_url);
        if proceedings.is_empty() {
            bail!("No documents found in proceedings data");
        }
        // Newest sittings are listed last.
        proceedings.reverse();

        let mut summary = RunSummary::default();
        for (i, proceeding) in proceedings.iter().enumerate() {
            info!(
                identifier = %proceeding.identifier,
                "Processing document {}/{}",
                i + 1,
                proceedings.len()
            );
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
    let (a, s, date) = (
        &proceeding.assembly_number,
        &proceeding.session_number,
        &proceeding.date,
    );
    let mut meta = profile.item_metadata(&proceeding.pdf_url);
    meta.set("title", format!("Assembly {a}, Session {s}, {date}"));
    meta.set(
        "description",
        format!(
            "Uttar Pradesh Legislative Assembly proceedings for Assembly {a}, Session {s} on {date}"
        ),
    );
    meta.set("date", dmy_to_iso(date).unwrap_or_else(|| date.clone()));
    meta.extend_prefixed(sidecar, profile.field_prefix, EXCLUDED_FIELDS);
    meta
}

fn string_field(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(flatten_value)
}

/// Valid proceedings in the `d` array of the table response, in listing order.
#[must_use]
pub fn parse_proceedings(data: &Value, base_url: &str) -> Vec<Proceeding> {
    let Some(entries) = data.get("d").and_then(Value::as_array) else {
        warn!("Proceedings table has no entries");
        return Vec::new();
    };
    info!(count = entries.len(), "Found proceedings entries");

    let proceedings: Vec<Proceeding> = entries
        .iter()
        .filter_map(|entry| {
            let value_id = string_field(entry, "valueId")?;
            let fields = (
                string_field(entry, "assembly_name_english"),
                string_field(entry, "date"),
                string_field(entry, "session_year"),
                string_field(entry, "Session_name_english"),
            );
            let (Some(assembly_name), Some(date), Some(session_year), Some(session_name)) = fields
            else {
                debug!(value_id = %value_id, "Skipping entry with missing data");
                return None;
            };

            let first_word = |name: &str| name.split(' ').next().and_then(ordinal_number);
            let (Some(assembly_number), Some(session_number)) =
                (first_word(&assembly_name), first_word(&session_name))
            else {
                warn!(
                    value_id = %value_id,
                    assembly = %assembly_name,
                    session = %session_name,
                    "Unrecognised assembly or session name"
                );
                return None;
            };

            let date_slug = date.replace('/', "-");
            Some(Proceeding {
                pdf_url: format!("{base_url}/getImageHandler.ashx?ID={value_id}&con=2"),
                identifier: format!(
                    "uplegislature.assembly{assembly_number}.session{}.{date_slug}",
                    session_number.replace(' ', "_")
                ),
                filename: format!("{date_slug}.pdf"),
                value_id,
                assembly_name,
                assembly_number,
                date,
                session_year,
                session_name,
                session_number,
            })
        })
        .collect();

    info!(count = proceedings.len(), "Found valid documents with PDFs");
    proceedings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Value {
        json!({
            "d": [
                {
                    "valueId": 1201,
                    "assembly_name_english": "Eighteenth Legislative Assembly",
                    "date": "22-05-2023",
                    "session_year": "2023",
                    "Session_name_english": "Second Session"
                },
                {
                    "valueId": "1202",
                    "assembly_name_english": "Eighteenth Legislative Assembly",
                    "date": "29-03-2022",
                    "session_year": "2022",
                    "Session_name_english": "Election of Speaker"
                },
                {
                    "valueId": "",
                    "assembly_name_english": "Eighteenth Legislative Assembly",
                    "date": "01-01-2023",
                    "session_year": "2023",
                    "Session_name_english": "First Session"
                },
                {
                    "valueId": "1204",
                    "assembly_name_english": "Eighteenth Legislative Assembly",
                    "date": "",
                    "session_year": "2023",
                    "Session_name_english": "First Session"
                },
                {
                    "valueId": "1205",
                    "assembly_name_english": "Umpteenth Legislative Assembly",
                    "date": "02-01-2023",
                    "session_year": "2023",
                    "Session_name_english": "First Session"
                }
            ]
        })
    }

    #[test]
    fn test_ordinal_number() {
        assert_eq!(ordinal_number("First").as_deref(), Some("1"));
        assert_eq!(ordinal_number("Eight").as_deref(), Some("8"));
        assert_eq!(ordinal_number("Twentieth").as_deref(), Some("20"));
        assert_eq!(
            ordinal_number("Election").as_deref(),
            Some("Election of Speaker")
        );
        assert_eq!(ordinal_number("Umpteenth"), None);
    }

    #[test]
    fn test_parse_proceedings() {
        let proceedings = parse_proceedings(&table(), BASE_URL);
        assert_eq!(proceedings.len(), 2);

        let first = &proceedings[0];
        assert_eq!(first.value_id, "1201");
        assert_eq!(first.assembly_number, "18");
        assert_eq!(first.session_number, "2");
        assert_eq!(first.identifier, "uplegislature.assembly18.session2.22-05-2023");
        assert_eq!(first.filename, "22-05-2023.pdf");
        assert_eq!(
            first.pdf_url,
            "https://uplegisassembly.gov.in/getImageHandler.ashx?ID=1201&con=2"
        );

        assert_eq!(
            proceedings[1].identifier,
            "uplegislature.assembly18.sessionElection_of_Speaker.29-03-2022"
        );
    }

    #[test]
    fn test_parse_proceedings_without_entries() {
        assert!(parse_proceedings(&json!({"x": 1}), BASE_URL).is_empty());
    }

    #[test]
    fn test_item_metadata() {
        let site = UttarPradesh::new();
        let proceeding = parse_proceedings(&table(), BASE_URL).remove(0);
        let sidecar = match serde_json::to_value(&proceeding).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let meta = item_metadata(site.profile(), &proceeding, &sidecar);
        assert_eq!(meta.get_str("title"), Some("Assembly 18, Session 2, 22-05-2023"));
        assert_eq!(meta.get_str("date"), Some("2023-05-22"));
        assert_eq!(meta.get_str("up_legislature_session_year"), Some("2023"));
        assert_eq!(meta.get_str("up_legislature_assembly_number"), Some("18"));
        assert!(meta.get("up_legislature_valueId").is_none());
        assert!(meta.get("up_legislature_pdf_url").is_none());
    }
}
