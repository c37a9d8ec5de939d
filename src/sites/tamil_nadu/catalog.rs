//! Search-result scraping and the CSV catalog it feeds.

use std::path::Path;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::text::element_text_compact;
use crate::workspace::exists;

/// Rows requested per results page.
pub const PAGE_SIZE: u64 = 100;

const TARGET_HEADERS: &[&str] = &["Assembly No", "Session No"];

static TABLE: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("table").expect("Invalid selector"));
static ROW: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("tr").expect("Invalid selector"));
static CELL: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("th, td").expect("Invalid selector"));
static LINK: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));

/// One catalog row: ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Set a column, replacing an earlier value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    fn has_content(&self) -> bool {
        self.columns
            .iter()
            .any(|(c, v)| c != "page_start" && !c.starts_with("link_") && !v.is_empty())
    }
}

/// Column name used in the catalog: spaces to `_`, `.()` dropped, lowercased.
#[must_use]
pub fn clean_name(name: &str) -> String {
    name.replace(' ', "_")
        .replace(['.', '(', ')'], "")
        .to_lowercase()
}

/// URL of the results page starting at row `start`.
#[must_use]
pub fn search_url(base_url: &str, start: u64) -> String {
    format!(
        "{base_url}/jspui/simple-search?query=&location=123456789%2F100&sort_by=dc.date_dt&order=asc&rpp={PAGE_SIZE}&etal=0&start={start}"
    )
}

fn find_target_table<'a>(document: &'a Html) -> Option<(ElementRef<'a>, Vec<String>)> {
    document.select(&TABLE).find_map(|table| {
        let header_row = table.select(&ROW).next()?;
        let headers: Vec<String> = header_row
            .select(&CELL)
            .map(|c| element_text_compact(&c))
            .collect();
        TARGET_HEADERS
            .iter()
            .any(|t| headers.iter().any(|h| h.as_str() == *t))
            .then_some((table, headers))
    })
}

/// Parse one results page into catalog rows.
///
/// `page_url` resolves relative links; `start` is recorded as `page_start`.
#[must_use]
pub fn parse_results(html: &str, page_url: &str, start: u64) -> Vec<Row> {
    let document = Html::parse_document(html);
    let Some((table, headers)) = find_target_table(&document) else {
        warn!(start, "Could not find table with Assembly No/Session No headers");
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();

    let mut rows = Vec::new();
    for tr in table.select(&ROW).skip(1) {
        let cells: Vec<String> = tr.select(&CELL).map(|c| element_text_compact(&c)).collect();
        if cells.len() < 2 {
            continue;
        }

        let mut row = Row::default();
        for (header, value) in headers.iter().zip(&cells) {
            if header.eq_ignore_ascii_case("action") {
                continue;
            }
            row.set(clean_name(header), value.as_str());
        }

        for (idx, link) in tr.select(&LINK).enumerate() {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let url = base
                .as_ref()
                .and_then(|b| b.join(href).ok())
                .map_or_else(|| href.to_string(), String::from);
            let text = element_text_compact(&link);
            let name = [link.value().attr("alt"), link.value().attr("title")]
                .into_iter()
                .flatten()
                .find(|n| !n.is_empty())
                .map(String::from)
                .or_else(|| (!text.is_empty()).then_some(text))
                .unwrap_or_else(|| format!("link{idx}"));
            row.set(clean_name(&name), url);
        }

        row.set("page_start", start.to_string());
        if row.has_content() {
            rows.push(row);
        }
    }
    rows
}

/// Read every row of the catalog. Malformed records are skipped.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub async fn read_catalog(path: &Path) -> Result<Vec<Row>> {
    if !exists(path).await {
        return Ok(Vec::new());
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read catalog header: {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!(line, "Skipping malformed catalog record: {e}");
                continue;
            }
        };
        let mut row = Row::default();
        for (column, value) in headers.iter().zip(record.iter()) {
            row.set(column, value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Append rows to the catalog, writing a header when the file is new.
///
/// An existing file keeps its header; columns it does not know are dropped.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read or written.
pub async fn append_catalog(path: &Path, rows: &[Row]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let existing_header = if exists(path).await {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        Some(reader.headers()?.iter().map(String::from).collect::<Vec<_>>())
    } else {
        None
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = match existing_header {
        Some(header) => header,
        None => {
            let mut header: Vec<String> = Vec::new();
            for row in rows {
                for (column, _) in row.iter() {
                    if !header.iter().any(|h| h == column) {
                        header.push(column.to_string());
                    }
                }
            }
            writer.write_record(&header)?;
            header
        }
    };
    for row in rows {
        writer.write_record(header.iter().map(|h| row.get(h).unwrap_or("")))?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to encode catalog rows: {}", e.error()))?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open catalog: {}", path.display()))?;
    file.write_all(&data)
        .await
        .with_context(|| format!("Failed to write catalog: {}", path.display()))?;
    Ok(())
}

/// Where to resume scraping: one page past the highest recorded `page_start`.
#[must_use]
pub fn resume_point(rows: &[Row]) -> u64 {
    rows.iter()
        .filter_map(|r| r.get("page_start")?.parse::<u64>().ok())
        .max()
        .map_or(0, |last| last + PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RESULTS_PAGE: &str = r#"<html><body>
        <table class="nav"><tr><td>Home</td></tr></table>
        <table class="table">
            <tr><th>Assembly No.</th><th>Session No</th><th>Date</th><th>Subject</th><th>Action</th></tr>
            <tr>
                <td>16</td><td>3</td><td>12-01-2022</td><td>Governor's Address</td>
                <td>
                    <a href="/jspui/viewer.html?file=/jspui/bitstream/123/1/DB_LA_16_3_12012022.pdf" title="Preview">x</a>
                    <a href="/jspui/bitstream/123/1/DB_LA_16_3_12012022.pdf"></a>
                </td>
            </tr>
            <tr><td></td></tr>
        </table>
    </body></html>"#;

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("Assembly No."), "assembly_no");
        assert_eq!(clean_name("Date (DD-MM)"), "date_dd-mm");
    }

    #[test]
    fn test_parse_results() {
        let url = search_url("https://tnlasdigital.tn.gov.in", 200);
        let rows = parse_results(RESULTS_PAGE, &url, 200);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("assembly_no"), Some("16"));
        assert_eq!(row.get("subject"), Some("Governor's Address"));
        assert_eq!(row.get("action"), None);
        assert_eq!(
            row.get("preview"),
            Some("https://tnlasdigital.tn.gov.in/jspui/viewer.html?file=/jspui/bitstream/123/1/DB_LA_16_3_12012022.pdf")
        );
        assert_eq!(
            row.get("link1"),
            Some("https://tnlasdigital.tn.gov.in/jspui/bitstream/123/1/DB_LA_16_3_12012022.pdf")
        );
        assert_eq!(row.get("page_start"), Some("200"));
    }

    #[test]
    fn test_missing_table_yields_nothing() {
        assert!(parse_results("<table><tr><th>Other</th></tr></table>", "http://x/", 0).is_empty());
    }

    #[tokio::test]
    async fn test_catalog_append_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tn_digital_data.csv");
        assert!(read_catalog(&path).await.unwrap().is_empty());
        assert_eq!(resume_point(&[]), 0);

        let url = search_url("https://tnlasdigital.tn.gov.in", 0);
        let first = parse_results(RESULTS_PAGE, &url, 0);
        append_catalog(&path, &first).await.unwrap();

        let mut second = first.clone();
        second[0].set("page_start", "100");
        second[0].set("unknown_column", "dropped");
        append_catalog(&path, &second).await.unwrap();

        let rows = read_catalog(&path).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("subject"), Some("Governor's Address"));
        assert_eq!(rows[1].get("unknown_column"), None);
        assert_eq!(resume_point(&rows), 200);
    }
}
