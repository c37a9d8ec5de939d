//! Small text helpers shared by the site parsers.

use chrono::NaiveDate;
use regex::Regex;
use scraper::ElementRef;

static DMY_DATE: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"(\d{1,2})[/-](\d{1,2})[/-](\d{4})").unwrap());

/// Sanitize a filename to be safe for URLs and filesystems.
///
/// Spaces and URL-special characters become underscores, runs of
/// underscores collapse, and the stem is capped at 200 bytes. The extension
/// is kept.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let (name, ext) = match filename.rfind('.') {
        Some(dot_pos) => filename.split_at(dot_pos),
        None => (filename, ""),
    };

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '-' | '_' | '.' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();

    let sanitized = sanitized
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    const MAX_NAME_LENGTH: usize = 200;
    let mut end = sanitized.len().min(MAX_NAME_LENGTH);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{ext}", &sanitized[..end])
}

/// Replace every character outside `[A-Za-z0-9_-]` with an underscore.
#[must_use]
pub fn word_chars_only(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Collapse runs of whitespace to single spaces and trim.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text content of an element, whitespace-normalized.
#[must_use]
pub fn element_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Text content of an element with each text node trimmed and concatenated.
///
/// Matches how DSpace-style tables render labels split across tags.
#[must_use]
pub fn element_text_compact(element: &ElementRef<'_>) -> String {
    element.text().map(str::trim).collect::<String>()
}

/// Find the first `DD-MM-YYYY` or `DD/MM/YYYY` date in `text` and return it as ISO `YYYY-MM-DD`.
#[must_use]
pub fn dmy_to_iso(text: &str) -> Option<String> {
    let caps = DMY_DATE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Value of a Roman numeral between I and XXXIX.
#[must_use]
pub fn roman_to_int(numeral: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut prev = 0u32;
    for c in numeral.trim().to_uppercase().chars().rev() {
        let value = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            _ => return None,
        };
        if value < prev {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            prev = value;
        }
    }
    (total > 0 && total < 40).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("simple.pdf"), "simple.pdf");
        assert_eq!(sanitize_filename("my file (1).pdf"), "my_file_1.pdf");
        assert_eq!(sanitize_filename("a//b??c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename("_leading.pdf"), "leading.pdf");
        let long = format!("{}.pdf", "x".repeat(300));
        assert_eq!(sanitize_filename(&long).len(), 204);
    }

    #[test]
    fn test_word_chars_only() {
        assert_eq!(word_chars_only("LA_15_2_(1)"), "LA_15_2__1_");
        assert_eq!(word_chars_only("a b.c"), "a_b_c");
    }

    #[test]
    fn test_dmy_to_iso() {
        assert_eq!(dmy_to_iso("03-05-1952"), Some("1952-05-03".to_string()));
        assert_eq!(dmy_to_iso("Sitting on 3/5/1952"), Some("1952-05-03".to_string()));
        assert_eq!(dmy_to_iso("31-02-2000"), None);
        assert_eq!(dmy_to_iso("no date"), None);
    }

    #[test]
    fn test_roman_to_int() {
        assert_eq!(roman_to_int("I"), Some(1));
        assert_eq!(roman_to_int("iv"), Some(4));
        assert_eq!(roman_to_int("IX"), Some(9));
        assert_eq!(roman_to_int("XIV"), Some(14));
        assert_eq!(roman_to_int("XXV"), Some(25));
        assert_eq!(roman_to_int("Q"), None);
        assert_eq!(roman_to_int(""), None);
    }

    #[test]
    fn test_element_text() {
        let html = Html::parse_fragment("<table><tr><td>  Assembly \n <b>No</b> </td></tr></table>");
        let td = html.select(&Selector::parse("td").unwrap()).next().unwrap();
        assert_eq!(element_text(&td), "Assembly No");
        assert_eq!(element_text_compact(&td), "AssemblyNo");
    }
}
