//! Item metadata for Internet Archive uploads.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::constants::PUBLIC_DOMAIN_LICENSE_URL;
use crate::sites::SiteProfile;

/// A metadata value: either a single string or a repeated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// Ordered set of metadata fields for one archive item.
///
/// Setting an existing key replaces its value in place, keeping the original
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ItemMetadata {
    entries: Vec<(String, MetaValue)>,
}

impl ItemMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata every legislature item starts from.
    #[must_use]
    pub fn texts(creator: &str, languages: &[&str], subjects: &[&str]) -> Self {
        let mut meta = Self::new();
        meta.set("creator", creator);
        meta.set("mediatype", "texts");
        meta.set_list("language", languages.iter().map(ToString::to_string).collect());
        meta.set("licenseurl", PUBLIC_DOMAIN_LICENSE_URL);
        meta.set_list("subject", subjects.iter().map(ToString::to_string).collect());
        meta
    }

    /// Base metadata for a site, with its collection when it has one.
    #[must_use]
    pub fn from_profile(profile: &SiteProfile) -> Self {
        let mut meta = Self::texts(profile.creator, profile.languages, profile.subjects);
        if let Some(collection) = profile.collection {
            meta.set("collection", collection);
        }
        meta
    }

    pub fn set(&mut self, key: &str, value: impl Into<MetaValue>) -> &mut Self {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
        self
    }

    pub fn set_list(&mut self, key: &str, values: Vec<String>) -> &mut Self {
        self.set(key, MetaValue::List(values))
    }

    /// Move `key` to the end, keeping its value.
    pub fn move_to_end(&mut self, key: &str) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == key) {
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Single-valued field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            MetaValue::Single(s) => Some(s),
            MetaValue::List(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy sidecar fields into the metadata as `<prefix><key>`.
    ///
    /// Strings are copied as-is, lists are joined with `", "`, numbers and
    /// booleans are stringified, nulls and empty strings are skipped. Keys in
    /// `excluded` are not copied.
    pub fn extend_prefixed(&mut self, sidecar: &Map<String, Value>, prefix: &str, excluded: &[&str]) {
        for (key, value) in sidecar {
            if excluded.contains(&key.as_str()) {
                continue;
            }
            if let Some(text) = flatten_value(value) {
                self.set(&format!("{prefix}{key}"), text);
            }
        }
    }

    /// Render as Internet Archive S3 headers.
    ///
    /// Underscores in keys become `--`, list values use numbered
    /// `x-archive-metaNN-` headers, and values that cannot travel in a raw
    /// header are wrapped as `uri(<percent-encoded>)`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot form a valid header name.
    pub fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.entries {
            let header_key = key.replace('_', "--").to_lowercase();
            match value {
                MetaValue::Single(v) => {
                    insert_header(&mut headers, &format!("x-archive-meta-{header_key}"), v)?;
                }
                MetaValue::List(values) => {
                    for (i, v) in values.iter().enumerate() {
                        insert_header(
                            &mut headers,
                            &format!("x-archive-meta{i:02}-{header_key}"),
                            v,
                        )?;
                    }
                }
            }
        }
        Ok(headers)
    }
}

impl Serialize for ItemMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl TryFrom<Map<String, Value>> for ItemMetadata {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut meta = Self::new();
        for (key, value) in map {
            let value = match value {
                Value::Array(items) => MetaValue::List(
                    items
                        .iter()
                        .map(|v| flatten_value(v).unwrap_or_default())
                        .collect(),
                ),
                other => MetaValue::Single(
                    flatten_value(&other).ok_or_else(|| format!("empty metadata value for {key}"))?,
                ),
            };
            meta.set(&key, value);
        }
        Ok(meta)
    }
}

/// Render a sidecar value as a single metadata string.
#[must_use]
pub fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> anyhow::Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid metadata key {name}: {e}"))?;
    headers.append(name, encode_header_value(value)?);
    Ok(())
}

fn encode_header_value(value: &str) -> anyhow::Result<HeaderValue> {
    let plain = value.chars().all(|c| c.is_ascii() && !c.is_ascii_control());
    let encoded = if plain {
        value.to_string()
    } else {
        format!("uri({})", urlencoding::encode(value))
    };
    HeaderValue::from_str(&encoded).map_err(|e| anyhow::anyhow!("Invalid metadata value: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_texts_base_fields() {
        let meta = ItemMetadata::texts(
            "Rajya Sabha Secretariat",
            &["English", "Hindi"],
            &["Parliament of India", "Rajya Sabha"],
        );
        assert_eq!(meta.get_str("creator"), Some("Rajya Sabha Secretariat"));
        assert_eq!(meta.get_str("mediatype"), Some("texts"));
        assert_eq!(meta.get_str("licenseurl"), Some(PUBLIC_DOMAIN_LICENSE_URL));
        assert_eq!(
            meta.get("language"),
            Some(&MetaValue::List(vec!["English".into(), "Hindi".into()]))
        );
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut meta = ItemMetadata::new();
        meta.set("title", "a").set("date", "2020-01-01").set("title", "b");
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["title", "date"]);
        assert_eq!(meta.get_str("title"), Some("b"));
    }

    #[test]
    fn test_extend_prefixed() {
        let sidecar = json!({
            "url": "http://example.com/a.pdf",
            "volume": "12",
            "members": ["A", "B"],
            "page": 4,
            "has_pdf": true,
            "missing": null,
            "empty": ""
        });
        let mut meta = ItemMetadata::new();
        meta.extend_prefixed(sidecar.as_object().unwrap(), "kla_", &["url"]);

        assert_eq!(meta.get("kla_url"), None);
        assert_eq!(meta.get_str("kla_volume"), Some("12"));
        assert_eq!(meta.get_str("kla_members"), Some("A, B"));
        assert_eq!(meta.get_str("kla_page"), Some("4"));
        assert_eq!(meta.get_str("kla_has_pdf"), Some("true"));
        assert_eq!(meta.get("kla_missing"), None);
        assert_eq!(meta.get("kla_empty"), None);
    }

    #[test]
    fn test_headers() {
        let mut meta = ItemMetadata::texts("Assam Legislative Assembly", &["English", "Assamese"], &[]);
        meta.set("assam_legislature_collection_url", "http://example.com/handle/1");
        meta.set("title", "অসম");
        meta.set("description", "line one\nline two");

        let headers = meta.headers().unwrap();
        assert_eq!(headers["x-archive-meta-creator"], "Assam Legislative Assembly");
        assert_eq!(headers["x-archive-meta00-language"], "English");
        assert_eq!(headers["x-archive-meta01-language"], "Assamese");
        assert_eq!(
            headers["x-archive-meta-assam--legislature--collection--url"],
            "http://example.com/handle/1"
        );
        assert!(headers["x-archive-meta-title"]
            .to_str()
            .unwrap()
            .starts_with("uri(%E0%A6"));
        assert_eq!(
            headers["x-archive-meta-description"],
            "uri(line%20one%0Aline%20two)"
        );
        // Empty subject list emits nothing
        assert!(!headers.keys().any(|k| k.as_str().ends_with("-subject")));
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let mut meta = ItemMetadata::texts("Tamil Nadu Legislative Assembly", &["tamil", "eng"], &["Tamil Nadu"]);
        meta.set("date", "1952-05-03");

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.starts_with("{\"creator\""));
        let back: ItemMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_move_to_end() {
        let mut meta = ItemMetadata::new();
        meta.set("a", "1").set("b", "2").set("c", "3");
        meta.move_to_end("a");
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }
}
