//! JSON Feed 1.0/1.1 reader.
//!
//! Items are deserialized one at a time so a single bad item does not take
//! the rest of the document down with it.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::parser::{DocumentHeader, ParseError, RawEntry};

#[derive(Debug, Deserialize)]
struct JsonFeedDocument {
    version: String,
    title: Option<String>,
    home_page_url: Option<String>,
    #[serde(default)]
    hubs: Vec<serde_json::Value>,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: Option<JsonId>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
}

/// Publishers emit numeric ids despite the format requiring strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonId {
    Text(String),
    Number(serde_json::Number),
}

impl JsonId {
    fn into_string(self) -> String {
        match self {
            JsonId::Text(s) => s,
            JsonId::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn read(bytes: &[u8]) -> Result<(DocumentHeader, Vec<Result<RawEntry, String>>), ParseError> {
    let document: JsonFeedDocument = serde_json::from_slice(bytes)
        .map_err(|e| ParseError::MalformedDocument(format!("invalid JSON Feed: {e}")))?;

    if !document.version.contains("jsonfeed.org/version/") {
        return Err(ParseError::MalformedDocument(format!(
            "unsupported JSON Feed version: {}",
            document.version
        )));
    }

    let header = DocumentHeader {
        title: document.title,
        site_link: document.home_page_url,
        hub: document
            .hubs
            .iter()
            .find_map(|hub| hub.get("url")?.as_str())
            .map(str::to_string),
    };

    let entries = document
        .items
        .into_iter()
        .map(|value| {
            serde_json::from_value::<JsonFeedItem>(value)
                .map(into_raw_entry)
                .map_err(|e| format!("invalid JSON Feed item: {e}"))
        })
        .collect();

    Ok((header, entries))
}

fn into_raw_entry(item: JsonFeedItem) -> RawEntry {
    let content = item
        .content_html
        .or_else(|| item.content_text.map(|text| escape_text(&text)))
        .or(item.summary);

    let published = item
        .date_published
        .or(item.date_modified)
        .and_then(|date| DateTime::parse_from_rfc3339(date.trim()).ok())
        .map(|date| date.with_timezone(&Utc));

    RawEntry {
        id: item.id.map(JsonId::into_string),
        title: item.title,
        links: item.url.into_iter().chain(item.external_url).collect(),
        content,
        published,
    }
}

/// `content_text` is plain text; escape it so the sanitizer keeps it verbatim.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
