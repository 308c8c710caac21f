use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use thiserror::Error;
use url::Url;

use super::dialect::{self, Dialect};
use super::identity::{self, IdentitySource};
use super::json_feed;
use crate::model::CanonicalEntry;
use crate::sanitize::{sanitize_title, Sanitizer};
use crate::util::truncate_chars;

/// Titles longer than this are cut before storage.
const MAX_TITLE_CHARS: usize = 1000;

/// The document as a whole could not be read.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed feed document: {0}")]
    MalformedDocument(String),
}

/// A single entry was dropped; the rest of the document is unaffected.
#[derive(Debug, Error)]
#[error("Entry skipped: {0}")]
pub struct PartialEntryError(pub String);

/// Feed-level metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct DocumentHeader {
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub hub: Option<String>,
}

/// An entry as read from the document, before normalization.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Candidate links, most preferred first
    pub links: Vec<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A parsed feed document.
#[derive(Debug)]
pub struct ParsedDocument<'a> {
    pub dialect: Dialect,
    /// Plain-text feed title, if the document has one
    pub title: Option<String>,
    pub site_link: Option<String>,
    /// WebSub hub advertised by the feed
    pub hub: Option<String>,
    pub entries: EntryStream<'a>,
}

/// Lazily normalizes entries in document order.
///
/// Single pass: entries that fail normalization are skipped and counted,
/// never yielded.
#[derive(Debug)]
pub struct EntryStream<'a> {
    raw: std::vec::IntoIter<Result<RawEntry, String>>,
    base: Option<Url>,
    fetched_at: DateTime<Utc>,
    sanitizer: &'a Sanitizer,
    skipped: usize,
}

impl EntryStream<'_> {
    /// Entries dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn normalize(&self, raw: RawEntry) -> Result<CanonicalEntry, PartialEntryError> {
        let title = raw
            .title
            .as_deref()
            .map(|t| truncate_chars(&sanitize_title(t), MAX_TITLE_CHARS).into_owned())
            .unwrap_or_default();
        let link = raw.links.iter().find_map(|href| self.resolve_link(href));
        let raw_content = raw.content.unwrap_or_default();
        let explicit_id = raw.id.as_deref().map(str::trim).filter(|id| !id.is_empty());

        if explicit_id.is_none()
            && link.is_none()
            && title.is_empty()
            && raw_content.trim().is_empty()
        {
            return Err(PartialEntryError(
                "no identifier, link, title or content".into(),
            ));
        }

        let (identity, aliases) = identity::derive(IdentitySource {
            explicit_id,
            link: link.as_deref(),
            title: &title,
            raw_content: &raw_content,
            published: raw.published,
        });
        let sanitized = self.sanitizer.sanitize(&raw_content, self.base.as_ref());

        Ok(CanonicalEntry {
            identity,
            aliases,
            title,
            link,
            published: raw.published.unwrap_or(self.fetched_at),
            has_explicit_date: raw.published.is_some(),
            raw_content,
            sanitized,
        })
    }

    /// Absolute http(s) links pass; relative ones are resolved against the
    /// document URL; anything else is discarded.
    fn resolve_link(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        let url = match Url::parse(href) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base.as_ref()?.join(href).ok()?,
            Err(_) => return None,
        };
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

impl Iterator for EntryStream<'_> {
    type Item = CanonicalEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self
                .raw
                .next()?
                .map_err(PartialEntryError)
                .and_then(|raw| self.normalize(raw));
            match result {
                Ok(entry) => return Some(entry),
                Err(e) => {
                    self.skipped += 1;
                    tracing::debug!(error = %e, "Dropping unusable feed entry");
                }
            }
        }
    }
}

/// Parses a fetched body into feed metadata and a lazy entry stream.
///
/// The dialect is sniffed from the body. An unrecognized root, an empty
/// body or a document that cannot be read at all is a
/// [`ParseError::MalformedDocument`]; individual broken entries are skipped
/// inside the stream.
///
/// Entries without a date are stamped with `fetched_at`.
pub fn parse_document<'a>(
    bytes: &[u8],
    content_type: Option<&str>,
    base_url: Option<&str>,
    fetched_at: DateTime<Utc>,
    sanitizer: &'a Sanitizer,
) -> Result<ParsedDocument<'a>, ParseError> {
    let dialect = dialect::sniff(bytes, content_type).ok_or_else(|| {
        ParseError::MalformedDocument(format!(
            "unrecognized document (content type {})",
            content_type.unwrap_or("unknown")
        ))
    })?;

    let (header, raw) = match dialect {
        Dialect::JsonFeed => json_feed::read(bytes)?,
        Dialect::Rss | Dialect::Rdf | Dialect::Atom => read_xml(bytes, base_url)?,
    };

    let base = base_url.and_then(|u| Url::parse(u).ok());
    let title = header
        .title
        .as_deref()
        .map(sanitize_title)
        .filter(|t| !t.is_empty());
    let site_link = header
        .site_link
        .as_deref()
        .and_then(|link| absolute_http(link, base.as_ref()));
    let hub = header
        .hub
        .as_deref()
        .and_then(|link| absolute_http(link, base.as_ref()));

    Ok(ParsedDocument {
        dialect,
        title,
        site_link,
        hub,
        entries: EntryStream {
            raw: raw.into_iter(),
            base,
            fetched_at,
            sanitizer,
            skipped: 0,
        },
    })
}

fn absolute_http(link: &str, base: Option<&Url>) -> Option<String> {
    let url = match base {
        Some(base) => base.join(link.trim()).ok()?,
        None => Url::parse(link.trim()).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn read_xml(
    bytes: &[u8],
    base_url: Option<&str>,
) -> Result<(DocumentHeader, Vec<Result<RawEntry, String>>), ParseError> {
    // Empty ids mark entries without an identifier of their own; the
    // default generator would hash unstable fields into one.
    let parser = feed_rs::parser::Builder::new()
        .base_uri(base_url)
        .id_generator(|_, _, _| String::new())
        .build();
    let feed = parser
        .parse(bytes)
        .map_err(|e| ParseError::MalformedDocument(e.to_string()))?;

    let header = DocumentHeader {
        title: feed.title.map(|t| t.content),
        site_link: preferred_link(&feed.links).map(|l| l.href.clone()),
        hub: feed
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("hub"))
            .map(|l| l.href.clone()),
    };
    let entries = feed.entries.into_iter().map(|e| Ok(raw_entry(e))).collect();
    Ok((header, entries))
}

fn raw_entry(entry: Entry) -> RawEntry {
    let mut links: Vec<&Link> = entry
        .links
        .iter()
        .filter(|l| !matches!(l.rel.as_deref(), Some("self" | "enclosure" | "replies" | "edit")))
        .collect();
    // Alternate (or unqualified) links first, stable otherwise.
    links.sort_by_key(|l| !is_alternate(l));

    let content = entry
        .content
        .and_then(|c| c.body)
        .filter(|body| !body.trim().is_empty())
        .or_else(|| entry.summary.map(|s| s.content));

    RawEntry {
        id: Some(entry.id),
        title: entry.title.map(|t| t.content),
        links: links.into_iter().map(|l| l.href.clone()).collect(),
        content,
        published: entry.published.or(entry.updated),
    }
}

fn is_alternate(link: &Link) -> bool {
    matches!(link.rel.as_deref(), None | Some("alternate"))
}

fn preferred_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| is_alternate(l))
        .or_else(|| {
            links
                .iter()
                .find(|l| !matches!(l.rel.as_deref(), Some("self" | "hub")))
        })
}
