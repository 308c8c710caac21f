//! Content sniffing for the supported syndication dialects.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;

/// The closed set of formats the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// RSS 0.9x / 2.0 (`<rss>` root)
    Rss,
    /// RSS 1.0 (`<rdf:RDF>` root)
    Rdf,
    /// Atom 1.0 (`<feed>` root)
    Atom,
    /// JSON Feed 1.x
    JsonFeed,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Rss => "rss",
            Dialect::Rdf => "rdf",
            Dialect::Atom => "atom",
            Dialect::JsonFeed => "json",
        })
    }
}

/// Upper bound on prolog events (declaration, comments, doctype, PIs)
/// read before the root element.
const MAX_PROLOG_EVENTS: usize = 64;

/// Identifies the dialect from the body, falling back to nothing.
///
/// The declared content type only breaks ties for bodies that start with
/// neither `<` nor `{`; the bytes are authoritative because servers
/// mislabel feeds constantly.
pub fn sniff(bytes: &[u8], content_type: Option<&str>) -> Option<Dialect> {
    let body = trim_start(bytes);
    match body.first() {
        Some(b'{') => Some(Dialect::JsonFeed),
        Some(b'<') => sniff_xml_root(body),
        Some(_) => None,
        None => {
            tracing::trace!(content_type = ?content_type, "Empty feed body");
            None
        }
    }
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn sniff_xml_root(body: &[u8]) -> Option<Dialect> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();

    for _ in 0..MAX_PROLOG_EVENTS {
        let event = reader.read_event_into(&mut buf).ok()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                return match e.local_name().as_ref() {
                    b"rss" => Some(Dialect::Rss),
                    b"RDF" => Some(Dialect::Rdf),
                    b"feed" => Some(Dialect::Atom),
                    _ => None,
                };
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
    None
}
