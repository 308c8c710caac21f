//! Feed retrieval and normalization.
//!
//! - [`fetcher`] - conditional HTTP GET with manual redirect handling
//! - [`parser`] - dialect sniffing and normalization into [`CanonicalEntry`]
//! - [`dedup`] - splitting parsed entries into new and already-known
//!
//! The identity rule that ties the three together lives in a private
//! submodule; every entry leaves the parser with a primary key and aliases.
//!
//! [`CanonicalEntry`]: crate::model::CanonicalEntry

pub mod dedup;
mod dialect;
pub mod fetcher;
mod identity;
mod json_feed;
pub mod parser;

pub use dedup::{dedupe, select_new, DedupResult};
pub use dialect::Dialect;
pub use fetcher::{FetchError, FetchOutcome, FetchedDocument, Fetcher};
pub use parser::{parse_document, EntryStream, ParseError, ParsedDocument, PartialEntryError};
