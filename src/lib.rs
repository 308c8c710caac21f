//! Feed-ingestion pipeline: scheduled conditional polling of RSS, RDF, Atom
//! and JSON feeds, normalization into canonical entries, identity-based
//! deduplication and HTML sanitization, persisted to SQLite.
//!
//! - [`scheduler`] decides when each feed is polled and records the outcome
//! - [`feed`] fetches, parses and deduplicates one feed document
//! - [`sanitize`] produces the safe renderings of entry bodies
//! - [`storage`] persists feeds, entries and per-user state

pub mod config;
pub mod feed;
pub mod model;
pub mod sanitize;
pub mod scheduler;
pub mod storage;
pub mod util;
