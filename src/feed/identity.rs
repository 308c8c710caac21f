//! Identity-key selection for parsed entries.
//!
//! Precedence is an explicit ordered rule: item identifier, then canonical
//! link, then a content fingerprint. The keys that lose are kept as aliases
//! so storage can still resolve the entry when a higher-precedence source
//! vanishes from a later fetch.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::model::IdentityKey;

/// Inputs available for identity derivation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdentitySource<'a> {
    pub explicit_id: Option<&'a str>,
    pub link: Option<&'a str>,
    pub title: &'a str,
    pub raw_content: &'a str,
    /// Only dates present in the document; a defaulted fetch time would make
    /// the fingerprint unstable across polls.
    pub published: Option<DateTime<Utc>>,
}

/// Returns the primary key and its aliases, in precedence order.
pub(crate) fn derive(source: IdentitySource<'_>) -> (IdentityKey, Vec<IdentityKey>) {
    let mut keys = Vec::with_capacity(3);

    if let Some(id) = source.explicit_id.map(str::trim).filter(|id| !id.is_empty()) {
        keys.push(IdentityKey::Guid(id.to_string()));
    }
    if let Some(link) = source.link.map(str::trim).filter(|l| !l.is_empty()) {
        keys.push(IdentityKey::Link(link.to_string()));
    }
    keys.push(IdentityKey::Fingerprint(fingerprint(&source)));

    let primary = keys.remove(0);
    (primary, keys)
}

fn fingerprint(source: &IdentitySource<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.raw_content.as_bytes());
    hasher.update([0x1f]);
    if let Some(published) = source.published {
        hasher.update(published.timestamp().to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
