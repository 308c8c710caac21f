//! Separates never-seen entries from ones already stored for a feed.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::model::{CanonicalEntry, Feed};
use crate::storage::FeedStore;

/// Result of deduplicating one parsed document.
#[derive(Debug, Default)]
pub struct DedupResult {
    /// New entries, oldest first (the order they should be stored in)
    pub new_entries: Vec<CanonicalEntry>,
    /// Entries whose identity key was already stored
    pub known: usize,
    /// Repeats of an earlier entry in the same document
    pub duplicates: usize,
    /// Entries dated before the feed's retention threshold
    pub expired: usize,
}

/// Keeps candidates not yet recorded in `known`.
///
/// `known` holds every key registered for the feed, aliases included, so an
/// entry whose identifier disappeared from the document still resolves
/// through its link or fingerprint. Candidates with an explicit identifier
/// are matched on it alone. Within one document the first
/// occurrence wins. Candidates with an explicit date older than `threshold`
/// are dropped.
pub fn select_new<I>(
    known: &HashSet<String>,
    candidates: I,
    threshold: Option<DateTime<Utc>>,
) -> DedupResult
where
    I: IntoIterator<Item = CanonicalEntry>,
{
    let mut result = DedupResult::default();
    let mut seen = HashSet::new();

    for entry in candidates {
        let key = entry.identity.storage_key();
        // An explicit identifier is authoritative; without one the link and
        // fingerprint keys are tried in turn.
        let is_known = if entry.identity.is_explicit() {
            known.contains(&key)
        } else {
            entry
                .all_keys()
                .any(|k| known.contains(&k.storage_key()))
        };
        if is_known {
            result.known += 1;
            continue;
        }
        if !seen.insert(key) {
            result.duplicates += 1;
            continue;
        }
        if threshold.is_some_and(|t| entry.has_explicit_date && entry.published < t) {
            result.expired += 1;
            continue;
        }
        result.new_entries.push(entry);
    }

    // Documents list newest first.
    result.new_entries.reverse();
    result
}

/// Loads the feed's known keys from `store` and runs [`select_new`].
pub async fn dedupe<S, I>(
    store: &S,
    feed: &Feed,
    candidates: I,
    now: DateTime<Utc>,
) -> Result<DedupResult, S::Error>
where
    S: FeedStore,
    I: IntoIterator<Item = CanonicalEntry>,
{
    let known = store.load_known_identity_keys(feed.id).await?;
    Ok(select_new(&known, candidates, feed.retention.threshold(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdentityKey, SanitizedContent};
    use chrono::{Duration, TimeZone};

    fn entry(identity: IdentityKey, published: Option<DateTime<Utc>>) -> CanonicalEntry {
        CanonicalEntry {
            identity,
            aliases: Vec::new(),
            title: "t".into(),
            link: None,
            published: published.unwrap_or_else(now),
            has_explicit_date: published.is_some(),
            raw_content: String::new(),
            sanitized: SanitizedContent::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn guid(id: &str) -> IdentityKey {
        IdentityKey::Guid(id.into())
    }

    #[test]
    fn test_known_keys_filtered_and_order_reversed() {
        let known: HashSet<String> = [guid("b").storage_key()].into_iter().collect();
        let result = select_new(
            &known,
            vec![
                entry(guid("c"), None),
                entry(guid("b"), None),
                entry(guid("a"), None),
            ],
            None,
        );

        let ids: Vec<_> = result.new_entries.iter().map(|e| e.identity.clone()).collect();
        assert_eq!(ids, vec![guid("a"), guid("c")]);
        assert_eq!(result.known, 1);
    }

    #[test]
    fn test_first_occurrence_wins_within_document() {
        let mut first = entry(guid("x"), None);
        first.title = "first".into();
        let mut second = entry(guid("x"), None);
        second.title = "second".into();

        let result = select_new(&HashSet::new(), vec![first, second], None);
        assert_eq!(result.new_entries.len(), 1);
        assert_eq!(result.new_entries[0].title, "first");
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn test_link_key_matches_stored_alias() {
        // Entry stored under its guid registered its link as an alias.
        let known: HashSet<String> = [
            guid("urn:1").storage_key(),
            IdentityKey::Link("https://x/1".into()).storage_key(),
        ]
        .into_iter()
        .collect();

        let result = select_new(
            &known,
            vec![entry(IdentityKey::Link("https://x/1".into()), None)],
            None,
        );
        assert!(result.new_entries.is_empty());
        assert_eq!(result.known, 1);
    }

    #[test]
    fn test_changed_link_falls_back_to_fingerprint() {
        let fingerprint = IdentityKey::Fingerprint("f00d".into());
        let known: HashSet<String> = [
            IdentityKey::Link("https://x/old".into()).storage_key(),
            fingerprint.storage_key(),
        ]
        .into_iter()
        .collect();

        let mut moved = entry(IdentityKey::Link("https://x/new".into()), None);
        moved.aliases = vec![fingerprint];
        let result = select_new(&known, vec![moved], None);
        assert!(result.new_entries.is_empty());
        assert_eq!(result.known, 1);
    }

    #[test]
    fn test_explicit_id_ignores_aliases() {
        let link = IdentityKey::Link("https://x/1".into());
        let known: HashSet<String> = [link.storage_key()].into_iter().collect();

        let mut candidate = entry(guid("urn:2"), None);
        candidate.aliases = vec![link];
        let result = select_new(&known, vec![candidate], None);
        assert_eq!(result.new_entries.len(), 1);
    }

    #[test]
    fn test_expired_entries_skipped_but_undated_kept() {
        let threshold = now() - Duration::days(30);
        let result = select_new(
            &HashSet::new(),
            vec![
                entry(guid("old"), Some(now() - Duration::days(45))),
                entry(guid("fresh"), Some(now() - Duration::days(2))),
                entry(guid("undated"), None),
            ],
            Some(threshold),
        );
        let ids: Vec<_> = result.new_entries.iter().map(|e| e.identity.clone()).collect();
        assert_eq!(ids, vec![guid("undated"), guid("fresh")]);
        assert_eq!(result.expired, 1);
    }

    #[test]
    fn test_empty_input() {
        let result = select_new(&HashSet::new(), Vec::new(), None);
        assert!(result.new_entries.is_empty());
        assert_eq!(result.known + result.duplicates + result.expired, 0);
    }
}
