//! Canonical data shapes shared by the fetcher, parser, deduplicator,
//! scheduler and storage layers.
//!
//! Relationships between feeds, categories and users are plain ids resolved
//! through the storage collaborator; nothing here holds a live object graph.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

/// Placeholder shown wherever a plain-text title is empty.
pub const UNTITLED: &str = "(No title)";

// ============================================================================
// Feed
// ============================================================================

/// Cached HTTP validators for conditional requests.
///
/// Values are stored exactly as the server sent them; `last_modified` is
/// echoed back verbatim in `If-Modified-Since`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Keeps any validator the server did not resend.
    pub fn merged_with(&self, fresh: &Validators) -> Validators {
        Validators {
            etag: fresh.etag.clone().or_else(|| self.etag.clone()),
            last_modified: fresh
                .last_modified
                .clone()
                .or_else(|| self.last_modified.clone()),
        }
    }
}

/// A subscribed feed as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub url: String,
    /// Title announced by the feed document on the last successful parse
    pub title: Option<String>,
    /// Site link announced by the feed document
    pub site_link: Option<String>,
    /// WebSub hub announced by the feed document
    pub hub: Option<String>,
    pub validators: Validators,
    /// Consecutive transient failures since the last success
    pub error_count: u32,
    pub next_poll_at: DateTime<Utc>,
    /// Base polling interval; backoff multiplies this
    pub poll_interval: Duration,
    /// Load external media by default when rendering this feed's entries
    pub media_safe: bool,
    /// Set on permanent failure; the feed leaves the schedule until reactivated
    pub disabled: bool,
    pub last_error: Option<ErrorKind>,
    /// Inherited from the feed's category
    pub retention: RetentionPeriod,
}

// ============================================================================
// Retention
// ============================================================================

/// Period after which entries are deleted, read or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPeriod {
    OneDay,
    TwoDays,
    OneWeek,
    #[default]
    OneMonth,
    OneYear,
    Never,
}

impl RetentionPeriod {
    pub const ALL: [RetentionPeriod; 6] = [
        RetentionPeriod::OneDay,
        RetentionPeriod::TwoDays,
        RetentionPeriod::OneWeek,
        RetentionPeriod::OneMonth,
        RetentionPeriod::OneYear,
        RetentionPeriod::Never,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPeriod::OneDay => "1day",
            RetentionPeriod::TwoDays => "2days",
            RetentionPeriod::OneWeek => "1week",
            RetentionPeriod::OneMonth => "1month",
            RetentionPeriod::OneYear => "1year",
            RetentionPeriod::Never => "never",
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            RetentionPeriod::OneDay => Some(Duration::days(1)),
            RetentionPeriod::TwoDays => Some(Duration::days(2)),
            RetentionPeriod::OneWeek => Some(Duration::weeks(1)),
            RetentionPeriod::OneMonth => Some(Duration::days(30)),
            RetentionPeriod::OneYear => Some(Duration::days(365)),
            RetentionPeriod::Never => None,
        }
    }

    /// Entries published before the returned instant are expired.
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| now - d)
    }
}

impl FromStr for RetentionPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1day" => Ok(RetentionPeriod::OneDay),
            "2days" => Ok(RetentionPeriod::TwoDays),
            "1week" => Ok(RetentionPeriod::OneWeek),
            "1month" => Ok(RetentionPeriod::OneMonth),
            "1year" => Ok(RetentionPeriod::OneYear),
            "never" => Ok(RetentionPeriod::Never),
            other => Err(format!("unknown retention period: {other}")),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// The value used to decide whether an incoming entry is already stored.
///
/// Variants are listed in precedence order. The persisted form carries a
/// prefix so keys from different sources never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Explicit item identifier (`<guid>`, `<id>`, `rdf:about`, JSON `id`)
    Guid(String),
    /// Canonical (absolute) entry link
    Link(String),
    /// SHA-256 over title, raw content and explicit publication date
    Fingerprint(String),
}

impl IdentityKey {
    /// Persisted representation, e.g. `guid:tag:example.com,2024:1`.
    pub fn storage_key(&self) -> String {
        match self {
            IdentityKey::Guid(v) => format!("guid:{v}"),
            IdentityKey::Link(v) => format!("link:{v}"),
            IdentityKey::Fingerprint(v) => format!("sha256:{v}"),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, IdentityKey::Guid(_))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

// ============================================================================
// Entries
// ============================================================================

/// The two safe renderings of an entry body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedContent {
    /// Active content removed, external media intact
    pub content: String,
    /// Active content removed, external media replaced by inert placeholders
    pub no_media: String,
}

/// One normalized entry, produced by the parser and consumed by the
/// deduplicator and storage.
#[derive(Debug, Clone)]
pub struct CanonicalEntry {
    /// Primary key, chosen by precedence
    pub identity: IdentityKey,
    /// Lower-precedence keys registered alongside the primary one
    pub aliases: Vec<IdentityKey>,
    /// Plain text; may be empty
    pub title: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
    /// False when `published` was defaulted to the fetch time
    pub has_explicit_date: bool,
    pub raw_content: String,
    pub sanitized: SanitizedContent,
}

impl CanonicalEntry {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNTITLED
        } else {
            &self.title
        }
    }

    /// Every key that resolves to this entry, primary first.
    pub fn all_keys(&self) -> impl Iterator<Item = &IdentityKey> {
        std::iter::once(&self.identity).chain(self.aliases.iter())
    }
}

/// A stored entry with the owner's state attached.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: i64,
    pub feed_id: i64,
    pub identity_key: String,
    pub title: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
    pub raw_content: String,
    pub sanitized_content: String,
    pub sanitized_no_media_content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Per-(user, entry) flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserEntryState {
    pub read: bool,
    pub starred: bool,
    pub read_later: bool,
}

// ============================================================================
// Poll results
// ============================================================================

/// Why a fetch or poll failed. The string form is persisted as a feed's last
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Dns,
    Tls,
    Connect,
    HttpStatus(u16),
    TooLarge,
    RedirectLoop,
    InvalidUrl,
    Malformed,
    Storage,
}

impl ErrorKind {
    /// 404, 410 and rejected URLs stop polling; everything else is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::HttpStatus(404) | ErrorKind::HttpStatus(410) | ErrorKind::InvalidUrl
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Dns => f.write_str("dns"),
            ErrorKind::Tls => f.write_str("tls"),
            ErrorKind::Connect => f.write_str("connect"),
            ErrorKind::HttpStatus(410) => f.write_str("gone"),
            ErrorKind::HttpStatus(code) => write!(f, "{code}"),
            ErrorKind::TooLarge => f.write_str("too-large"),
            ErrorKind::RedirectLoop => f.write_str("redirect-loop"),
            ErrorKind::InvalidUrl => f.write_str("invalid-url"),
            ErrorKind::Malformed => f.write_str("malformed"),
            ErrorKind::Storage => f.write_str("storage"),
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ErrorKind::Timeout),
            "dns" => Ok(ErrorKind::Dns),
            "tls" => Ok(ErrorKind::Tls),
            "connect" => Ok(ErrorKind::Connect),
            "gone" => Ok(ErrorKind::HttpStatus(410)),
            "too-large" => Ok(ErrorKind::TooLarge),
            "redirect-loop" => Ok(ErrorKind::RedirectLoop),
            "invalid-url" => Ok(ErrorKind::InvalidUrl),
            "malformed" => Ok(ErrorKind::Malformed),
            "storage" => Ok(ErrorKind::Storage),
            other => other
                .parse::<u16>()
                .map(ErrorKind::HttpStatus)
                .map_err(|_| format!("unknown error kind: {other}")),
        }
    }
}

/// Result of one poll, consumed by the scheduler for bookkeeping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    NewEntries(usize),
    Error(ErrorKind),
}

/// Telemetry event emitted after every poll.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub feed_id: i64,
    pub url: String,
    pub outcome: PollOutcome,
    pub error_count: u32,
    pub next_poll_at: DateTime<Utc>,
    /// Consecutive transient failures reached the configured threshold
    pub unhealthy: bool,
    pub disabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_string() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Dns,
            ErrorKind::Tls,
            ErrorKind::Connect,
            ErrorKind::HttpStatus(503),
            ErrorKind::HttpStatus(410),
            ErrorKind::TooLarge,
            ErrorKind::RedirectLoop,
            ErrorKind::InvalidUrl,
            ErrorKind::Malformed,
            ErrorKind::Storage,
        ] {
            assert_eq!(kind.to_string().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_permanent_kinds() {
        assert!(ErrorKind::HttpStatus(404).is_permanent());
        assert!(ErrorKind::HttpStatus(410).is_permanent());
        assert!(!ErrorKind::HttpStatus(403).is_permanent());
        assert!(!ErrorKind::HttpStatus(500).is_permanent());
        assert!(!ErrorKind::Timeout.is_permanent());
        assert!(!ErrorKind::Malformed.is_permanent());
    }

    #[test]
    fn test_identity_key_prefixes_do_not_collide() {
        let guid = IdentityKey::Guid("https://example.com/a".into());
        let link = IdentityKey::Link("https://example.com/a".into());
        assert_ne!(guid.storage_key(), link.storage_key());
        assert!(guid.is_explicit());
        assert!(!link.is_explicit());
    }

    #[test]
    fn test_validators_merge_keeps_unsent_values() {
        let cached = Validators {
            etag: Some("\"v1\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
        };
        let fresh = Validators {
            etag: Some("\"v2\"".into()),
            last_modified: None,
        };
        let merged = cached.merged_with(&fresh);
        assert_eq!(merged.etag.as_deref(), Some("\"v2\""));
        assert_eq!(
            merged.last_modified.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
    }

    #[test]
    fn test_retention_threshold() {
        let now = Utc::now();
        assert_eq!(RetentionPeriod::Never.threshold(now), None);
        assert_eq!(
            RetentionPeriod::OneWeek.threshold(now),
            Some(now - Duration::days(7))
        );
        assert_eq!("2days".parse::<RetentionPeriod>(), Ok(RetentionPeriod::TwoDays));
        assert!("forever".parse::<RetentionPeriod>().is_err());
    }
}
