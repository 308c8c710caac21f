//! Storage lifecycle tests: commit results, per-user state, retention purge
//! and cascading deletes, all against in-memory SQLite.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use feedhq::model::{
    CanonicalEntry, IdentityKey, PollOutcome, RetentionPeriod, SanitizedContent, UserEntryState,
    Validators,
};
use feedhq::storage::{Database, DatabaseError, NewFeed, PollCommit};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn entry(guid: &str, published: DateTime<Utc>) -> CanonicalEntry {
    CanonicalEntry {
        identity: IdentityKey::Guid(guid.to_string()),
        aliases: vec![IdentityKey::Link(format!("https://example.org/{guid}"))],
        title: format!("Entry {guid}"),
        link: Some(format!("https://example.org/{guid}")),
        published,
        has_explicit_date: true,
        raw_content: "<p>body</p>".into(),
        sanitized: SanitizedContent {
            content: "<p>body</p>".into(),
            no_media: "<p>body</p>".into(),
        },
    }
}

fn commit(entries: Vec<CanonicalEntry>) -> PollCommit {
    PollCommit {
        outcome: PollOutcome::NewEntries(entries.len()),
        polled_at: now(),
        validators: None,
        new_entries: entries,
        error_count: 0,
        next_poll_at: now() + Duration::minutes(30),
        disabled: false,
        new_url: None,
        title: None,
        site_link: None,
        hub: None,
    }
}

async fn setup() -> (Database, i64, i64) {
    let db = Database::open(":memory:").await.unwrap();
    let user_id = db.create_user("alice").await.unwrap();
    let feed_id = add_feed(&db, user_id, "https://example.org/feed.xml", None).await;
    (db, user_id, feed_id)
}

async fn add_feed(db: &Database, user_id: i64, url: &str, category_id: Option<i64>) -> i64 {
    db.insert_feed(
        &NewFeed {
            user_id,
            name: String::new(),
            url: url.into(),
            category_id,
            poll_interval: Duration::minutes(30),
            media_safe: false,
        },
        false,
    )
    .await
    .unwrap()
}

async fn entry_ids(db: &Database, feed_id: i64) -> Vec<i64> {
    let mut ids: Vec<_> = db
        .entries_for_feed(feed_id, 100)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    ids.sort();
    ids
}

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn test_commit_registers_aliases_and_ignores_known_primary() {
    let (db, user_id, feed_id) = setup().await;

    let inserted = db
        .commit_poll_result(feed_id, &commit(vec![entry("a", now()), entry("b", now())]))
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let mut keys: Vec<_> = db
        .load_known_identity_keys(feed_id)
        .await
        .unwrap()
        .into_iter()
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "guid:a",
            "guid:b",
            "link:https://example.org/a",
            "link:https://example.org/b",
        ]
    );

    // A racing commit of an already stored entry inserts nothing.
    let again = db
        .commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
        .await
        .unwrap();
    assert_eq!(again, 0);
    assert_eq!(db.unread_count(user_id, feed_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_commit_updates_schedule_and_validators() {
    let (db, _, feed_id) = setup().await;

    let mut failed = commit(Vec::new());
    failed.outcome = PollOutcome::Error(feedhq::model::ErrorKind::Timeout);
    failed.error_count = 2;
    failed.next_poll_at = now() + Duration::hours(2);
    db.commit_poll_result(feed_id, &failed).await.unwrap();

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.error_count, 2);
    assert_eq!(feed.next_poll_at, now() + Duration::hours(2));
    assert_eq!(feed.last_error, Some(feedhq::model::ErrorKind::Timeout));
    assert_eq!(feed.validators, Validators::default());

    let mut ok = commit(Vec::new());
    ok.outcome = PollOutcome::Unchanged;
    ok.validators = Some(Validators {
        etag: Some("\"abc\"".into()),
        last_modified: Some("Sat, 01 Jun 2024 10:00:00 GMT".into()),
    });
    ok.title = Some("Example".into());
    db.commit_poll_result(feed_id, &ok).await.unwrap();

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.error_count, 0);
    assert_eq!(feed.last_error, None);
    assert_eq!(feed.validators.etag.as_deref(), Some("\"abc\""));
    assert_eq!(feed.title.as_deref(), Some("Example"));

    // Validators are kept when the commit carries none.
    db.commit_poll_result(feed_id, &commit(Vec::new()))
        .await
        .unwrap();
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.validators.etag.as_deref(), Some("\"abc\""));
    assert_eq!(feed.title.as_deref(), Some("Example"));
}

#[tokio::test]
async fn test_commit_keeps_feed_metadata_until_replaced() {
    let (db, _user_id, feed_id) = setup().await;

    let mut first = commit(Vec::new());
    first.title = Some("Example".into());
    first.site_link = Some("https://example.org/".into());
    first.hub = Some("https://hub.example.net/".into());
    db.commit_poll_result(feed_id, &first).await.unwrap();

    // A document without metadata leaves the stored values alone.
    db.commit_poll_result(feed_id, &commit(Vec::new())).await.unwrap();
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.title.as_deref(), Some("Example"));
    assert_eq!(feed.site_link.as_deref(), Some("https://example.org/"));
    assert_eq!(feed.hub.as_deref(), Some("https://hub.example.net/"));

    let mut moved = commit(Vec::new());
    moved.hub = Some("https://push.example.com/".into());
    db.commit_poll_result(feed_id, &moved).await.unwrap();
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.hub.as_deref(), Some("https://push.example.com/"));
}

#[tokio::test]
async fn test_commit_for_missing_feed_fails() {
    let (db, _, _) = setup().await;
    let err = db
        .commit_poll_result(9999, &commit(vec![entry("a", now())]))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

#[tokio::test]
async fn test_redirect_to_existing_subscription_keeps_old_url() {
    let (db, user_id, feed_id) = setup().await;
    add_feed(&db, user_id, "https://example.org/new.xml", None).await;

    let mut moved = commit(Vec::new());
    moved.new_url = Some("https://example.org/new.xml".into());
    db.commit_poll_result(feed_id, &moved).await.unwrap();

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.url, "https://example.org/feed.xml");
}

// ============================================================================
// Per-user state
// ============================================================================

#[tokio::test]
async fn test_flags_and_unread_counts() {
    let (db, user_id, feed_id) = setup().await;
    db.commit_poll_result(
        feed_id,
        &commit(vec![entry("a", now()), entry("b", now()), entry("c", now())]),
    )
    .await
    .unwrap();
    let ids = entry_ids(&db, feed_id).await;

    db.mark_entry_read(user_id, ids[0]).await.unwrap();
    db.set_entry_starred(user_id, ids[1], true).await.unwrap();
    db.set_entry_read_later(user_id, ids[1], true).await.unwrap();

    assert_eq!(
        db.entry_state(user_id, ids[0]).await.unwrap(),
        UserEntryState {
            read: true,
            ..Default::default()
        }
    );
    assert_eq!(
        db.entry_state(user_id, ids[1]).await.unwrap(),
        UserEntryState {
            read: false,
            starred: true,
            read_later: true,
        }
    );
    assert_eq!(db.unread_count(user_id, feed_id).await.unwrap(), 2);

    // Feed-wide read only touches entries still unread.
    assert_eq!(db.mark_feed_read(user_id, feed_id).await.unwrap(), 2);
    assert_eq!(db.unread_count(user_id, feed_id).await.unwrap(), 0);
    assert!(db.entry_state(user_id, ids[1]).await.unwrap().starred);

    db.mark_entry_unread(user_id, ids[2]).await.unwrap();
    assert_eq!(db.unread_count(user_id, feed_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_state_is_per_user() {
    let (db, alice, feed_id) = setup().await;
    let bob = db.create_user("bob").await.unwrap();
    db.commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
        .await
        .unwrap();
    let ids = entry_ids(&db, feed_id).await;

    db.mark_entry_read(alice, ids[0]).await.unwrap();
    assert!(db.entry_state(alice, ids[0]).await.unwrap().read);
    assert_eq!(
        db.entry_state(bob, ids[0]).await.unwrap(),
        UserEntryState::default()
    );
    assert_eq!(db.unread_count(bob, feed_id).await.unwrap(), 1);
}

// ============================================================================
// Retention and deletion
// ============================================================================

#[tokio::test]
async fn test_purge_honors_category_retention_and_stars() {
    let (db, user_id, feed_id) = setup().await;
    let archive = db
        .create_category(user_id, "Archive", RetentionPeriod::Never)
        .await
        .unwrap();
    let archived_feed = add_feed(&db, user_id, "https://example.org/archive.xml", Some(archive)).await;

    db.commit_poll_result(
        feed_id,
        &commit(vec![
            entry("old", now() - Duration::days(40)),
            entry("old-starred", now() - Duration::days(40)),
            entry("fresh", now() - Duration::days(1)),
        ]),
    )
    .await
    .unwrap();
    db.commit_poll_result(
        archived_feed,
        &commit(vec![entry("ancient", now() - Duration::days(4000))]),
    )
    .await
    .unwrap();

    let starred = db
        .entries_for_feed(feed_id, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.identity_key == "guid:old-starred")
        .unwrap();
    db.set_entry_starred(user_id, starred.id, true).await.unwrap();

    assert_eq!(db.purge_expired_entries(now()).await.unwrap(), 1);

    let mut remaining: Vec<_> = db
        .entries_for_feed(feed_id, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.identity_key)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec!["guid:fresh", "guid:old-starred"]);
    assert_eq!(db.entries_for_feed(archived_feed, 10).await.unwrap().len(), 1);

    // The purged entry's keys stay behind.
    let keys = db.load_known_identity_keys(feed_id).await.unwrap();
    assert!(keys.contains("guid:old"));
    assert!(keys.contains("link:https://example.org/old"));

    // A later poll listing the purged entry again stores nothing.
    assert_eq!(
        db.commit_poll_result(feed_id, &commit(vec![entry("old", now())]))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_shorter_category_retention_applies_after_move() {
    let (db, user_id, feed_id) = setup().await;
    db.commit_poll_result(feed_id, &commit(vec![entry("a", now() - Duration::days(3))]))
        .await
        .unwrap();
    assert_eq!(db.purge_expired_entries(now()).await.unwrap(), 0);

    let daily = db
        .create_category(user_id, "Daily", RetentionPeriod::OneDay)
        .await
        .unwrap();
    db.set_feed_category(feed_id, Some(daily)).await.unwrap();
    assert_eq!(
        db.get_feed(feed_id).await.unwrap().unwrap().retention,
        RetentionPeriod::OneDay
    );
    assert_eq!(db.purge_expired_entries(now()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_deleting_category_keeps_feeds() {
    let (db, user_id, _) = setup().await;
    let tech = db
        .create_category(user_id, "Tech", RetentionPeriod::OneWeek)
        .await
        .unwrap();
    let feed_id = add_feed(&db, user_id, "https://example.org/tech.xml", Some(tech)).await;

    db.delete_category(tech).await.unwrap();
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.category_id, None);
    assert_eq!(feed.retention, RetentionPeriod::OneMonth);
}

#[tokio::test]
async fn test_deleting_feed_cascades_to_entries_and_state() {
    let (db, user_id, feed_id) = setup().await;
    db.commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
        .await
        .unwrap();
    let ids = entry_ids(&db, feed_id).await;
    db.mark_entry_read(user_id, ids[0]).await.unwrap();

    assert!(db.delete_feed(feed_id).await.unwrap());
    assert!(db.get_feed(feed_id).await.unwrap().is_none());
    assert!(db.load_known_identity_keys(feed_id).await.unwrap().is_empty());
    assert_eq!(
        db.entry_state(user_id, ids[0]).await.unwrap(),
        UserEntryState::default()
    );
    assert!(!db.delete_feed(feed_id).await.unwrap());
}

#[tokio::test]
async fn test_deleting_user_removes_subscriptions() {
    let (db, user_id, feed_id) = setup().await;
    db.commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
        .await
        .unwrap();

    assert!(db.delete_user(user_id).await.unwrap());
    assert!(db.list_feeds(user_id).await.unwrap().is_empty());
    assert!(db.entries_for_feed(feed_id, 10).await.unwrap().is_empty());
    assert!(db
        .load_due_feeds(Utc::now() + Duration::days(1), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_deleted_entry_can_be_stored_again() {
    let (db, _, feed_id) = setup().await;
    db.commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
        .await
        .unwrap();
    let ids = entry_ids(&db, feed_id).await;

    assert!(db.delete_entry(ids[0]).await.unwrap());
    assert!(db.load_known_identity_keys(feed_id).await.unwrap().is_empty());
    assert_eq!(
        db.commit_poll_result(feed_id, &commit(vec![entry("a", now())]))
            .await
            .unwrap(),
        1
    );
}
