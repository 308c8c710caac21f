//! Poll scheduling: due-feed selection, bounded concurrency, per-feed
//! exclusivity and the bookkeeping that follows every poll.
//!
//! One poll runs fetch → parse → deduplicate under a single timeout, then
//! commits the result (entries, validators, schedule, health) in one
//! storage transaction. Every attempt, failed or not, moves the feed's next
//! poll time forward.

mod backoff;
mod inflight;

pub use backoff::next_interval;
pub use inflight::{FeedLease, InFlight};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::SchedulerConfig;
use crate::feed::{dedupe, parse_document, FetchOutcome, Fetcher};
use crate::model::{CanonicalEntry, ErrorKind, Feed, PollEvent, PollOutcome, Validators};
use crate::sanitize::Sanitizer;
use crate::storage::{FeedStore, PollCommit};

/// What fetch → parse → dedupe produced, before bookkeeping.
#[derive(Debug)]
enum Attempt {
    NotModified {
        validators: Validators,
        new_url: Option<String>,
    },
    Parsed {
        validators: Validators,
        new_url: Option<String>,
        title: Option<String>,
        site_link: Option<String>,
        hub: Option<String>,
        new_entries: Vec<CanonicalEntry>,
    },
    Failed {
        kind: ErrorKind,
        permanent: bool,
    },
}

/// Drives polling for every feed in a [`FeedStore`].
pub struct Scheduler<S> {
    store: S,
    fetcher: Fetcher,
    sanitizer: Sanitizer,
    config: SchedulerConfig,
    in_flight: InFlight,
    events: Option<mpsc::Sender<PollEvent>>,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(store: S, fetcher: Fetcher, sanitizer: Sanitizer, config: SchedulerConfig) -> Self {
        Self {
            store,
            fetcher,
            sanitizer,
            config,
            in_flight: InFlight::default(),
            events: None,
        }
    }

    /// Emit a [`PollEvent`] on `tx` after every poll.
    pub fn with_events(mut self, tx: mpsc::Sender<PollEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Feeds currently being polled.
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Runs scheduling cycles every tick until `shutdown` resolves.
    ///
    /// A cycle in progress when shutdown is requested runs to completion.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            concurrency = self.config.concurrency,
            tick_seconds = self.config.tick_seconds,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let events = self.run_cycle().await;
                    tracing::debug!(polled = events.len(), "Scheduling cycle complete");
                }
            }
        }
    }

    /// Polls every due feed once, at most `concurrency` at a time.
    pub async fn run_cycle(&self) -> Vec<PollEvent> {
        self.run_cycle_at(Utc::now()).await
    }

    /// [`run_cycle`](Self::run_cycle) with an explicit clock.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Vec<PollEvent> {
        let feeds = match self.store.load_due_feeds(now, self.config.batch_size).await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load due feeds");
                return Vec::new();
            }
        };
        if feeds.is_empty() {
            return Vec::new();
        }

        tracing::debug!(due = feeds.len(), "Polling due feeds");
        stream::iter(feeds)
            .map(|feed| async move { self.poll(feed.id, now, true).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|event| async move { event })
            .collect()
            .await
    }

    /// Polls one feed now, due or not.
    ///
    /// The feed is reloaded once its lease is held, so `feed` only has to
    /// identify it. Returns `None` without doing anything if the feed is
    /// already being polled or no longer exists.
    pub async fn poll_feed(&self, feed: &Feed) -> Option<PollEvent> {
        self.poll_feed_at(feed, Utc::now()).await
    }

    /// [`poll_feed`](Self::poll_feed) with an explicit clock.
    pub async fn poll_feed_at(&self, feed: &Feed, now: DateTime<Utc>) -> Option<PollEvent> {
        self.poll(feed.id, now, false).await
    }

    /// With `only_if_due`, a feed that another poll has rescheduled (or that
    /// was disabled) since it was selected is left alone.
    async fn poll(
        &self,
        feed_id: i64,
        now: DateTime<Utc>,
        only_if_due: bool,
    ) -> Option<PollEvent> {
        let Some(_lease) = self.in_flight.try_acquire(feed_id) else {
            tracing::debug!(feed_id, "Poll already in flight, skipping");
            return None;
        };

        // Schedule and error count must come from after any poll that
        // committed since the caller's snapshot was taken.
        let feed = match self.store.load_feed(feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                tracing::debug!(feed_id, "Feed no longer exists, skipping");
                return None;
            }
            Err(e) => {
                tracing::warn!(feed_id, error = %e, "Failed to reload feed");
                return None;
            }
        };
        if only_if_due && (feed.disabled || feed.next_poll_at > now) {
            tracing::debug!(
                feed_id,
                next_poll_at = %feed.next_poll_at,
                "Feed no longer due, skipping"
            );
            return None;
        }
        let feed = &feed;

        let span = tracing::info_span!("poll", feed_id = feed.id, url = %feed.url);
        let event = async {
            let attempt = tokio::time::timeout(self.config.poll_timeout(), self.attempt(feed, now))
                .await
                .unwrap_or(Attempt::Failed {
                    kind: ErrorKind::Timeout,
                    permanent: false,
                });
            self.record(feed, attempt, now).await
        }
        .instrument(span)
        .await;

        if let Some(tx) = &self.events {
            if tx.send(event.clone()).await.is_err() {
                tracing::debug!("Poll event receiver dropped");
            }
        }
        Some(event)
    }

    async fn attempt(&self, feed: &Feed, now: DateTime<Utc>) -> Attempt {
        let document = match self.fetcher.fetch(&feed.url, &feed.validators).await {
            FetchOutcome::Fetched(document) => document,
            FetchOutcome::NotModified {
                validators,
                new_url,
            } => {
                return Attempt::NotModified {
                    validators,
                    new_url,
                }
            }
            FetchOutcome::PermanentFailure(kind) => {
                return Attempt::Failed {
                    kind,
                    permanent: true,
                }
            }
            FetchOutcome::TransientFailure(kind) => {
                return Attempt::Failed {
                    kind,
                    permanent: false,
                }
            }
        };

        let parsed = match parse_document(
            &document.bytes,
            document.content_type.as_deref(),
            Some(&document.final_url),
            now,
            &self.sanitizer,
        ) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Feed document could not be parsed");
                return Attempt::Failed {
                    kind: ErrorKind::Malformed,
                    permanent: false,
                };
            }
        };

        let mut entries = parsed.entries;
        let result = match dedupe(&self.store, feed, entries.by_ref(), now).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load known entries");
                return Attempt::Failed {
                    kind: ErrorKind::Storage,
                    permanent: false,
                };
            }
        };

        if entries.skipped() > 0 {
            tracing::warn!(skipped = entries.skipped(), "Unusable entries skipped");
        }
        tracing::debug!(
            dialect = %parsed.dialect,
            new = result.new_entries.len(),
            known = result.known,
            duplicates = result.duplicates,
            expired = result.expired,
            "Feed parsed"
        );

        Attempt::Parsed {
            validators: document.validators,
            new_url: document.new_url,
            title: parsed.title,
            site_link: parsed.site_link,
            hub: parsed.hub,
            new_entries: result.new_entries,
        }
    }

    /// Turns an attempt into schedule and health updates, commits them and
    /// builds the event.
    async fn record(&self, feed: &Feed, attempt: Attempt, now: DateTime<Utc>) -> PollEvent {
        let base = feed.poll_interval;
        let max = self.config.max_interval();

        let mut commit = PollCommit {
            outcome: PollOutcome::Unchanged,
            polled_at: now,
            validators: None,
            new_entries: Vec::new(),
            error_count: 0,
            next_poll_at: now,
            disabled: false,
            new_url: None,
            title: None,
            site_link: None,
            hub: None,
        };

        let interval = match attempt {
            Attempt::NotModified {
                validators,
                new_url,
            } => {
                commit.validators = Some(feed.validators.merged_with(&validators));
                commit.new_url = new_url;
                base
            }
            Attempt::Parsed {
                validators,
                new_url,
                title,
                site_link,
                hub,
                new_entries,
            } => {
                commit.outcome = PollOutcome::NewEntries(new_entries.len());
                commit.validators = Some(feed.validators.merged_with(&validators));
                commit.new_url = new_url;
                commit.title = title;
                commit.site_link = site_link;
                commit.hub = hub;
                commit.new_entries = new_entries;
                base
            }
            Attempt::Failed { kind, permanent } => {
                commit.outcome = PollOutcome::Error(kind);
                commit.error_count = feed.error_count.saturating_add(1);
                commit.disabled = permanent;
                if permanent {
                    tracing::warn!(error = %kind, "Feed disabled after permanent failure");
                    base
                } else {
                    tracing::info!(
                        error = %kind,
                        error_count = commit.error_count,
                        "Feed poll failed"
                    );
                    next_interval(base, max, commit.error_count)
                }
            }
        };

        // Never moves backwards, even for an early manual poll.
        commit.next_poll_at = (now + interval).max(feed.next_poll_at);

        let outcome = match self.store.commit_poll_result(feed.id, &commit).await {
            Ok(inserted) => match commit.outcome {
                PollOutcome::NewEntries(_) => {
                    if inserted > 0 {
                        tracing::info!(new_entries = inserted, "Stored new entries");
                    }
                    PollOutcome::NewEntries(inserted)
                }
                other => other,
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to commit poll result");
                PollOutcome::Error(ErrorKind::Storage)
            }
        };

        let unhealthy = !commit.disabled && commit.error_count >= self.config.unhealthy_threshold;
        if unhealthy && feed.error_count < self.config.unhealthy_threshold {
            tracing::warn!(
                error_count = commit.error_count,
                threshold = self.config.unhealthy_threshold,
                "Feed is unhealthy"
            );
        }

        PollEvent {
            feed_id: feed.id,
            url: commit.new_url.unwrap_or_else(|| feed.url.clone()),
            outcome,
            error_count: commit.error_count,
            next_poll_at: commit.next_poll_at,
            unhealthy,
            disabled: commit.disabled,
        }
    }
}
