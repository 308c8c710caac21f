use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keyed mutual exclusion: at most one poll per feed at a time.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    feeds: Arc<Mutex<HashSet<i64>>>,
}

/// Held while a feed is being polled; releases the feed on drop.
#[derive(Debug)]
pub struct FeedLease {
    feeds: Arc<Mutex<HashSet<i64>>>,
    feed_id: i64,
}

impl InFlight {
    /// Claims `feed_id`, or returns `None` if it is already claimed.
    pub fn try_acquire(&self, feed_id: i64) -> Option<FeedLease> {
        if !lock(&self.feeds).insert(feed_id) {
            return None;
        }
        Some(FeedLease {
            feeds: Arc::clone(&self.feeds),
            feed_id,
        })
    }

    pub fn contains(&self, feed_id: i64) -> bool {
        lock(&self.feeds).contains(&feed_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.feeds).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FeedLease {
    fn drop(&mut self) {
        lock(&self.feeds).remove(&self.feed_id);
    }
}

// The set stays consistent even if a holder panicked mid-insert.
fn lock(feeds: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
