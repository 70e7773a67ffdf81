use crate::datetime_utils::to_chrono;
use crate::social::{DirectMessage, MessageTime};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a rate-limited message stays eligible under the hold policy
pub const HELD_RETENTION_HOURS: i64 = 24;

/// Ids of messages already answered during this run
#[derive(Debug, Default)]
pub struct ProcessedSet {
    /// Message id to its send time, when the send time is known
    entries: HashMap<String, Option<DateTime<Utc>>>,
}

impl ProcessedSet {
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an id. Re-inserting keeps the first recorded send time.
    pub fn insert(&mut self, id: &str, sent_at: Option<DateTime<Utc>>) {
        self.entries.entry(id.to_string()).or_insert(sent_at);
    }

    /// Drop entries sent before `cutoff`. Entries without a send time stay.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, sent_at| sent_at.is_none_or(|at| at >= cutoff));
        before - self.entries.len()
    }
}

/// Decides whether an inbound message still needs an answer
#[derive(Debug)]
pub struct Deduplicator {
    processed: ProcessedSet,
    /// Ids refused by the rate limiter that bypass the staleness check, with
    /// the time they were first held
    held: HashMap<String, DateTime<Utc>>,
    staleness_window: chrono::Duration,
    held_retention: chrono::Duration,
}

impl Deduplicator {
    pub fn new(staleness_window: Duration) -> Self {
        Self {
            processed: ProcessedSet::default(),
            held: HashMap::new(),
            staleness_window: to_chrono(staleness_window),
            held_retention: chrono::Duration::hours(HELD_RETENTION_HOURS),
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// Whether the message is unanswered and recent enough to answer.
    ///
    /// Messages without a readable timestamp are treated as new.
    pub fn is_new(&self, message: &DirectMessage, now: DateTime<Utc>) -> bool {
        if self.processed.contains(&message.id) {
            info!("Message {id} already processed", id = message.id);
            return false;
        }

        if self.held.contains_key(&message.id) {
            debug!("Message {id} is held for a later answer", id = message.id);
            return true;
        }

        match &message.sent_at {
            MessageTime::At(sent_at) => {
                if self.is_stale(*sent_at, now) {
                    info!(
                        "Message {id} too old (from {sent_at})",
                        id = message.id
                    );
                    false
                } else {
                    true
                }
            }
            MessageTime::Missing => {
                info!("Message {id} has no timestamp, treating as new", id = message.id);
                true
            }
            MessageTime::Unreadable(reason) => {
                warn!(
                    "Could not read timestamp of message {id} ({reason}), treating as new",
                    id = message.id
                );
                true
            }
        }
    }

    /// Record an answered message whose send time is unknown
    pub fn mark_processed(&mut self, id: &str) {
        self.mark_processed_at(id, None);
    }

    /// Record an answered message
    pub fn mark_processed_at(&mut self, id: &str, sent_at: Option<DateTime<Utc>>) {
        self.held.remove(id);
        self.processed.insert(id, sent_at);
        debug!("Marked message {id} as processed");
    }

    /// Keep a rate-limited message eligible regardless of its age, for at
    /// most [`HELD_RETENTION_HOURS`] after it was first held
    pub fn hold(&mut self, id: &str, now: DateTime<Utc>) {
        if !self.held.contains_key(id) {
            debug!("Holding message {id} until the rate limit allows a reply");
            self.held.insert(id.to_string(), now);
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Forget processed ids that are too old to ever be considered new
    /// again, and held ids past their retention
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let pruned = self.processed.prune_before(now - self.staleness_window);
        if pruned > 0 {
            debug!("Pruned {pruned} stale processed message ids");
        }

        let retention = self.held_retention;
        let before = self.held.len();
        self.held.retain(|_, held_at| now - *held_at <= retention);
        let expired = before - self.held.len();
        if expired > 0 {
            info!("Gave up on {expired} held messages after {HELD_RETENTION_HOURS}h");
        }

        pruned + expired
    }

    fn is_stale(&self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - sent_at > self.staleness_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1705764600, 0).unwrap()
    }

    fn message(id: &str, sent_at: MessageTime) -> DirectMessage {
        DirectMessage {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            sender_id: "200".to_string(),
            text: "hello there".to_string(),
            sent_at,
        }
    }

    fn dedup() -> Deduplicator {
        Deduplicator::new(Duration::from_secs(300))
    }

    #[test]
    fn test_processed_message_is_not_new() {
        let mut dedup = dedup();
        let msg = message("m1", MessageTime::At(now()));
        assert!(dedup.is_new(&msg, now()));

        dedup.mark_processed("m1");
        assert!(!dedup.is_new(&msg, now()));
    }

    #[test]
    fn test_missing_timestamp_is_new() {
        let dedup = dedup();
        for text in ["", "membership?", "ok"] {
            let mut msg = message("m1", MessageTime::Missing);
            msg.text = text.to_string();
            assert!(dedup.is_new(&msg, now()));
        }
    }

    #[test]
    fn test_unreadable_timestamp_fails_open() {
        let dedup = dedup();
        let msg = message("m1", MessageTime::Unreadable("garbage".to_string()));
        assert!(dedup.is_new(&msg, now()));
    }

    #[test]
    fn test_staleness_boundary() {
        let dedup = dedup();

        let just_inside = message(
            "m1",
            MessageTime::At(now() - chrono::Duration::seconds(299)),
        );
        assert!(dedup.is_new(&just_inside, now()));

        let exactly_five = message("m2", MessageTime::At(now() - chrono::Duration::minutes(5)));
        assert!(dedup.is_new(&exactly_five, now()));

        let too_old = message("m3", MessageTime::At(now() - chrono::Duration::seconds(301)));
        assert!(!dedup.is_new(&too_old, now()));
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let mut dedup = dedup();
        dedup.mark_processed("m1");
        dedup.mark_processed("m1");
        assert_eq!(dedup.processed().len(), 1);

        dedup.mark_processed("m2");
        assert_eq!(dedup.processed().len(), 2);
    }

    #[test]
    fn test_prune_keeps_unknown_and_recent_entries() {
        let mut dedup = dedup();
        dedup.mark_processed("unknown");
        dedup.mark_processed_at("recent", Some(now() - chrono::Duration::minutes(1)));
        dedup.mark_processed_at("old", Some(now() - chrono::Duration::minutes(10)));

        assert_eq!(dedup.prune(now()), 1);
        assert!(dedup.is_processed("unknown"));
        assert!(dedup.is_processed("recent"));
        assert!(!dedup.is_processed("old"));

        // A pruned message is still rejected by the staleness check
        let old = message("old", MessageTime::At(now() - chrono::Duration::minutes(10)));
        assert!(!dedup.is_new(&old, now()));
    }

    #[test]
    fn test_held_message_bypasses_staleness_until_processed() {
        let mut dedup = dedup();
        let old = message("m1", MessageTime::At(now() - chrono::Duration::hours(2)));
        assert!(!dedup.is_new(&old, now()));

        dedup.hold("m1", now());
        assert!(dedup.is_new(&old, now()));
        assert_eq!(dedup.held_count(), 1);

        dedup.mark_processed_at("m1", old.sent_at.at());
        assert_eq!(dedup.held_count(), 0);
        assert!(!dedup.is_new(&old, now()));
    }

    #[test]
    fn test_held_ids_expire_after_retention() {
        let mut dedup = dedup();
        let old = message("m1", MessageTime::At(now() - chrono::Duration::hours(2)));
        dedup.hold("m1", now());

        dedup.prune(now() + chrono::Duration::hours(HELD_RETENTION_HOURS));
        assert_eq!(dedup.held_count(), 1);

        let later = now() + chrono::Duration::hours(HELD_RETENTION_HOURS + 1);
        assert_eq!(dedup.prune(later), 1);
        assert_eq!(dedup.held_count(), 0);
        assert!(!dedup.is_new(&old, later));
    }

    #[test]
    fn test_hold_keeps_first_time() {
        let mut dedup = dedup();
        dedup.hold("m1", now());
        dedup.hold("m1", now() + chrono::Duration::hours(20));

        dedup.prune(now() + chrono::Duration::hours(HELD_RETENTION_HOURS + 1));
        assert_eq!(dedup.held_count(), 0);
    }
}
