//! Response and intent caches keyed by a content fingerprint, plus the
//! request counters reported on the metrics endpoint.
//!
//! Both caches are best-effort: a miss only means the caller recomputes.
//! Concurrent writes to the same fingerprint are last-write-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::domain::ticket::{Intent, TicketStatus};

const FINGERPRINT_HEX_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fixed-length key: namespace plus a truncated blake3 digest of `content`.
    pub fn of(namespace: &str, content: &str) -> Self {
        let digest = blake3::hash(content.as_bytes()).to_hex();
        Self(format!("{namespace}-{}", &digest.as_str()[..FINGERPRINT_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub struct TtlCache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<Fingerprint, Entry<V>>>,
}

impl<V> TtlCache<V>
where
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { ttl, clock, entries: RwLock::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = match self.entries.read() {
                Ok(entries) => entries,
                Err(poisoned) => poisoned.into_inner(),
            };
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: Fingerprint, value: V) {
        let expires_at = self.clock.now().checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key, Entry { value, expires_at });
    }

    /// Entries not yet expired.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReply {
    pub reply: String,
    pub status: TicketStatus,
    pub intent: Intent,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub intent_hits: u64,
    pub intent_misses: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_ms: f64,
    pub response_entries: usize,
    pub intent_entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: u64,
    cache_misses: u64,
    intent_hits: u64,
    intent_misses: u64,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    average_response_ms: f64,
}

pub struct SupportCache {
    responses: TtlCache<CachedReply>,
    intents: TtlCache<Intent>,
    counters: Mutex<Counters>,
}

impl SupportCache {
    pub fn new(response_ttl: Duration, intent_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            responses: TtlCache::new(response_ttl, clock.clone()),
            intents: TtlCache::new(intent_ttl, clock),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.response_ttl(), config.intent_ttl(), clock)
    }

    pub fn get_response(&self, content: &str) -> Option<CachedReply> {
        let hit = self.responses.get(&Fingerprint::of("response", content));
        self.with_counters(|counters| match hit {
            Some(_) => counters.cache_hits += 1,
            None => counters.cache_misses += 1,
        });
        hit
    }

    pub fn put_response(&self, content: &str, reply: CachedReply) {
        self.responses.put(Fingerprint::of("response", content), reply);
    }

    pub fn get_intent(&self, content: &str) -> Option<Intent> {
        let hit = self.intents.get(&Fingerprint::of("intent", content));
        self.with_counters(|counters| match hit {
            Some(_) => counters.intent_hits += 1,
            None => counters.intent_misses += 1,
        });
        hit
    }

    pub fn put_intent(&self, content: &str, intent: Intent) {
        self.intents.put(Fingerprint::of("intent", content), intent);
    }

    pub fn begin_request(&self) {
        self.with_counters(|counters| counters.total_requests += 1);
    }

    /// Folds `elapsed` into the running average over successful requests.
    pub fn record_success(&self, elapsed: StdDuration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.with_counters(|counters| {
            let prior = counters.successful_requests as f64;
            counters.average_response_ms =
                (counters.average_response_ms * prior + elapsed_ms) / (prior + 1.0);
            counters.successful_requests += 1;
        });
    }

    pub fn record_failure(&self) {
        self.with_counters(|counters| counters.failed_requests += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let response_entries = self.responses.len();
        let intent_entries = self.intents.len();
        let counters = match self.counters.lock() {
            Ok(counters) => counters,
            Err(poisoned) => poisoned.into_inner(),
        };
        MetricsSnapshot {
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            intent_hits: counters.intent_hits,
            intent_misses: counters.intent_misses,
            total_requests: counters.total_requests,
            successful_requests: counters.successful_requests,
            failed_requests: counters.failed_requests,
            average_response_ms: counters.average_response_ms,
            response_entries,
            intent_entries,
        }
    }

    fn with_counters(&self, update: impl FnOnce(&mut Counters)) {
        match self.counters.lock() {
            Ok(mut counters) => update(&mut counters),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::{CachedReply, Fingerprint, SupportCache, TtlCache};
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, MAX_TTL_SECS};
    use crate::domain::ticket::{Intent, TicketStatus};

    fn reply(text: &str) -> CachedReply {
        CachedReply { reply: text.to_owned(), status: TicketStatus::Processed, intent: Intent::NotionBasics }
    }

    #[test]
    fn fingerprints_are_fixed_length_and_namespaced() {
        let short = Fingerprint::of("response", "hi");
        let long = Fingerprint::of("response", &"x".repeat(10_000));

        assert_eq!(short.as_str().len(), long.as_str().len());
        assert!(short.as_str().starts_with("response-"));
        assert_ne!(Fingerprint::of("intent", "hi"), short);
        assert_eq!(Fingerprint::of("response", "hi"), short);
    }

    #[test]
    fn response_put_then_get_hits_until_ttl_expires() {
        let clock = ManualClock::default();
        let cache = SupportCache::new(Duration::seconds(600), Duration::seconds(1800), Arc::new(clock.clone()));

        cache.put_response("How do I create a page?", reply("Click New page"));
        assert_eq!(cache.get_response("How do I create a page?"), Some(reply("Click New page")));

        clock.advance(Duration::seconds(599));
        assert!(cache.get_response("How do I create a page?").is_some());

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get_response("How do I create a page?"), None);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.response_entries, 0);
    }

    #[test]
    fn intent_cache_outlives_response_cache() {
        let clock = ManualClock::default();
        let cache = SupportCache::new(Duration::seconds(600), Duration::seconds(1800), Arc::new(clock.clone()));

        cache.put_intent("refund please", Intent::Refund);
        cache.put_response("refund please", reply("escalated"));
        clock.advance(Duration::seconds(900));

        assert_eq!(cache.get_response("refund please"), None);
        assert_eq!(cache.get_intent("refund please"), Some(Intent::Refund));
    }

    #[test]
    fn expired_entries_are_purged() {
        let clock = ManualClock::default();
        let cache: TtlCache<u32> = TtlCache::new(Duration::seconds(10), Arc::new(clock.clone()));
        cache.put(Fingerprint::of("response", "a"), 1);
        cache.put(Fingerprint::of("response", "b"), 2);
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::seconds(11));
        assert!(cache.is_empty());
        assert_eq!(cache.purge_expired(), 2);
    }

    #[test]
    fn oversized_ttls_clamp_instead_of_wrapping() {
        let clock = ManualClock::default();
        let config = CacheConfig { response_ttl_secs: u64::MAX, intent_ttl_secs: 10_000_000_000_000 };
        let cache = SupportCache::from_config(&config, Arc::new(clock.clone()));

        cache.put_response("How do I share a page?", reply("Use the Share button"));
        cache.put_intent("How do I share a page?", Intent::NotionBasics);
        clock.advance(Duration::days(364));

        assert_eq!(cache.get_response("How do I share a page?"), Some(reply("Use the Share button")));
        assert_eq!(cache.get_intent("How do I share a page?"), Some(Intent::NotionBasics));
        assert_eq!(config.response_ttl(), Duration::seconds(MAX_TTL_SECS as i64));
    }

    #[test]
    fn expiry_past_the_calendar_end_saturates() {
        let clock = ManualClock::default();
        let cache: TtlCache<u32> = TtlCache::new(Duration::days(200_000_000), Arc::new(clock.clone()));

        cache.put(Fingerprint::of("response", "forever"), 7);
        assert_eq!(cache.get(&Fingerprint::of("response", "forever")), Some(7));
    }

    #[test]
    fn running_average_uses_prior_successful_count() {
        let cache =
            SupportCache::new(Duration::seconds(600), Duration::seconds(1800), Arc::new(ManualClock::default()));

        for millis in [100, 200, 600] {
            cache.begin_request();
            cache.record_success(StdDuration::from_millis(millis));
        }
        cache.begin_request();
        cache.record_failure();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.successful_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.average_response_ms - 300.0).abs() < 1e-6);
    }
}
