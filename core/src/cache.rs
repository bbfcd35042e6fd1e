use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

const FINGERPRINT_HEX_LEN: usize = 16;
const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Cloning shares the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Normalized content fingerprint: whitespace collapsed, lowercased,
/// SHA-256, first 16 hex chars.
pub fn content_fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

/// Cache key convention: `{agent}:{userId}:{contextDiscriminator}:{contentHash}`.
pub fn cache_key(agent: &str, user_id: &str, discriminator: &str, content: &str) -> String {
    format!(
        "{agent}:{user_id}:{discriminator}:{}",
        content_fingerprint(content)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process TTL map. Expiry is lazy: stale entries read as absent and are
/// only dropped by `purge_expired`.
pub struct TtlCache<C: Clock = SystemClock> {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: C,
}

impl TtlCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TtlCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TtlCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: &str, ttl_seconds: u64) {
        let ttl = Duration::seconds(
            i64::try_from(ttl_seconds)
                .unwrap_or(MAX_TTL_SECONDS)
                .min(MAX_TTL_SECONDS),
        );
        let expires_at = self.clock.now() + ttl;
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap())
    }

    #[test]
    fn set_then_get_returns_value_until_ttl_elapses() {
        let clock = clock();
        let cache = TtlCache::with_clock(clock.clone());

        cache.set("mio:u1:chat:abc", "hello", 60);
        assert_eq!(cache.get("mio:u1:chat:abc").as_deref(), Some("hello"));

        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get("mio:u1:chat:abc").as_deref(), Some("hello"));

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get("mio:u1:chat:abc"), None);
    }

    #[test]
    fn set_overwrites_value_and_expiry() {
        let clock = clock();
        let cache = TtlCache::with_clock(clock.clone());

        cache.set("k", "first", 10);
        clock.advance(Duration::seconds(5));
        cache.set("k", "second", 10);
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get("k").as_deref(), Some("second"));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let clock = clock();
        let cache = TtlCache::with_clock(clock.clone());

        cache.set("short", "a", 5);
        cache.set("long", "b", 500);
        clock.advance(Duration::seconds(10));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long").as_deref(), Some("b"));
    }

    #[test]
    fn missing_key_is_absent() {
        let cache = TtlCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn cache_key_follows_convention_and_normalizes_content() {
        let a = cache_key("mio", "u1", "chat", "How do I  stop   procrastinating?");
        let b = cache_key("mio", "u1", "chat", "how do i stop procrastinating?");
        assert_eq!(a, b);

        let parts: Vec<&str> = a.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(&parts[..3], &["mio", "u1", "chat"]);
        assert_eq!(parts[3].len(), FINGERPRINT_HEX_LEN);

        assert_ne!(a, cache_key("nette", "u1", "chat", "how do i stop procrastinating?"));
    }
}
