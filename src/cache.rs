use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hickory_proto::rr::RecordType;
use sha2::{Digest, Sha512};
use tracing::instrument;

/// Entries older than this are treated as a miss and opportunistically reaped.
const ANSWER_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub(crate) struct Cache<K: Hash + Eq, V> {
    entries: Mutex<HashMap<K, ValueWithTtl<V>>>,
}

struct ValueWithTtl<V> {
    value: V,
    valid_before: Instant,
}

/// A purely time-expiring cache, safe for concurrent get/set from many
/// resolver workers. No capacity-based eviction: entries live until their TTL
/// lapses, matching the Answer Cache's "time-expiring mapping" contract.
impl<K: Hash + Eq + Debug, V: Clone + Debug> Cache<K, V> {
    pub(crate) fn new() -> Cache<K, V> {
        Cache { entries: Mutex::new(HashMap::new()) }
    }

    #[instrument(name = "cache-store", skip(self, value))]
    fn store_with_ttl(&self, key: K, value: V, valid_before: Instant) {
        self.entries.lock().unwrap().insert(key, ValueWithTtl { value, valid_before });
    }

    #[instrument(name = "cache-get", skip(self), fields(hit = false, expired = false))]
    fn get(&self, key: &K, now: Instant) -> Option<V> {
        let mut guard = self.entries.lock().unwrap();
        let span = tracing::Span::current();
        let expired = matches!(guard.get(key), Some(v) if v.valid_before < now);
        if expired {
            guard.remove(key);
            span.record("expired", true);
            return None;
        }
        match guard.get(key) {
            Some(v) => {
                span.record("hit", true);
                Some(v.value.clone())
            }
            None => None,
        }
    }
}

/// Digest a queried name the same way regardless of caller (case-preserving,
/// not a security boundary -- any stable keying function would do).
pub(crate) fn digest_name(name: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Two disjoint answer caches, one per address family (A and AAAA). This is
/// deliberately simpler than an NS-referral cache: the spec's Answer Cache
/// only ever stores the final resolved address list for a name.
pub struct AnswerCache {
    ipv4: Cache<String, Vec<IpAddr>>,
    ipv6: Cache<String, Vec<IpAddr>>,
}

impl AnswerCache {
    pub fn new() -> Self {
        AnswerCache { ipv4: Cache::new(), ipv6: Cache::new() }
    }

    fn store_for(&self, record_type: RecordType) -> &Cache<String, Vec<IpAddr>> {
        match record_type {
            RecordType::AAAA => &self.ipv6,
            _ => &self.ipv4,
        }
    }

    pub fn get(&self, name: &str, record_type: RecordType) -> Option<Vec<IpAddr>> {
        self.store_for(record_type).get(&digest_name(name), Instant::now())
    }

    /// Never caches an empty list (spec invariant).
    pub fn store(&self, name: &str, record_type: RecordType, addrs: Vec<IpAddr>) {
        if addrs.is_empty() {
            return;
        }
        self.store_for(record_type).store_with_ttl(
            digest_name(name),
            addrs,
            Instant::now() + ANSWER_TTL,
        );
    }
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_digest_is_case_preserving() {
        assert_ne!(digest_name("Example.com"), digest_name("example.com"));
    }

    #[test]
    fn test_cache_roundtrip() {
        let cache: Cache<String, &str> = Cache::new();
        let now = Instant::now();
        cache.store_with_ttl("key0".to_owned(), "value0", now + Duration::from_secs(10));

        let result = cache.get(&"key0".to_owned(), Instant::now());
        assert_eq!(result, Some("value0"));
    }

    #[test]
    fn test_cache_expiry_is_reaped() {
        let cache: Cache<String, &str> = Cache::new();
        let now = Instant::now();
        cache.store_with_ttl("key1".to_owned(), "value1", now + Duration::from_secs(5));

        assert!(cache.get(&"key1".to_owned(), now + Duration::from_secs(20)).is_none());
        assert_eq!(cache.entries.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_answer_cache_never_stores_empty() {
        let cache = AnswerCache::new();
        cache.store("example.com", RecordType::A, vec![]);
        assert_eq!(cache.get("example.com", RecordType::A), None);
    }

    #[test]
    fn test_answer_cache_families_are_disjoint() {
        let cache = AnswerCache::new();
        let v4 = vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))];
        cache.store("example.com", RecordType::A, v4.clone());
        assert_eq!(cache.get("example.com", RecordType::A), Some(v4));
        assert_eq!(cache.get("example.com", RecordType::AAAA), None);
    }
}
