// Expiring in-memory cache used for participant, user-index, and presence
// entries. The backing store stays authoritative; a lost cache write is
// acceptable.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Entries beyond this count trigger an expired-entry sweep on insert.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A TTL map with lazy expiry: `get` ignores expired entries, `set` sweeps
/// them out once the map grows past [`SWEEP_THRESHOLD`].
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read().await;
        guard
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.write().await;
        if guard.len() >= SWEEP_THRESHOLD {
            let now = Instant::now();
            guard.retain(|_, entry| entry.expires_at > now);
        }
        guard.insert(key, Entry { value, expires_at: Instant::now() + ttl });
    }

    pub async fn remove(&self, key: &K) {
        self.inner.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TtlCache;

    #[tokio::test]
    async fn hit_within_ttl_and_miss_after_expiry() {
        tokio::time::pause();
        let cache: TtlCache<&str, i32> = TtlCache::new();

        cache.set("k", 7, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"k").await, Some(7));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn set_overwrites_and_remove_deletes() {
        let cache: TtlCache<&str, i32> = TtlCache::new();

        cache.set("k", 1, Duration::from_secs(60)).await;
        cache.set("k", 2, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"k").await, Some(2));

        cache.remove(&"k").await;
        assert_eq!(cache.get(&"k").await, None);
    }
}
