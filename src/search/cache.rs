//! LRU + TTL result cache keyed by canonicalized queries.

use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;
use serde::Serialize;

use crate::config::CacheConfig;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<T> {
    value: T,
    /// File paths referenced by the value, for `invalidate_by_file`.
    files: Vec<String>,
    inserted_at: Instant,
}

/// LRU cache with lazy TTL expiry.
///
/// `get` refreshes recency; expired entries are deleted on read. When over
/// capacity, the least-recently-used entry is evicted.
pub struct ContentCache<T> {
    entries: LruCache<String, Entry<T>>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl<T: Clone> ContentCache<T> {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: LruCache::new(capacity),
            ttl: Duration::from_secs(config.ttl_secs),
            hits: 0,
            misses: 0,
        }
    }

    /// Fetch a value, refreshing its recency. Expired entries are removed.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live (unexpired) entry exists. Does not refresh recency.
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .peek(key)
            .map(|entry| entry.inserted_at.elapsed() <= self.ttl)
            .unwrap_or(false)
    }

    /// Store a value. `files` are the paths the value references, used by
    /// [`ContentCache::invalidate_by_file`].
    pub fn set(&mut self, key: String, value: T, files: Vec<String>) {
        self.entries.put(
            key,
            Entry {
                value,
                files,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop one entry.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    /// Drop every entry whose key matches the regex.
    pub fn invalidate_pattern(&mut self, pattern: &regex::Regex) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        keys.len()
    }

    /// Drop every entry referencing a file path.
    pub fn invalidate_by_file(&mut self, file_path: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.files.iter().any(|f| f == file_path))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        keys.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

/// Canonical JSON key so textually-equivalent queries collide.
pub fn canonical_key<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize, ttl_secs: u64) -> ContentCache<String> {
        ContentCache::new(&CacheConfig {
            max_entries,
            ttl_secs,
        })
    }

    #[test]
    fn get_and_set() {
        let mut cache = cache(10, 60);
        cache.set("k".to_string(), "v".to_string(), vec![]);
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert!(cache.has("k"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn lru_evicts_oldest_and_hit_refreshes() {
        let mut cache = cache(2, 60);
        cache.set("a".to_string(), "1".to_string(), vec![]);
        cache.set("b".to_string(), "2".to_string(), vec![]);
        // Touch "a" so "b" becomes least recently used.
        cache.get("a");
        cache.set("c".to_string(), "3".to_string(), vec![]);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
    }

    #[test]
    fn ttl_expires_lazily() {
        let mut cache = cache(10, 0);
        cache.set("k".to_string(), "v".to_string(), vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn invalidate_pattern() {
        let mut cache = cache(10, 60);
        cache.set("query:auth".to_string(), "1".to_string(), vec![]);
        cache.set("query:db".to_string(), "2".to_string(), vec![]);
        cache.set("other".to_string(), "3".to_string(), vec![]);

        let removed = cache.invalidate_pattern(&regex::Regex::new("^query:").unwrap());
        assert_eq!(removed, 2);
        assert!(cache.has("other"));
    }

    #[test]
    fn invalidate_by_file() {
        let mut cache = cache(10, 60);
        cache.set(
            "a".to_string(),
            "1".to_string(),
            vec!["src/auth.ts".to_string()],
        );
        cache.set(
            "b".to_string(),
            "2".to_string(),
            vec!["src/db.ts".to_string()],
        );

        assert_eq!(cache.invalidate_by_file("src/auth.ts"), 1);
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[test]
    fn canonical_key_collides_for_equal_values() {
        #[derive(Serialize)]
        struct Key<'a> {
            query: &'a str,
            branch: &'a str,
            patterns: Vec<&'a str>,
        }
        let a = canonical_key(&Key {
            query: "create user",
            branch: "main",
            patterns: vec!["a", "b"],
        });
        let b = canonical_key(&Key {
            query: "create user",
            branch: "main",
            patterns: vec!["a", "b"],
        });
        assert_eq!(a, b);
    }
}
