//! Process-local, read-through preferences cache with manual TTL tracking —
//! the same `DashMap` + `Instant`-stamped-entry shape used elsewhere in this
//! codebase's ancestry for in-flight tracking, generalized into a tiny TTL
//! cache since nothing in the stack provides one ready-made.

use dashmap::DashMap;
use nb_common::UserPreferences;
use std::time::{Duration, Instant};

struct CachedEntry {
    value: UserPreferences,
    cached_at: Instant,
}

pub struct PreferencesCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
}

impl PreferencesCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, user_id: &str) -> Option<UserPreferences> {
        let entry = self.entries.get(user_id)?;
        if entry.cached_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(user_id);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, user_id: String, value: UserPreferences) {
        self.entries.insert(user_id, CachedEntry { value, cached_at: Instant::now() });
    }

    pub fn invalidate(&self, user_id: &str) {
        self.entries.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = PreferencesCache::new(Duration::from_millis(1));
        cache.put("u1".to_string(), UserPreferences::new("u1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("u1").is_none());
    }

    #[test]
    fn fresh_entry_is_returned() {
        let cache = PreferencesCache::new(Duration::from_secs(60));
        cache.put("u1".to_string(), UserPreferences::new("u1"));
        assert!(cache.get("u1").is_some());
    }
}
