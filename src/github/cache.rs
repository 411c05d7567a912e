//! Short-lived issue cache keyed by issue number.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::api::Issue;
use crate::storage::CacheConfig;

#[derive(Debug)]
pub struct IssueCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<u64, (Instant, Issue)>>,
}

impl IssueCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled && config.max_entries > 0,
            ttl: Duration::from_millis(config.ttl_ms),
            max_entries: config.max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<u64, (Instant, Issue)>) -> T) -> T {
        let mut guard = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn get(&self, number: u64) -> Option<Issue> {
        if !self.enabled {
            return None;
        }
        let ttl = self.ttl;
        let hit = self.with_entries(|entries| match entries.get(&number) {
            Some((stored, issue)) if stored.elapsed() < ttl => Some(issue.clone()),
            Some(_) => {
                entries.remove(&number);
                None
            }
            None => None,
        });
        tracing::debug!(number, hit = hit.is_some(), "Issue cache lookup");
        hit
    }

    /// Store an issue, evicting the oldest entry when full.
    pub fn put(&self, issue: Issue) {
        if !self.enabled {
            return;
        }
        let max = self.max_entries;
        self.with_entries(|entries| {
            if !entries.contains_key(&issue.number) && entries.len() >= max {
                let oldest = entries.iter().min_by_key(|(_, (stored, _))| *stored).map(|(n, _)| *n);
                if let Some(n) = oldest {
                    entries.remove(&n);
                }
            }
            entries.insert(issue.number, (Instant::now(), issue));
        });
    }

    pub fn invalidate(&self, number: u64) {
        self.with_entries(|entries| entries.remove(&number));
    }

    pub fn clear(&self) {
        self.with_entries(|entries| entries.clear());
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::api::IssueState;
    use chrono::Utc;

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            title: format!("Issue {}", number),
            body: None,
            state: IssueState::Open,
            labels: vec![],
            html_url: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            pull_request: None,
        }
    }

    fn cache(ttl_ms: u64, max_entries: usize) -> IssueCache {
        IssueCache::new(&CacheConfig {
            enabled: true,
            ttl_ms,
            max_entries,
        })
    }

    #[test]
    fn test_hit_and_invalidate() {
        let cache = cache(60_000, 10);
        cache.put(issue(1));
        assert_eq!(cache.get(1).unwrap().number, 1);
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = cache(0, 10);
        cache.put(issue(1));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_by_max_entries() {
        let cache = cache(60_000, 2);
        cache.put(issue(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(issue(2));
        cache.put(issue(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = IssueCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put(issue(1));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }
}
