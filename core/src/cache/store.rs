use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;

use super::entry::{CacheEntry, CacheSnapshot};
use crate::config::CacheConfig;
use crate::descriptor::Fingerprint;
use crate::error::EngineError;
use crate::persist;
use crate::registry::{CompletionEvent, CompletionSubscriber, ExecutionResult};
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePut {
    Stored,
    /// An entry with the same fingerprint was overwritten.
    Replaced,
    /// The existing entry completed later; the put was ignored.
    Stale,
    RejectedFailure,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub evictions: u64,
    pub expired: u64,
    pub hit_rate: f64,
}

pub struct ResultCache {
    enabled: bool,
    default_ttl: Duration,
    capacity: usize,
    entries: Mutex<LruCache<Fingerprint, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl ResultCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let capacity = cfg.max_entries.max(1);
        Self {
            enabled: cfg.enabled,
            default_ttl: cfg.default_ttl(),
            capacity,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ExecutionResult> {
        self.get_at(fingerprint, Utc::now())
    }

    pub fn get_at(&self, fingerprint: &Fingerprint, now: DateTime<Utc>) -> Option<ExecutionResult> {
        if !self.enabled {
            return None;
        }
        let mut entries = lock(&self.entries);
        let hit = match entries.get(fingerprint).cloned() {
            Some(entry) if entry.is_expired(now) => {
                entries.pop(fingerprint);
                self.expired.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.record_hit();
                Some(entry.result.clone())
            }
            None => None,
        };
        drop(entries);

        match &hit {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = fingerprint.short(), "cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        hit
    }

    pub fn put(&self, fingerprint: Fingerprint, result: ExecutionResult, ttl: Duration) -> CachePut {
        self.put_at(fingerprint, result, ttl, Utc::now())
    }

    pub fn put_at(
        &self,
        fingerprint: Fingerprint,
        result: ExecutionResult,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CachePut {
        if !self.enabled {
            return CachePut::Disabled;
        }
        if !result.succeeded() {
            return CachePut::RejectedFailure;
        }
        let entry = Arc::new(CacheEntry::new(fingerprint.clone(), result, now, ttl));

        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.peek(&fingerprint) {
            if !existing.is_expired(now) && existing.completed_at() > entry.completed_at() {
                return CachePut::Stale;
            }
        }
        let outcome = match entries.push(fingerprint.clone(), entry) {
            Some((old_key, _)) if old_key == fingerprint => CachePut::Replaced,
            Some((evicted, _)) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = evicted.short(), "cache eviction");
                CachePut::Stored
            }
            None => CachePut::Stored,
        };
        drop(entries);
        tracing::debug!(fingerprint = fingerprint.short(), ?outcome, "cache put");
        outcome
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        lock(&self.entries).pop(fingerprint).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = lock(&self.entries);
        let stale: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &stale {
            entries.pop(k);
        }
        drop(entries);
        if !stale.is_empty() {
            self.expired.fetch_add(stale.len() as u64, Ordering::Relaxed);
            tracing::debug!(count = stale.len(), "purged expired cache entries");
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hit_count,
            miss_count,
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hit_count as f64 / lookups as f64
            },
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let entries = lock(&self.entries);
        CacheSnapshot {
            entries: entries.iter().rev().map(|(_, e)| e.to_snapshot()).collect(),
        }
    }

    /// Load entries from a snapshot, skipping expired ones. Returns how many
    /// were restored.
    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let now = Utc::now();
        let mut entries = lock(&self.entries);
        let mut restored = 0;
        for s in snapshot.entries {
            let entry = CacheEntry::from_snapshot(s);
            if entry.is_expired(now) || !entry.result.succeeded() {
                continue;
            }
            entries.push(entry.fingerprint.clone(), Arc::new(entry));
            restored += 1;
        }
        restored
    }

    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        persist::write_json(path, &self.snapshot())
    }

    pub fn load_from(&self, path: &Path) -> Result<usize, EngineError> {
        match persist::read_json::<CacheSnapshot>(path)? {
            Some(snapshot) => Ok(self.restore(snapshot)),
            None => Ok(0),
        }
    }
}

impl CompletionSubscriber for ResultCache {
    fn name(&self) -> &str {
        "result-cache"
    }

    fn on_completion(&self, event: &CompletionEvent) {
        if !event.descriptor.cacheable || event.result.cache_hit || !event.result.succeeded() {
            return;
        }
        self.put(
            event.result.fingerprint.clone(),
            event.result.clone(),
            self.default_ttl,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TaskId, TaskState};
    use crate::util::CapturedOutput;
    use pretty_assertions::assert_eq;

    fn cfg(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ..CacheConfig::default()
        }
    }

    fn result(tool: &str, state: TaskState, completed_at: DateTime<Utc>) -> ExecutionResult {
        ExecutionResult {
            task_id: TaskId::new(),
            tool: tool.to_string(),
            target: "t".to_string(),
            fingerprint: Fingerprint::of(tool, &[], "t"),
            state,
            exit_code: Some(if state == TaskState::Succeeded { 0 } else { 1 }),
            stdout: CapturedOutput::from_text(format!("{tool} output")),
            stderr: CapturedOutput::default(),
            elapsed_ms: 10,
            cache_hit: false,
            completed_at: Some(completed_at),
            diagnostic: None,
            launch_failed: false,
        }
    }

    fn fp(tool: &str) -> Fingerprint {
        Fingerprint::of(tool, &[], "t")
    }

    #[test]
    fn stores_only_successes() {
        let cache = ResultCache::new(&cfg(10));
        let now = Utc::now();
        let ttl = Duration::from_secs(60);

        assert_eq!(
            cache.put(fp("a"), result("a", TaskState::Failed, now), ttl),
            CachePut::RejectedFailure
        );
        assert!(cache.get(&fp("a")).is_none());

        assert_eq!(
            cache.put(fp("a"), result("a", TaskState::Succeeded, now), ttl),
            CachePut::Stored
        );
        assert_eq!(cache.get(&fp("a")).unwrap().stdout.text, "a output");

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn older_completion_never_replaces_newer() {
        let cache = ResultCache::new(&cfg(10));
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        let newer = result("a", TaskState::Succeeded, now);
        let older = result("a", TaskState::Succeeded, now - chrono::Duration::seconds(5));

        cache.put_at(fp("a"), newer.clone(), ttl, now);
        assert_eq!(cache.put_at(fp("a"), older, ttl, now), CachePut::Stale);
        assert_eq!(cache.get_at(&fp("a"), now).unwrap().task_id, newer.task_id);

        let latest = result("a", TaskState::Succeeded, now + chrono::Duration::seconds(1));
        assert_eq!(
            cache.put_at(fp("a"), latest.clone(), ttl, now),
            CachePut::Replaced
        );
        assert_eq!(cache.get_at(&fp("a"), now).unwrap().task_id, latest.task_id);
    }

    #[test]
    fn expired_entries_are_dropped_lazily_and_by_purge() {
        let cache = ResultCache::new(&cfg(10));
        let t0 = Utc::now();
        let ttl = Duration::from_secs(10);
        cache.put_at(fp("a"), result("a", TaskState::Succeeded, t0), ttl, t0);
        cache.put_at(fp("b"), result("b", TaskState::Succeeded, t0), ttl, t0);

        let later = t0 + chrono::Duration::seconds(11);
        assert!(cache.get_at(&fp("a"), later).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired_at(later), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired, 2);
    }

    #[test]
    fn lru_eviction_is_counted() {
        let cache = ResultCache::new(&cfg(2));
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        cache.put(fp("a"), result("a", TaskState::Succeeded, now), ttl);
        cache.put(fp("b"), result("b", TaskState::Succeeded, now), ttl);
        cache.get(&fp("a"));
        cache.put(fp("c"), result("c", TaskState::Succeeded, now), ttl);

        assert!(cache.get(&fp("b")).is_none());
        assert!(cache.get(&fp("a")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn snapshot_restores_into_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let now = Utc::now();

        let cache = ResultCache::new(&cfg(10));
        cache.put(fp("a"), result("a", TaskState::Succeeded, now), Duration::from_secs(600));
        cache.put(fp("b"), result("b", TaskState::Succeeded, now), Duration::from_secs(600));
        cache.save_to(&path).unwrap();

        let cold = ResultCache::new(&cfg(10));
        assert_eq!(cold.load_from(&dir.path().join("missing.json")).unwrap(), 0);
        assert_eq!(cold.load_from(&path).unwrap(), 2);
        assert_eq!(cold.get(&fp("b")).unwrap().tool, "b");
    }

    #[test]
    fn sub_second_ttl_survives_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResultCache::new(&cfg(10));
        cache.put(
            fp("a"),
            result("a", TaskState::Succeeded, Utc::now()),
            Duration::from_millis(30_900),
        );
        cache.save_to(&path).unwrap();
        assert_eq!(cache.snapshot().entries[0].ttl_ms, 30_900);

        let cold = ResultCache::new(&cfg(10));
        assert_eq!(cold.load_from(&path).unwrap(), 1);
        assert_eq!(cold.snapshot().entries[0].ttl_ms, 30_900);

        let short = ResultCache::new(&cfg(10));
        short.put(
            fp("b"),
            result("b", TaskState::Succeeded, Utc::now()),
            Duration::from_millis(900),
        );
        let restored = ResultCache::new(&cfg(10));
        assert_eq!(restored.restore(short.snapshot()), 1);
    }

    #[test]
    fn whole_second_snapshots_still_load() {
        let cache = ResultCache::new(&cfg(10));
        cache.put(
            fp("a"),
            result("a", TaskState::Succeeded, Utc::now()),
            Duration::from_secs(600),
        );
        let mut doc = serde_json::to_value(cache.snapshot()).unwrap();
        let entry = doc["entries"][0].as_object_mut().unwrap();
        entry.remove("ttl_ms");
        entry.insert("ttl_secs".into(), serde_json::json!(600));
        let snapshot: CacheSnapshot = serde_json::from_value(doc).unwrap();

        let cold = ResultCache::new(&cfg(10));
        assert_eq!(cold.restore(snapshot), 1);
        assert_eq!(cold.snapshot().entries[0].ttl_ms, 600_000);
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = ResultCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let now = Utc::now();
        assert_eq!(
            cache.put(fp("a"), result("a", TaskState::Succeeded, now), Duration::from_secs(5)),
            CachePut::Disabled
        );
        assert!(cache.get(&fp("a")).is_none());
    }
}
