use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::Fingerprint;
use crate::registry::ExecutionResult;

/// Immutable once stored; only the hit counter moves.
#[derive(Debug)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: ExecutionResult,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    hits: AtomicU64,
}

impl CacheEntry {
    pub fn new(
        fingerprint: Fingerprint,
        result: ExecutionResult,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            fingerprint,
            result,
            created_at,
            ttl,
            hits: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// None when the TTL is too large to represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// When the cached run finished; orders concurrent puts.
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.result.completed_at.unwrap_or(self.created_at)
    }

    pub(crate) fn to_snapshot(&self) -> CacheSnapshotEntry {
        CacheSnapshotEntry {
            fingerprint: self.fingerprint.clone(),
            result: self.result.clone(),
            created_at: self.created_at,
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
            ttl_secs: None,
            hits: self.hits(),
        }
    }

    pub(crate) fn from_snapshot(s: CacheSnapshotEntry) -> Self {
        let ttl = match s.ttl_secs {
            Some(secs) if s.ttl_ms == 0 => Duration::from_secs(secs),
            _ => Duration::from_millis(s.ttl_ms),
        };
        let entry = Self::new(s.fingerprint, s.result, s.created_at, ttl);
        entry.hits.store(s.hits, Ordering::Relaxed);
        entry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshotEntry {
    pub fingerprint: Fingerprint,
    pub result: ExecutionResult,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ttl_ms: u64,
    /// Older snapshots stored whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub hits: u64,
}

/// Entries ordered least to most recently used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub entries: Vec<CacheSnapshotEntry>,
}
