use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::TargetClass;
use crate::registry::TaskId;
use crate::util::lock;

/// One observed run of a tool against a class of target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub rate_limited: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub findings: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Recency-weighted aggregate over one (tool, class) bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToolSignal {
    pub samples: usize,
    /// Sum of weights; the newest record weighs 1.0.
    pub weight: f64,
    pub weighted_successes: f64,
    pub weighted_findings: f64,
    /// Timeouts among the newest records; a later success does not reset it.
    pub recent_timeouts: u32,
    /// Longest latency of a recent successful run.
    pub longest_recent_success_ms: u64,
    pub recently_rate_limited: bool,
}

impl ToolSignal {
    pub fn success_rate(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.weighted_successes / self.weight)
    }

    pub fn mean_findings(&self) -> f64 {
        if self.weight > 0.0 {
            self.weighted_findings / self.weight
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBucket {
    pub tool: String,
    pub class: TargetClass,
    pub records: Vec<OutcomeRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default)]
    pub buckets: Vec<HistoryBucket>,
}

const RATE_LIMIT_LOOKBACK: usize = 5;
const TIMEOUT_LOOKBACK: usize = 5;

type Key = (String, TargetClass);

/// Append-only per-(tool, target class) ledger, bounded per key.
pub struct OutcomeHistory {
    per_key: usize,
    decay: f64,
    ledger: Mutex<HashMap<Key, VecDeque<OutcomeRecord>>>,
}

impl OutcomeHistory {
    pub fn new(per_key: usize, decay: f64) -> Self {
        Self {
            per_key: per_key.max(1),
            decay,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    fn key(tool: &str, class: TargetClass) -> Key {
        (tool.trim().to_ascii_lowercase(), class)
    }

    /// Insert or replace the record for `record.task_id`. Returns true when
    /// the task was not in the bucket yet.
    pub fn record(&self, tool: &str, class: TargetClass, record: OutcomeRecord) -> bool {
        let mut ledger = lock(&self.ledger);
        let bucket = ledger.entry(Self::key(tool, class)).or_default();
        if let Some(existing) = bucket.iter_mut().find(|r| r.task_id == record.task_id) {
            *existing = record;
            return false;
        }
        bucket.push_back(record);
        while bucket.len() > self.per_key {
            bucket.pop_front();
        }
        true
    }

    pub fn records(&self, tool: &str, class: TargetClass) -> Vec<OutcomeRecord> {
        lock(&self.ledger)
            .get(&Self::key(tool, class))
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tools with at least one record for `class`.
    pub fn tools_for(&self, class: TargetClass) -> Vec<String> {
        let mut tools: Vec<String> = lock(&self.ledger)
            .iter()
            .filter(|(key, records)| key.1 == class && !records.is_empty())
            .map(|(key, _)| key.0.clone())
            .collect();
        tools.sort();
        tools
    }

    pub fn signal(&self, tool: &str, class: TargetClass) -> ToolSignal {
        let ledger = lock(&self.ledger);
        let Some(bucket) = ledger.get(&Self::key(tool, class)) else {
            return ToolSignal::default();
        };

        let mut sig = ToolSignal {
            samples: bucket.len(),
            ..ToolSignal::default()
        };
        let mut w = 1.0;
        for (i, r) in bucket.iter().rev().enumerate() {
            sig.weight += w;
            if r.success {
                sig.weighted_successes += w;
            }
            sig.weighted_findings += w * r.findings as f64;
            if i < TIMEOUT_LOOKBACK {
                if r.timed_out {
                    sig.recent_timeouts += 1;
                } else if r.success {
                    sig.longest_recent_success_ms = sig.longest_recent_success_ms.max(r.latency_ms);
                }
            }
            if i < RATE_LIMIT_LOOKBACK && r.rate_limited {
                sig.recently_rate_limited = true;
            }
            w *= self.decay;
        }
        sig
    }

    pub fn len(&self) -> usize {
        lock(&self.ledger).values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        let ledger = lock(&self.ledger);
        let mut buckets: Vec<HistoryBucket> = ledger
            .iter()
            .map(|((tool, class), records)| HistoryBucket {
                tool: tool.clone(),
                class: *class,
                records: records.iter().cloned().collect(),
            })
            .collect();
        buckets.sort_by(|a, b| (&a.tool, a.class).cmp(&(&b.tool, b.class)));
        HistorySnapshot { buckets }
    }

    /// Replace the ledger with a snapshot; returns the number of records kept.
    pub fn restore(&self, snapshot: HistorySnapshot) -> usize {
        let mut ledger = lock(&self.ledger);
        ledger.clear();
        let mut kept = 0;
        for b in snapshot.buckets {
            let mut records: VecDeque<OutcomeRecord> = b.records.into();
            while records.len() > self.per_key {
                records.pop_front();
            }
            kept += records.len();
            ledger.insert(Self::key(&b.tool, b.class), records);
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(success: bool) -> OutcomeRecord {
        OutcomeRecord {
            task_id: TaskId::new(),
            success,
            timed_out: false,
            rate_limited: false,
            latency_ms: 10,
            findings: 0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn bounded_per_key_oldest_first() {
        let h = OutcomeHistory::new(3, 1.0);
        for ok in [false, true, true, true] {
            h.record("nmap", TargetClass::Network, rec(ok));
        }
        let records = h.records("NMAP", TargetClass::Network);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.success));
        assert!(h.records("nmap", TargetClass::Web).is_empty());
    }

    #[test]
    fn record_is_idempotent_by_task() {
        let h = OutcomeHistory::new(10, 1.0);
        let mut r = rec(true);
        assert!(h.record("a", TargetClass::Web, r.clone()));
        r.findings = 4;
        assert!(!h.record("a", TargetClass::Web, r.clone()));
        assert!(!h.record("a", TargetClass::Web, r));
        let recs = h.records("a", TargetClass::Web);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].findings, 4);
    }

    #[test]
    fn recent_outcomes_weigh_more() {
        let h = OutcomeHistory::new(10, 0.5);
        h.record("a", TargetClass::Web, rec(false));
        h.record("a", TargetClass::Web, rec(true));
        let sig = h.signal("a", TargetClass::Web);
        // weights: newest 1.0 (success), older 0.5 (failure)
        assert!((sig.success_rate().unwrap() - 1.0 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn recent_timeouts_survive_a_later_success() {
        let h = OutcomeHistory::new(10, 1.0);
        let timed_out = || OutcomeRecord {
            timed_out: true,
            ..rec(false)
        };
        h.record("a", TargetClass::Web, timed_out());
        h.record("a", TargetClass::Web, timed_out());
        h.record("a", TargetClass::Web, OutcomeRecord {
            latency_ms: 90_000,
            ..rec(true)
        });
        let sig = h.signal("a", TargetClass::Web);
        assert_eq!(sig.recent_timeouts, 2);
        assert_eq!(sig.longest_recent_success_ms, 90_000);

        for _ in 0..TIMEOUT_LOOKBACK {
            h.record("a", TargetClass::Web, rec(true));
        }
        assert_eq!(h.signal("a", TargetClass::Web).recent_timeouts, 0);
    }

    #[test]
    fn snapshot_round_trip_keeps_order() {
        let h = OutcomeHistory::new(10, 1.0);
        let first = rec(true);
        h.record("a", TargetClass::Web, first.clone());
        h.record("a", TargetClass::Web, rec(false));

        let other = OutcomeHistory::new(10, 1.0);
        assert_eq!(other.restore(h.snapshot()), 2);
        assert_eq!(other.records("a", TargetClass::Web)[0], first);
    }
}
