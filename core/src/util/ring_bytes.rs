use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::lock;

/// Bounded tail buffer for a child's output stream. Keeps the last `cap`
/// bytes and counts everything that went through it.
pub struct RingBytes {
    inner: Mutex<RingInner>,
    cap: usize,
}

struct RingInner {
    buf: VecDeque<u8>,
    total: u64,
}

impl RingBytes {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RingInner {
                buf: VecDeque::with_capacity(cap.min(64 * 1024)),
                total: 0,
            }),
            cap,
        })
    }

    pub fn push(&self, data: &[u8]) {
        let mut g = lock(&self.inner);
        g.total = g.total.saturating_add(data.len() as u64);
        if self.cap == 0 {
            return;
        }
        let data = if data.len() > self.cap {
            &data[data.len() - self.cap..]
        } else {
            data
        };
        let overflow = g.buf.len().saturating_add(data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            g.buf.drain(..overflow);
        }
        g.buf.extend(data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let g = lock(&self.inner);
        // Pre-allocate exact capacity to avoid reallocation
        let mut vec = Vec::with_capacity(g.buf.len());
        vec.extend(g.buf.iter().copied());
        vec
    }

    pub fn total(&self) -> u64 {
        lock(&self.inner).total
    }

    pub fn snapshot(&self) -> CapturedOutput {
        let g = lock(&self.inner);
        let bytes: Vec<u8> = g.buf.iter().copied().collect();
        CapturedOutput {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            truncated: g.total > g.buf.len() as u64,
            total_bytes: g.total,
        }
    }
}

/// Size-bounded capture of one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub text: String,
    /// True when earlier bytes were discarded to respect the capture bound.
    pub truncated: bool,
    pub total_bytes: u64,
}

impl CapturedOutput {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let total_bytes = text.len() as u64;
        Self {
            text,
            truncated: false,
            total_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_tail_and_flags_truncation() {
        let ring = RingBytes::new(4);
        ring.push(b"ab");
        assert!(!ring.snapshot().truncated);
        ring.push(b"cdef");
        let snap = ring.snapshot();
        assert_eq!(snap.text, "cdef");
        assert!(snap.truncated);
        assert_eq!(snap.total_bytes, 6);
    }

    #[test]
    fn oversized_chunk_keeps_last_bytes() {
        let ring = RingBytes::new(3);
        ring.push(b"0123456789");
        assert_eq!(ring.to_bytes(), b"789");
        assert_eq!(ring.total(), 10);
    }

    #[test]
    fn zero_capacity_only_counts() {
        let ring = RingBytes::new(0);
        ring.push(b"hello");
        let snap = ring.snapshot();
        assert!(snap.text.is_empty());
        assert!(snap.truncated);
        assert_eq!(snap.total_bytes, 5);
    }
}
