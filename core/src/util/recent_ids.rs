use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Bounded "already seen" set; the oldest id is forgotten first.
///
/// Completion events are delivered at least once, so every subscriber keeps
/// one of these keyed by task id.
#[derive(Debug)]
pub struct RecentIds<T> {
    order: VecDeque<T>,
    seen: HashSet<T>,
    cap: usize,
}

impl<T: Eq + Hash + Clone> RecentIds<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Returns true when `id` was not seen before (and records it).
    pub fn insert(&mut self, id: T) -> bool {
        if self.seen.contains(&id) {
            return false;
        }
        if self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn contains(&self, id: &T) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
