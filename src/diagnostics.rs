//! Warn-once diagnostics.
//!
//! The same knowledge-base or selector-debt note tends to repeat across
//! every Journey of a run. [`WarnOnce`] emits each key once per command
//! and forgets the oldest keys past its capacity.

use std::collections::{HashSet, VecDeque};
use std::fmt;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct WarnOnce {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for WarnOnce {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WarnOnce {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// True the first time `key` is seen (or after it was evicted).
    pub fn first_time(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    /// Logs `message` at warn level unless `key` was already warned about.
    pub fn warn(&mut self, key: &str, message: impl fmt::Display) -> bool {
        let first = self.first_time(key);
        if first {
            tracing::warn!("{message}");
        }
        first
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_once_per_key() {
        let mut once = WarnOnce::default();
        assert!(once.warn("kb:dup", "duplicate pattern id"));
        assert!(!once.warn("kb:dup", "duplicate pattern id"));
        assert!(once.warn("debt:#x", "selector debt"));
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut once = WarnOnce::new(2);
        assert!(once.first_time("a"));
        assert!(once.first_time("b"));
        assert!(once.first_time("c"));
        assert_eq!(once.len(), 2);
        // `a` was evicted, `c` is still remembered.
        assert!(!once.first_time("c"));
        assert!(once.first_time("a"));
    }
}
