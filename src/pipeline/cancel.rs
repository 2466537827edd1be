// src/pipeline/cancel.rs — Cooperative cancellation and progress counters
//
// Both are shared between the worker driving a run and whoever handles
// requests for it. Clones share the same underlying state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Sticky stop request for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call from any thread, any number of times.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Only the session registry calls this, when a new run starts.
    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A consistent (current, total) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    /// Whole-number percentage, 0 when no total is known.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Progress counters. Both fields live under one lock so readers never see
/// a torn pair.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<Mutex<ProgressSnapshot>>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // A poisoned counter pair is still a valid pair of integers.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start of a run: current = 0, total = `total`.
    pub fn reset(&self, total: usize) {
        *self.lock() = ProgressSnapshot { current: 0, total };
    }

    /// Move forward to `completed`, clamped to the total. Returns whether the
    /// counter changed; stale or duplicate updates are ignored.
    pub fn advance_to(&self, completed: usize) -> bool {
        let mut p = self.lock();
        let next = completed.min(p.total);
        if next > p.current {
            p.current = next;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.lock()
    }

    /// Restore a pair loaded from durable storage.
    pub(crate) fn restore(&self, snapshot: ProgressSnapshot) {
        *self.lock() = ProgressSnapshot {
            current: snapshot.current.min(snapshot.total),
            total: snapshot.total,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared_and_sticky() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!flag.is_set());
        other.set();
        other.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!other.is_set());
    }

    #[test]
    fn test_progress_monotone_and_clamped() {
        let p = Progress::new();
        p.reset(3);
        assert!(p.advance_to(1));
        assert!(!p.advance_to(1));
        assert!(!p.advance_to(0));
        assert!(p.advance_to(10));
        assert_eq!(p.snapshot(), ProgressSnapshot { current: 3, total: 3 });
    }

    #[test]
    fn test_progress_reset() {
        let p = Progress::new();
        p.reset(5);
        p.advance_to(4);
        p.reset(2);
        assert_eq!(p.snapshot(), ProgressSnapshot { current: 0, total: 2 });
    }

    #[test]
    fn test_percent() {
        assert_eq!(ProgressSnapshot { current: 0, total: 0 }.percent(), 0);
        assert_eq!(ProgressSnapshot { current: 1, total: 3 }.percent(), 33);
        assert_eq!(ProgressSnapshot { current: 3, total: 3 }.percent(), 100);
        assert!(ProgressSnapshot { current: 3, total: 3 }.is_complete());
        assert!(!ProgressSnapshot { current: 0, total: 0 }.is_complete());
    }

    #[test]
    fn test_concurrent_advances_never_regress() {
        let p = Progress::new();
        p.reset(1000);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let p = p.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..1000 {
                        p.advance_to((i * 7 + t) % 1001);
                        let now = p.snapshot().current;
                        assert!(now >= last);
                        last = now;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(p.snapshot().current <= 1000);
    }
}
