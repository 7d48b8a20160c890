//! Space accounting against the disk budget.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes occupied by cached and in-flight objects.
///
/// Reservations are made before bytes exist so that concurrent admissions
/// see reduced free space.
#[derive(Debug)]
pub struct SpaceLedger {
    used: AtomicU64,
    budget: u64,
}

impl SpaceLedger {
    pub fn new(budget: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            budget,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn free(&self) -> u64 {
        self.budget.saturating_sub(self.used())
    }

    /// Reserve `bytes` if they fit within the budget.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.budget)
            })
            .is_ok()
    }

    pub fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Overwrite the counter, used after scanning the data directory.
    pub fn set(&self, bytes: u64) {
        self.used.store(bytes, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_respect_budget() {
        let ledger = SpaceLedger::new(100);
        assert!(ledger.try_reserve(60));
        assert!(!ledger.try_reserve(41));
        assert!(ledger.try_reserve(40));
        assert_eq!(ledger.free(), 0);

        ledger.release(60);
        assert_eq!(ledger.used(), 40);
        assert_eq!(ledger.free(), 60);
    }

    #[test]
    fn release_saturates_at_zero() {
        let ledger = SpaceLedger::new(10);
        ledger.set(5);
        ledger.release(50);
        assert_eq!(ledger.used(), 0);
    }
}
