//! Process and reference identities.
//!
//! A [`Pid`] is an opaque handle to a live process. Equality and hashing are
//! identity; holding a `Pid` confers no ownership and the referenced process
//! may already be dead. A [`Ref`] is a one-shot reference used to correlate
//! monitor notifications and call replies. Both are allocated from
//! process-wide monotonic counters and are unique for the lifetime of the
//! program.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter for generating unique [`Pid`] values.
static PID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Monotonic counter for generating unique [`Ref`] values.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u64);

impl Pid {
    /// Allocates a fresh, globally unique pid.
    pub(crate) fn new() -> Self {
        Self(PID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// Opaque one-shot reference.
///
/// Correlates a monitor with its down notification and a call request with
/// its reply. Unique across the lifetime of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(u64);

impl Ref {
    /// Allocates a fresh, globally unique reference.
    pub(crate) fn new() -> Self {
        Self(REF_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying numeric identifier.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ref({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn pids_are_unique() {
        init_test("pids_are_unique");
        let a = Pid::new();
        let b = Pid::new();
        assert_ne!(a, b);
        assert!(a.id() < b.id());
        crate::test_complete!("pids_are_unique");
    }

    #[test]
    fn refs_are_unique() {
        init_test("refs_are_unique");
        let a = Ref::new();
        let b = Ref::new();
        assert_ne!(a, b);
        crate::test_complete!("refs_are_unique");
    }
}
