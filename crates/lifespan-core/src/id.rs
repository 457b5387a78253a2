//! Strongly-typed identifiers.
//!
//! Every identifier is allocated from its own process-wide monotonic
//! counter, so two live objects never share an ID and a dropped object's
//! ID is never handed out again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`SessionId`] allocation.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Counter for unique [`ExtentId`] allocation.
static EXTENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Counter for unique [`PoolId`] allocation.
static POOL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies a session for diagnostics and logging.
///
/// Session identity is the session object itself; the ID exists so that
/// log lines and error messages can name a session without holding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh, unique session ID. Thread-safe.
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a structured extent (a dynamically-scoped region of
/// control flow that owns a structured session).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtentId(u64);

impl ExtentId {
    /// Allocate a fresh, unique extent ID. Thread-safe.
    pub fn next() -> Self {
        Self(EXTENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExtentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a stack pool.
///
/// Used as the key of the per-thread stack registry, so that several
/// independent pools can coexist on the same thread without sharing
/// stacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    /// Allocate a fresh, unique pool ID. Thread-safe.
    pub fn next() -> Self {
        Self(POOL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
