//! Acquire bookkeeping for confined sessions.
//!
//! Only the owner thread may acquire, so the owner-side count is a plain
//! read-modify-write (relaxed load + store, no CAS). Releases, however,
//! may arrive from any thread: a shared session created on the owner
//! thread may keep a confined session alive and then be closed
//! elsewhere. Those releases are accumulated in a separate atomic
//! counter, and the outstanding count is the difference of the two.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use lifespan_core::{SessionError, SessionId};

pub(crate) struct ConfinedCounts {
    owner: ThreadId,
    /// Acquires performed by the owner minus releases performed by the
    /// owner. Written by the owner thread only.
    acquired: AtomicU64,
    /// Releases performed by non-owner threads.
    async_released: AtomicU64,
    limit: u32,
}

impl ConfinedCounts {
    pub(crate) fn new(owner: ThreadId, limit: u32) -> Self {
        Self {
            owner,
            acquired: AtomicU64::new(0),
            async_released: AtomicU64::new(0),
            limit,
        }
    }

    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    pub(crate) fn outstanding(&self) -> u64 {
        let acquired = self.acquired.load(Ordering::Acquire);
        let released = self.async_released.load(Ordering::Acquire);
        acquired.saturating_sub(released)
    }

    /// Owner-thread acquire. The caller has already checked the owner
    /// and that the session is open.
    pub(crate) fn acquire(&self) -> Result<(), SessionError> {
        if self.outstanding() >= u64::from(self.limit) {
            return Err(SessionError::OutOfCapacity { limit: self.limit });
        }
        let acquired = self.acquired.load(Ordering::Relaxed);
        self.acquired.store(acquired + 1, Ordering::Release);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if there is no outstanding acquire to release.
    pub(crate) fn release(&self, session: SessionId) {
        assert!(
            self.outstanding() > 0,
            "release of session {session} without matching acquire"
        );
        if thread::current().id() == self.owner {
            let acquired = self.acquired.load(Ordering::Relaxed);
            self.acquired.store(acquired - 1, Ordering::Release);
        } else {
            self.async_released.fetch_add(1, Ordering::AcqRel);
        }
    }
}
