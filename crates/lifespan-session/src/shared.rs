//! Acquire bookkeeping and close protocol for shared and implicit
//! sessions.
//!
//! The acquire count doubles as the close latch: a successful close is
//! the CAS of the count from `0` to [`CLOSED_ACQUIRE_COUNT`]. Exactly one
//! closer can win that race, and once it is won no acquire can succeed.
//! A loser that sees the sentinel spins until the winner has published
//! the `CLOSED` state, so every `AlreadyClosed` error is only reported
//! after the session is observably closed.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use lifespan_core::SessionError;
use tracing::debug;

use crate::closer::{Closer, PendingClose};
use crate::session::{Session, SessionInner};

/// Value of the acquire count once a close has won.
pub(crate) const CLOSED_ACQUIRE_COUNT: i32 = -1;

pub(crate) struct SharedCounts {
    count: AtomicI32,
    limit: u32,
    closer: Arc<dyn Closer>,
}

impl SharedCounts {
    pub(crate) fn new(limit: u32, closer: Arc<dyn Closer>) -> Self {
        Self {
            count: AtomicI32::new(0),
            limit,
            closer,
        }
    }

    pub(crate) fn closer(&self) -> &Arc<dyn Closer> {
        &self.closer
    }

    /// Outstanding acquires; zero once closed.
    pub(crate) fn outstanding(&self) -> u32 {
        u32::try_from(self.count.load(Ordering::Acquire)).unwrap_or(0)
    }

    pub(crate) fn acquire(&self, session: &SessionInner) -> Result<(), SessionError> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return Err(already_closed(session));
            }
            if current as u32 >= self.limit {
                return Err(SessionError::OutOfCapacity { limit: self.limit });
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// # Panics
    ///
    /// Panics if the count is not positive: a release without a matching
    /// acquire.
    pub(crate) fn release(&self, session: &SessionInner) {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            assert!(
                current > 0,
                "release of session {} without matching acquire",
                session.id()
            );
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Win the close race, publish `CLOSED`, then hand the session to the
    /// closer for the handshake and cleanup.
    pub(crate) fn close(&self, session: &Session) -> Result<(), SessionError> {
        let inner = session.inner();
        match self.count.compare_exchange(
            0,
            CLOSED_ACQUIRE_COUNT,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(n) if n < 0 => return Err(already_closed(inner)),
            Err(n) => {
                return Err(SessionError::StillAcquired {
                    session: inner.id(),
                    count: n as u32,
                })
            }
        }
        inner.mark_closed();
        debug!(session = %inner.id(), kind = %session.kind(), "session closed");
        self.closer.close(PendingClose::session(session.clone()));
        Ok(())
    }
}

/// Wait until the winning closer has published `CLOSED`, then report it.
///
/// The window between the sentinel CAS and the state store is a handful
/// of instructions, so the wait is a spin with backoff.
fn already_closed(session: &SessionInner) -> SessionError {
    let backoff = Backoff::new();
    while session.is_alive() {
        backoff.snooze();
    }
    SessionError::AlreadyClosed {
        session: session.id(),
    }
}
