//! Completion of shared-session closes.
//!
//! Closing a shared session is split in two. The closing thread wins the
//! acquire-count race and publishes `CLOSED` (see [`crate::shared`]);
//! a [`Closer`] then performs the handshake (waiting until no thread is
//! inside an access bracket on the session) and runs the cleanups.
//! Implicit sessions that become unreachable submit their detached
//! cleanup chain to the same closer.
//!
//! [`InlineCloser`] does all of this on the calling thread.
//! [`DeferredCloser`](crate::DeferredCloser) batches submissions on a
//! worker thread so that one handshake covers many sessions.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_utils::Backoff;
use lifespan_core::SessionId;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::resource::Cleanups;
use crate::session::Session;

/// Completes closes handed over by shared and implicit sessions.
pub trait Closer: Send + Sync {
    /// Complete `pending`.
    ///
    /// For a session close this must not return before the session's
    /// cleanups have run, unless the closer is shutting down and runs
    /// them on the calling thread instead. Detached work may be queued.
    fn close(&self, pending: PendingClose);
}

enum Target {
    Session(Session),
    Detached(Cleanups),
}

/// A close that has been decided but not yet completed.
///
/// Either a shared session that has already published `CLOSED` and
/// still needs its handshake, or the cleanup chain of an implicit
/// session that was collected.
pub struct PendingClose {
    target: Target,
}

impl PendingClose {
    pub(crate) fn session(session: Session) -> Self {
        Self {
            target: Target::Session(session),
        }
    }

    pub(crate) fn detached(cleanups: Cleanups) -> Self {
        Self {
            target: Target::Detached(cleanups),
        }
    }

    /// The session being closed, if it still has a handle.
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.target {
            Target::Session(session) => Some(session.id()),
            Target::Detached(_) => None,
        }
    }

    /// Whether this is the cleanup chain of a collected implicit session.
    /// Nobody waits on detached work.
    pub fn is_detached(&self) -> bool {
        matches!(self.target, Target::Detached(_))
    }
}

impl fmt::Debug for PendingClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Session(session) => f.debug_tuple("PendingClose").field(&session.id()).finish(),
            Target::Detached(cleanups) => f
                .debug_struct("PendingClose")
                .field("detached_cleanups", &cleanups.len())
                .finish(),
        }
    }
}

/// Closer that completes every close on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineCloser;

impl Closer for InlineCloser {
    fn close(&self, pending: PendingClose) {
        close_batch([pending]);
    }
}

/// Complete a batch of pending closes under a single handshake.
///
/// Waits until no access bracket is open on any session in the batch,
/// then runs each cleanup chain. A panicking cleanup is logged and does
/// not prevent the rest of the batch from completing.
///
/// Returns the number of closes completed.
pub fn close_batch<I>(batch: I) -> usize
where
    I: IntoIterator<Item = PendingClose>,
{
    let batch: SmallVec<[PendingClose; 8]> = batch.into_iter().collect();

    let backoff = Backoff::new();
    for pending in &batch {
        if let Target::Session(session) = &pending.target {
            while session.inner().in_flight() != 0 {
                backoff.snooze();
            }
        }
    }

    let completed = batch.len();
    for pending in batch {
        let (id, cleanups) = match pending.target {
            Target::Session(session) => (Some(session.id()), session.inner().freeze()),
            Target::Detached(cleanups) => (None, cleanups),
        };
        trace!(session = ?id, cleanups = cleanups.len(), "running cleanups");
        if panic::catch_unwind(AssertUnwindSafe(|| cleanups.run())).is_err() {
            warn!(session = ?id, "cleanup action panicked");
        }
    }
    completed
}
