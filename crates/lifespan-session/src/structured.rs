//! Structured sessions: lifetimes bound to a lexical extent.
//!
//! [`scope`] opens an extent, creates its structured session, runs the
//! body, and closes the session when the body returns or unwinds. The
//! session is accessible from the thread that opened the extent and from
//! every thread spawned through [`Extent::spawn`] while that thread
//! runs. It cannot be closed explicitly, and only the owner may register
//! cleanups.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, Scope, ScopedJoinHandle, ThreadId};

use lifespan_core::ExtentId;
use tracing::trace;

use crate::session::Session;

/// The set of threads admitted to a structured session.
pub(crate) struct Members {
    owner: ThreadId,
    threads: Mutex<Vec<ThreadId>>,
}

impl Members {
    fn new(owner: ThreadId) -> Self {
        Self {
            owner,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    pub(crate) fn admits(&self, thread: ThreadId) -> bool {
        thread == self.owner
            || self
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&thread)
    }

    fn join(&self, thread: ThreadId) {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(thread);
    }

    fn leave(&self, thread: ThreadId) {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = threads.iter().position(|t| *t == thread) {
            threads.swap_remove(pos);
        }
    }
}

/// Extent membership of the current thread, revoked on drop.
struct Membership {
    members: Arc<Members>,
    thread: ThreadId,
}

impl Membership {
    fn enter(members: Arc<Members>) -> Self {
        let thread = thread::current().id();
        members.join(thread);
        Self { members, thread }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.members.leave(self.thread);
    }
}

/// Closes the extent's session on every exit path, including unwinding.
struct CloseOnExit(Session);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close_structured();
    }
}

/// A live structured extent. Handed to the body of [`scope`].
pub struct Extent<'scope, 'env: 'scope> {
    id: ExtentId,
    scope: &'scope Scope<'scope, 'env>,
    session: Session,
    members: Arc<Members>,
}

impl<'scope, 'env> Extent<'scope, 'env> {
    /// This extent's identifier.
    pub fn id(&self) -> ExtentId {
        self.id
    }

    /// The structured session owned by this extent.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Spawn a member thread. The thread may access the extent's session
    /// until `f` returns; the extent does not end before it is joined.
    pub fn spawn<F, T>(&self, f: F) -> ScopedJoinHandle<'scope, T>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        let members = Arc::clone(&self.members);
        self.scope.spawn(move || {
            let _membership = Membership::enter(members);
            f()
        })
    }
}

impl fmt::Debug for Extent<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extent")
            .field("id", &self.id)
            .field("session", &self.session)
            .finish()
    }
}

/// Run `body` inside a new structured extent.
///
/// The extent's session is closed, and its cleanups run, after `body`
/// returns and every thread spawned through the extent has been joined.
///
/// ```
/// let value = lifespan_session::scope(|extent| {
///     let session = extent.session().clone();
///     let worker = extent.spawn(move || session.check_accessible().is_ok());
///     worker.join().unwrap()
/// });
/// assert!(value);
/// ```
pub fn scope<'env, F, R>(body: F) -> R
where
    F: for<'scope> FnOnce(&Extent<'scope, 'env>) -> R,
{
    let id = ExtentId::next();
    let members = Arc::new(Members::new(thread::current().id()));
    let session = Session::structured(id, Arc::clone(&members));
    trace!(extent = %id, session = %session.id(), "extent opened");
    let _close = CloseOnExit(session.clone());
    thread::scope(|s| {
        let extent = Extent {
            id,
            scope: s,
            session,
            members,
        };
        body(&extent)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifespan_core::{SessionError, SessionKind};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn session_is_closed_after_extent() {
        let ran = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&ran);
        let session = scope(|extent| {
            let s = extent.session().clone();
            assert_eq!(s.kind(), SessionKind::Structured);
            assert_eq!(s.extent(), Some(extent.id()));
            s.register_cleanup(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            s
        });
        assert!(!session.is_alive());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_close_is_refused() {
        scope(|extent| {
            let s = extent.session();
            assert_eq!(
                s.close(),
                Err(SessionError::NotCloseable {
                    session: s.id(),
                    kind: SessionKind::Structured,
                })
            );
            assert!(s.is_alive());
        });
    }

    #[test]
    fn member_threads_may_access_but_not_register() {
        scope(|extent| {
            let s = extent.session().clone();
            let (access, register) = extent
                .spawn(move || (s.check_accessible(), s.register_cleanup(|| {})))
                .join()
                .unwrap();
            assert!(access.is_ok());
            assert!(matches!(register, Err(SessionError::WrongThread { .. })));
        });
    }

    #[test]
    fn outside_threads_are_rejected() {
        scope(|extent| {
            let s = extent.session().clone();
            let result = thread::spawn(move || s.check_accessible())
                .join()
                .unwrap();
            assert!(matches!(result, Err(SessionError::WrongThread { .. })));
        });
    }

    #[test]
    fn membership_ends_with_the_member_thread() {
        scope(|extent| {
            let handle = extent.spawn(|| thread::current().id());
            let member = handle.join().unwrap();
            assert!(!extent.session().is_accessible_by(member));
        });
    }

    #[test]
    fn unwinding_body_still_closes() {
        let ran = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&ran);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            scope(|extent| {
                extent
                    .session()
                    .register_cleanup(move || {
                        r.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                panic!("body failed");
            })
        }));
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
