//! The session handle and its lifecycle state machine.
//!
//! A [`Session`] is a cheap, clonable handle onto one lifetime. Every
//! kind shares the same two-state machine (`OPEN` then `CLOSED`, never
//! back) and the same cleanup list; kinds differ in how access is
//! checked and in how acquire, release and close are implemented:
//!
//! - **Confined**: owner-thread checks, plain acquire count, inline close.
//! - **Structured**: owner or extent-member checks, closed when its
//!   extent ends (see [`crate::structured`]).
//! - **Shared**: any thread; atomic acquire count that doubles as the
//!   close latch; close completes through a [`Closer`].
//! - **Implicit**: shared, but cannot be closed explicitly; its cleanups
//!   are submitted to its closer when the last handle is dropped.
//! - **Global**: always open, cleanups never run.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use lifespan_core::{ExtentId, SessionError, SessionId, SessionKind};
use tracing::{debug, trace, warn};

use crate::closer::{Closer, InlineCloser, PendingClose};
use crate::config::{ConfigError, SessionConfig};
use crate::confined::ConfinedCounts;
use crate::resource::{CleanupAction, Cleanups, ListMode, ResourceList};
use crate::shared::SharedCounts;
use crate::structured::Members;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;

/// Kind-specific bookkeeping.
pub(crate) enum Lifecycle {
    Confined(ConfinedCounts),
    Structured {
        extent: ExtentId,
        members: Arc<Members>,
    },
    Shared(SharedCounts),
    Implicit(SharedCounts),
    Global,
}

pub(crate) struct SessionInner {
    id: SessionId,
    state: AtomicU8,
    resources: ResourceList,
    /// Accesses currently bracketed by [`Session::access`]. Only
    /// maintained for shared and implicit sessions.
    in_flight: AtomicUsize,
    lifecycle: Lifecycle,
}

/// An access bracket on a shared session. Held for the duration of one
/// memory access; the close handshake waits for all of them to drop.
pub(crate) struct AccessGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// A cleanup action that could not be registered, with the reason.
pub(crate) struct Rejected {
    pub(crate) error: SessionError,
    pub(crate) action: CleanupAction,
}

impl SessionInner {
    fn new(lifecycle: Lifecycle) -> Self {
        let mode = match lifecycle {
            Lifecycle::Confined(_) | Lifecycle::Structured { .. } => ListMode::Confined,
            Lifecycle::Shared(_) | Lifecycle::Implicit(_) | Lifecycle::Global => ListMode::Shared,
        };
        Self {
            id: SessionId::next(),
            state: AtomicU8::new(OPEN),
            resources: ResourceList::new(mode),
            in_flight: AtomicUsize::new(0),
            lifecycle,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.load(Ordering::SeqCst) == OPEN
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::SeqCst);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Detach the cleanup chain. Called exactly once, after `CLOSED` was
    /// published and (for shared kinds) after the handshake.
    pub(crate) fn freeze(&self) -> Cleanups {
        self.resources.freeze()
    }

    fn enter(&self) -> Result<AccessGuard<'_>, SessionError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = AccessGuard {
            in_flight: &self.in_flight,
        };
        if self.state.load(Ordering::SeqCst) != OPEN {
            return Err(SessionError::AlreadyClosed { session: self.id });
        }
        Ok(guard)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.resources.is_frozen() {
            return;
        }
        match &self.lifecycle {
            Lifecycle::Global => {}
            Lifecycle::Implicit(counts) => {
                self.mark_closed();
                debug!(session = %self.id, "implicit session unreachable, collecting");
                counts
                    .closer()
                    .close(PendingClose::detached(self.resources.freeze()));
            }
            Lifecycle::Confined(_) | Lifecycle::Shared(_) | Lifecycle::Structured { .. } => {
                self.mark_closed();
                debug!(session = %self.id, "session dropped while open, running cleanups");
                let cleanups = self.resources.freeze();
                if panic::catch_unwind(AssertUnwindSafe(|| cleanups.run())).is_err() {
                    warn!(session = %self.id, "cleanup action panicked during drop");
                }
            }
        }
    }
}

fn default_closer() -> Arc<dyn Closer> {
    static INLINE: OnceLock<Arc<dyn Closer>> = OnceLock::new();
    Arc::clone(INLINE.get_or_init(|| Arc::new(InlineCloser)))
}

/// A handle onto one memory lifetime.
///
/// Clones refer to the same session. Dropping the last handle of a
/// session that was never closed runs its cleanups (implicit sessions
/// hand them to their closer instead), so resources are never leaked by
/// forgetting to call [`close`](Session::close).
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    fn from_lifecycle(lifecycle: Lifecycle) -> Self {
        let inner = Arc::new(SessionInner::new(lifecycle));
        trace!(session = %inner.id, "session created");
        Self { inner }
    }

    /// A new confined session owned by the calling thread.
    pub fn confined() -> Self {
        Self::confined_to(thread::current().id())
    }

    /// A new confined session owned by `owner`.
    pub fn confined_to(owner: ThreadId) -> Self {
        Self::from_lifecycle(Lifecycle::Confined(ConfinedCounts::new(
            owner,
            SessionConfig::MAX_ACQUIRES,
        )))
    }

    /// A new shared session whose close completes inline on the closing
    /// thread.
    pub fn shared() -> Self {
        Self::from_lifecycle(Lifecycle::Shared(SharedCounts::new(
            SessionConfig::MAX_ACQUIRES,
            default_closer(),
        )))
    }

    /// A new implicit session, collected when its last handle is dropped.
    pub fn implicit() -> Self {
        Self::from_lifecycle(Lifecycle::Implicit(SharedCounts::new(
            SessionConfig::MAX_ACQUIRES,
            default_closer(),
        )))
    }

    /// The process-wide global session.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<Session> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Self::from_lifecycle(Lifecycle::Global))
            .clone()
    }

    /// A builder for sessions with a non-default configuration or closer.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub(crate) fn structured(extent: ExtentId, members: Arc<Members>) -> Self {
        Self::from_lifecycle(Lifecycle::Structured { extent, members })
    }

    pub(crate) fn inner(&self) -> &SessionInner {
        &self.inner
    }

    /// Diagnostic identifier.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// This session's kind.
    pub fn kind(&self) -> SessionKind {
        match self.inner.lifecycle {
            Lifecycle::Confined(_) => SessionKind::Confined,
            Lifecycle::Structured { .. } => SessionKind::Structured,
            Lifecycle::Shared(_) => SessionKind::Shared,
            Lifecycle::Implicit(_) => SessionKind::Implicit,
            Lifecycle::Global => SessionKind::Global,
        }
    }

    /// The owner thread of a confined or structured session.
    pub fn owner(&self) -> Option<ThreadId> {
        match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => Some(counts.owner()),
            Lifecycle::Structured { members, .. } => Some(members.owner()),
            _ => None,
        }
    }

    /// The extent that owns a structured session.
    pub fn extent(&self) -> Option<ExtentId> {
        match &self.inner.lifecycle {
            Lifecycle::Structured { extent, .. } => Some(*extent),
            _ => None,
        }
    }

    /// Whether the session is still open.
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Whether an explicit [`close`](Session::close) can succeed for this
    /// kind of session.
    pub fn is_closeable(&self) -> bool {
        self.kind().is_closeable()
    }

    /// Whether `thread` may access this session's memory right now.
    pub fn is_accessible_by(&self, thread: ThreadId) -> bool {
        self.check_accessible_by(thread).is_ok()
    }

    /// Outstanding acquires. Always zero for structured and global
    /// sessions, and for closed shared sessions.
    pub fn acquire_count(&self) -> u32 {
        match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => {
                u32::try_from(counts.outstanding()).unwrap_or(u32::MAX)
            }
            Lifecycle::Shared(counts) | Lifecycle::Implicit(counts) => counts.outstanding(),
            Lifecycle::Structured { .. } | Lifecycle::Global => 0,
        }
    }

    /// Check that the calling thread may access this session's memory.
    pub fn check_accessible(&self) -> Result<(), SessionError> {
        self.check_accessible_by(thread::current().id())
    }

    /// Check that `thread` may access this session's memory.
    ///
    /// Ownership is checked before liveness, so a foreign thread touching
    /// a closed confined session sees `WrongThread`.
    pub fn check_accessible_by(&self, thread: ThreadId) -> Result<(), SessionError> {
        let session = self.inner.id;
        let admitted = match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => counts.owner() == thread,
            Lifecycle::Structured { members, .. } => members.admits(thread),
            Lifecycle::Shared(_) | Lifecycle::Implicit(_) | Lifecycle::Global => true,
        };
        if !admitted {
            return Err(SessionError::WrongThread { session });
        }
        if !self.inner.is_alive() {
            return Err(SessionError::AlreadyClosed { session });
        }
        Ok(())
    }

    /// Run `f` as one memory access. Shared kinds bracket it so that a
    /// concurrent close waits for it before freeing anything.
    pub(crate) fn access<R>(&self, f: impl FnOnce() -> R) -> Result<R, SessionError> {
        match &self.inner.lifecycle {
            Lifecycle::Shared(_) | Lifecycle::Implicit(_) => {
                let _guard = self.inner.enter()?;
                Ok(f())
            }
            _ => {
                self.check_accessible()?;
                Ok(f())
            }
        }
    }

    /// Register `action` to run when this session closes.
    ///
    /// Actions run in reverse registration order, each exactly once. On
    /// the global session the action is accepted and never run. If
    /// registration fails the action is dropped without running.
    pub fn register_cleanup<F>(&self, action: F) -> Result<(), SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_register(Box::new(action))
            .map_err(|rejected| rejected.error)
    }

    /// Register `action`, handing it back on failure so the caller can
    /// dispose of whatever it guards.
    pub(crate) fn try_register(&self, action: CleanupAction) -> Result<(), Rejected> {
        let session = self.inner.id;
        match &self.inner.lifecycle {
            Lifecycle::Global => {
                drop(action);
                return Ok(());
            }
            Lifecycle::Structured { members, .. } => {
                if thread::current().id() != members.owner() {
                    return Err(Rejected {
                        error: SessionError::WrongThread { session },
                        action,
                    });
                }
            }
            _ => {}
        }
        if let Err(error) = self.check_accessible() {
            return Err(Rejected { error, action });
        }
        self.inner.resources.add(action).map_err(|action| Rejected {
            error: SessionError::AlreadyClosed { session },
            action,
        })
    }

    /// Prevent this session from closing until a matching
    /// [`release`](Session::release).
    ///
    /// Structured and global sessions only check accessibility; they
    /// keep no count.
    pub fn acquire(&self) -> Result<(), SessionError> {
        match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => {
                self.check_accessible()?;
                counts.acquire()
            }
            Lifecycle::Structured { .. } => self.check_accessible(),
            Lifecycle::Shared(counts) | Lifecycle::Implicit(counts) => {
                counts.acquire(&self.inner)
            }
            Lifecycle::Global => Ok(()),
        }
    }

    /// Undo one [`acquire`](Session::acquire). May be called from any
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding acquire on a counting session.
    pub fn release(&self) {
        match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => counts.release(self.inner.id),
            Lifecycle::Shared(counts) | Lifecycle::Implicit(counts) => {
                counts.release(&self.inner)
            }
            Lifecycle::Structured { .. } | Lifecycle::Global => {}
        }
    }

    /// Keep `target` open for as long as this session is open.
    ///
    /// Acquires `target` and registers its release as a cleanup of this
    /// session. If the registration fails the acquire is undone.
    pub fn keep_alive(&self, target: &Session) -> Result<(), SessionError> {
        target.acquire()?;
        let held = target.clone();
        if let Err(rejected) = self.try_register(Box::new(move || held.release())) {
            (rejected.action)();
            return Err(rejected.error);
        }
        trace!(session = %self.id(), target = %target.id(), "keep-alive registered");
        Ok(())
    }

    /// Close the session and run its cleanups.
    ///
    /// Only confined and shared sessions can be closed explicitly. A
    /// shared close returns once its closer has completed the close; with
    /// the inline closer that means the cleanups have run.
    pub fn close(&self) -> Result<(), SessionError> {
        let session = self.inner.id;
        match &self.inner.lifecycle {
            Lifecycle::Confined(counts) => {
                if thread::current().id() != counts.owner() {
                    return Err(SessionError::WrongThread { session });
                }
                if !self.inner.is_alive() {
                    return Err(SessionError::AlreadyClosed { session });
                }
                let outstanding = counts.outstanding();
                if outstanding > 0 {
                    return Err(SessionError::StillAcquired {
                        session,
                        count: u32::try_from(outstanding).unwrap_or(u32::MAX),
                    });
                }
                self.inner.mark_closed();
                debug!(session = %session, kind = "confined", "session closed");
                self.inner.freeze().run();
                Ok(())
            }
            Lifecycle::Shared(counts) => counts.close(self),
            Lifecycle::Structured { .. } | Lifecycle::Implicit(_) | Lifecycle::Global => {
                Err(SessionError::NotCloseable {
                    session,
                    kind: self.kind(),
                })
            }
        }
    }

    /// Close a structured session at the end of its extent.
    pub(crate) fn close_structured(&self) {
        if !self.inner.is_alive() {
            return;
        }
        self.inner.mark_closed();
        debug!(session = %self.inner.id, "structured extent ended");
        self.inner.freeze().run();
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Builder for sessions with a custom acquire limit or closer.
///
/// ```
/// use lifespan_session::{Session, SessionKind};
///
/// let session = Session::builder().max_acquires(4).shared().unwrap();
/// assert_eq!(session.kind(), SessionKind::Shared);
/// ```
#[derive(Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    closer: Option<Arc<dyn Closer>>,
}

impl SessionBuilder {
    /// A builder with the default configuration and the inline closer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of outstanding acquires.
    pub fn max_acquires(mut self, limit: u32) -> Self {
        self.config.max_acquires = limit;
        self
    }

    /// Complete shared closes and implicit collection through `closer`.
    /// Ignored for confined sessions, which always close inline.
    pub fn closer(mut self, closer: Arc<dyn Closer>) -> Self {
        self.closer = Some(closer);
        self
    }

    /// Build a confined session owned by the calling thread.
    pub fn confined(self) -> Result<Session, ConfigError> {
        self.confined_to(thread::current().id())
    }

    /// Build a confined session owned by `owner`.
    pub fn confined_to(self, owner: ThreadId) -> Result<Session, ConfigError> {
        self.config.validate()?;
        Ok(Session::from_lifecycle(Lifecycle::Confined(
            ConfinedCounts::new(owner, self.config.max_acquires),
        )))
    }

    /// Build a shared session.
    pub fn shared(self) -> Result<Session, ConfigError> {
        let counts = self.shared_counts()?;
        Ok(Session::from_lifecycle(Lifecycle::Shared(counts)))
    }

    /// Build an implicit session.
    pub fn implicit(self) -> Result<Session, ConfigError> {
        let counts = self.shared_counts()?;
        Ok(Session::from_lifecycle(Lifecycle::Implicit(counts)))
    }

    fn shared_counts(self) -> Result<SharedCounts, ConfigError> {
        self.config.validate()?;
        let closer = self.closer.unwrap_or_else(default_closer);
        Ok(SharedCounts::new(self.config.max_acquires, closer))
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("custom_closer", &self.closer.is_some())
            .finish()
    }
}
