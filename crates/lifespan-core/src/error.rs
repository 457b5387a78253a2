//! Error types for session lifetime management.
//!
//! All conditions here are expected runtime failures that are surfaced
//! synchronously to the caller; none is retried by the library itself.
//! Broken caller invariants (double release, double freeze of a cleanup
//! list) are not represented: they panic.

use std::error::Error;
use std::fmt;

use crate::id::SessionId;
use crate::kind::SessionKind;

/// Errors from session operations: access checks, cleanup registration,
/// acquire/release, close, and raw allocation against a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// The session is closed (or is closing) and can no longer be
    /// accessed, acquired, closed, or given new cleanups.
    AlreadyClosed {
        /// The closed session.
        session: SessionId,
    },
    /// A confined or structured session was touched from a thread that
    /// neither owns it nor belongs to its extent.
    WrongThread {
        /// The session that refused the access.
        session: SessionId,
    },
    /// Close was refused because other sessions still hold acquires on
    /// this one. The caller may retry once they release.
    StillAcquired {
        /// The session that could not be closed.
        session: SessionId,
        /// Outstanding acquires observed at the time of the attempt.
        count: u32,
    },
    /// Explicit close is not supported for this kind of session.
    NotCloseable {
        /// The session that refused to close.
        session: SessionId,
        /// Its kind (structured, implicit, or global).
        kind: SessionKind,
    },
    /// Too many simultaneous acquirers.
    OutOfCapacity {
        /// The configured maximum number of outstanding acquires.
        limit: u32,
    },
    /// Size/alignment pair rejected (alignment must be a non-zero power
    /// of two and the size must fit a `Layout`).
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The raw allocator could not satisfy the request.
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// A region access fell outside the region's extent.
    OutOfBounds {
        /// Start offset of the access.
        offset: usize,
        /// Length of the access in bytes.
        len: usize,
        /// Size of the region in bytes.
        size: usize,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyClosed { session } => write!(f, "session {session} already closed"),
            Self::WrongThread { session } => {
                write!(f, "session {session} accessed outside its owner thread")
            }
            Self::StillAcquired { session, count } => {
                write!(f, "session {session} is acquired by {count} clients")
            }
            Self::NotCloseable { session, kind } => {
                write!(f, "{kind} session {session} cannot be closed explicitly")
            }
            Self::OutOfCapacity { limit } => {
                write!(f, "session acquire limit reached ({limit} outstanding)")
            }
            Self::InvalidLayout { size, align } => {
                write!(f, "invalid layout: size {size}, alignment {align}")
            }
            Self::AllocationFailed { size, align } => {
                write!(f, "allocation of {size} bytes (alignment {align}) failed")
            }
            Self::OutOfBounds { offset, len, size } => {
                write!(
                    f,
                    "access of {len} bytes at offset {offset} is out of bounds for region of {size} bytes"
                )
            }
        }
    }
}

impl Error for SessionError {}

impl SessionError {
    /// Whether this error means the session is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed { .. })
    }
}
