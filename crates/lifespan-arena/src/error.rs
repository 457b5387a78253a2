//! Stack-allocator error types.

use std::error::Error;
use std::fmt;

use lifespan_core::SessionError;

/// Errors that can occur during stack operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackError {
    /// The frame, the stack, or its backing session refused the
    /// operation (closed, wrong thread, still acquired, bad layout).
    Session(SessionError),
    /// A frame operation was attempted on a frame that is not the
    /// topmost open frame of its stack.
    NotTopFrame,
    /// The stack cannot be closed while a frame is open.
    FramesOpen,
    /// The request can never fit in one block.
    AllocationTooLarge {
        /// Requested size in bytes.
        requested: usize,
        /// Requested alignment in bytes.
        align: usize,
        /// The stack's block size in bytes.
        block_size: usize,
    },
    /// The stack already holds its maximum number of blocks.
    OutOfCapacity {
        /// The configured block-count cap.
        capacity: u32,
    },
    /// A [`StackConfig`](crate::StackConfig) failed validation.
    InvalidConfig {
        /// What was wrong.
        reason: &'static str,
    },
    /// The calling thread is exiting and its pooled stack is gone.
    ThreadExiting,
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(e) => write!(f, "{e}"),
            Self::NotTopFrame => write!(f, "frame is not the topmost frame of its stack"),
            Self::FramesOpen => write!(f, "cannot close stack while a frame is in use"),
            Self::AllocationTooLarge {
                requested,
                align,
                block_size,
            } => write!(
                f,
                "allocation of {requested} bytes (alignment {align}) exceeds block size {block_size}"
            ),
            Self::OutOfCapacity { capacity } => {
                write!(f, "stack capacity of {capacity} blocks exhausted")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid stack config: {reason}"),
            Self::ThreadExiting => write!(f, "thread-local stack pool is unavailable"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for StackError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl StackError {
    /// Whether this error means a session involved is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_closed())
    }
}
