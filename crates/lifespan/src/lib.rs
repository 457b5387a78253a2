//! Lifespan: explicit, session-scoped lifetimes for raw memory.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Lifespan sub-crates. For most users, adding `lifespan` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use lifespan::prelude::*;
//!
//! // A confined session: only this thread may touch it.
//! let session = Session::confined();
//! let mut region = session.allocate(16, 8).unwrap();
//! region.write_bytes(0, b"lifespan").unwrap();
//!
//! // A shared root outlives the confined session that depends on it.
//! let root = Session::shared();
//! session.keep_alive(&root).unwrap();
//! assert!(root.close().is_err());
//!
//! session.close().unwrap();
//! assert!(region.to_vec().unwrap_err().is_closed());
//! root.close().unwrap();
//!
//! // A stack recycles its blocks across frames.
//! let stack = Stack::new(StackConfig::with_block_size(256)).unwrap();
//! let frame = stack.push().unwrap();
//! frame.allocate(64, 16).unwrap();
//! frame.close().unwrap();
//! assert_eq!(stack.offset(), 0);
//! stack.close().unwrap();
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the
//! prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `lifespan-core` | IDs, session kinds, `SessionError` |
//! | [`session`] | `lifespan-session` | Sessions, closers, regions, allocators |
//! | [`arena`] | `lifespan-arena` | Stacks, frames, blocks, stack pools |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers, session kinds and the session error taxonomy
/// (`lifespan-core`).
pub use lifespan_core as types;

/// Sessions and everything attached to them (`lifespan-session`).
///
/// Create sessions with [`session::Session`] or
/// [`session::SessionBuilder`], close shared sessions in batches with
/// [`session::DeferredCloser`], and run structured extents with
/// [`session::scope`].
pub use lifespan_session as session;

/// The block-recycling stack allocator (`lifespan-arena`).
///
/// [`arena::Stack`] for a single thread, [`arena::StackPool`] for one
/// stack per thread.
pub use lifespan_arena as arena;

/// Common imports for typical Lifespan usage.
///
/// ```rust
/// use lifespan::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use lifespan_core::{SessionError, SessionId, SessionKind};

    // Sessions
    pub use lifespan_session::{
        scope, Closer, CloserConfig, DeferredCloser, Extent, Region, SegmentAllocator, Session,
        SessionBuilder, SessionConfig,
    };

    // Stack allocation
    pub use lifespan_arena::{Frame, Stack, StackConfig, StackError, StackPool};
}
