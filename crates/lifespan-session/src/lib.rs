//! Memory sessions for Lifespan.
//!
//! A [`Session`] controls the lifetime of the memory and other resources
//! attached to it. While a session is open, memory allocated against it
//! is accessible (subject to the session's threading discipline); once
//! it closes, every registered cleanup runs exactly once, newest first,
//! and every further access fails.
//!
//! # Architecture
//!
//! ```text
//! Session (Arc<SessionInner>)
//! ├── state: OPEN → CLOSED
//! ├── ResourceList (LIFO cleanups, frozen on close)
//! └── Lifecycle
//!     ├── Confined   owner-only count, inline close
//!     ├── Structured extent members, closed by `scope`
//!     ├── Shared     CAS count + close latch → Closer
//!     ├── Implicit   shared, collected on last drop → Closer
//!     └── Global     never closes
//! ```
//!
//! Shared closes are completed by a [`Closer`]: [`InlineCloser`] on the
//! calling thread, or [`DeferredCloser`] on a batching worker.
//! [`NativeAllocator`] hands out [`Region`]s whose memory is released by
//! a cleanup on the owning session.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod closer;
pub mod config;
mod confined;
pub mod deferred;
pub mod native;
pub mod raw;
pub mod region;
mod resource;
pub mod session;
mod shared;
pub mod structured;

pub use closer::{close_batch, Closer, InlineCloser, PendingClose};
pub use config::{CloserConfig, ConfigError, SessionConfig};
pub use deferred::{CloserMetrics, DeferredCloser};
pub use lifespan_core::{ExtentId, PoolId, SessionError, SessionId, SessionKind};
pub use native::NativeAllocator;
pub use raw::{RawAllocator, SystemAllocator, TrackedAllocator};
pub use region::{Region, SegmentAllocator};
pub use resource::CleanupAction;
pub use session::{Session, SessionBuilder};
pub use structured::{scope, Extent};
