//! Core types for the Lifespan memory-lifetime framework.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other Lifespan crate: identifiers for
//! sessions, structured extents and stack pools, the closed set of
//! [`SessionKind`]s, and the [`SessionError`] taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod kind;

pub use error::SessionError;
pub use id::{ExtentId, PoolId, SessionId};
pub use kind::SessionKind;
