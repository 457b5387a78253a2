//! Stack allocation over recycled blocks for Lifespan.
//!
//! A [`Stack`] hands out nested [`Frame`]s. Each frame is a confined
//! session whose regions are bump-allocated out of fixed-size blocks;
//! closing the topmost frame rewinds the cursor, so the next frame reuses
//! the same blocks instead of asking the system allocator again.
//!
//! # Architecture
//!
//! ```text
//! StackPool (Send + Sync, one Stack per thread)
//! └── Stack (Rc<StackInner>, thread-confined)
//!     ├── backing Session (confined; owns every block)
//!     ├── BlockList → Block[] (block_size bytes, 16-aligned)
//!     ├── offset / pending_start / depth
//!     └── Frame × depth (confined session each, keeps backing alive)
//! ```
//!
//! Only the topmost frame may allocate or close. A stack closes only
//! when no frame is open.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod block;
pub mod config;
pub mod error;
pub mod frame;
pub mod pool;
pub mod stack;

pub use block::{Block, BlockList};
pub use config::StackConfig;
pub use error::StackError;
pub use frame::Frame;
pub use pool::StackPool;
pub use stack::Stack;
