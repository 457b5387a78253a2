//! Benchmark workloads for the Lifespan framework.
//!
//! Each workload is a plain function so that the criterion benches and
//! the tests below drive exactly the same code:
//!
//! - [`confined_churn`]: open, allocate into, and close confined sessions
//! - [`shared_churn`]: the same through shared sessions and a [`Closer`]
//! - [`frame_churn`]: push, fill, and pop stack frames
//!
//! Every workload cycles through [`ALLOC_SIZES`].

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;
use std::sync::Arc;

use lifespan_arena::{Stack, StackError};
use lifespan_session::{Closer, SegmentAllocator, Session, SessionError};

/// Request sizes cycled through by every workload. Each size doubles as
/// its alignment.
pub const ALLOC_SIZES: [usize; 4] = [8, 16, 32, 64];

/// Open `sessions` confined sessions, make `allocs` allocations in each,
/// then close it. Returns the number of bytes handed out.
pub fn confined_churn(sessions: usize, allocs: usize) -> Result<usize, SessionError> {
    let mut bytes = 0;
    for _ in 0..sessions {
        let session = Session::confined();
        bytes += fill(&session, allocs)?;
        session.close()?;
    }
    Ok(bytes)
}

/// Like [`confined_churn`], but through shared sessions whose closes are
/// completed by `closer`.
pub fn shared_churn(
    closer: &Arc<dyn Closer>,
    sessions: usize,
    allocs: usize,
) -> Result<usize, Box<dyn Error>> {
    let builder = Session::builder().closer(Arc::clone(closer));
    let mut bytes = 0;
    for _ in 0..sessions {
        let session = builder.clone().shared()?;
        bytes += fill(&session, allocs)?;
        session.close()?;
    }
    Ok(bytes)
}

/// Push `frames` frames on `stack` one after another, make `allocs`
/// allocations in each, then close it.
pub fn frame_churn(stack: &Stack, frames: usize, allocs: usize) -> Result<usize, StackError> {
    let mut bytes = 0;
    for _ in 0..frames {
        let frame = stack.push()?;
        bytes += fill(&frame, allocs)?;
        frame.close()?;
    }
    Ok(bytes)
}

fn fill<A: SegmentAllocator>(alloc: &A, allocs: usize) -> Result<usize, A::Error> {
    let mut bytes = 0;
    for size in ALLOC_SIZES.iter().copied().cycle().take(allocs) {
        let region = alloc.allocate(size, size)?;
        bytes += region.byte_size();
    }
    Ok(bytes)
}
