//! Session-bound allocation from a raw allocator.
//!
//! Each allocation registers its own release as a cleanup of the owning
//! session, so the memory is returned exactly when the session closes.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use lifespan_core::SessionError;
use tracing::trace;

use crate::raw::{layout_for, RawAllocator, SystemAllocator};
use crate::region::{Region, SegmentAllocator};
use crate::session::Session;

/// A raw block in flight to its release cleanup.
struct Block(NonNull<u8>);

// SAFETY: the block is owned by exactly one cleanup action.
unsafe impl Send for Block {}

impl Block {
    fn into_ptr(self) -> NonNull<u8> {
        self.0
    }
}

/// Allocates regions from a [`RawAllocator`] and frees them when their
/// session closes.
pub struct NativeAllocator<R: RawAllocator = SystemAllocator> {
    raw: Arc<R>,
}

impl NativeAllocator<SystemAllocator> {
    /// An allocator backed by the system allocator.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemAllocator))
    }
}

impl<R: RawAllocator> NativeAllocator<R> {
    /// An allocator backed by `raw`.
    pub fn new(raw: Arc<R>) -> Self {
        Self { raw }
    }

    /// The backing raw allocator.
    pub fn raw(&self) -> &Arc<R> {
        &self.raw
    }

    /// Allocate `size` bytes aligned to `align`, bound to `session`.
    ///
    /// The session is checked first, so nothing is allocated for a
    /// closed or foreign session. If the release cannot be registered
    /// the block is freed before returning the error.
    pub fn allocate(&self, session: &Session, size: usize, align: usize) -> Result<Region, SessionError> {
        let layout = layout_for(size, align)?;
        session.check_accessible()?;
        let ptr = self.raw.allocate(layout)?;
        if let Err(rejected) = session.try_register(self.release_action(ptr, layout)) {
            (rejected.action)();
            return Err(rejected.error);
        }
        trace!(session = %session.id(), size, align, "region allocated");
        // SAFETY: `ptr` is valid for `layout` until the registered
        // release runs, which is when `session` closes.
        Ok(unsafe { Region::from_raw_parts(ptr, size, align, session.clone()) })
    }

    fn release_action(&self, ptr: NonNull<u8>, layout: Layout) -> Box<dyn FnOnce() + Send + 'static> {
        let raw = Arc::clone(&self.raw);
        let block = Block(ptr);
        Box::new(move || {
            let ptr = block.into_ptr();
            // SAFETY: allocated by `raw` with `layout`; this action runs
            // at most once.
            unsafe { raw.release(ptr, layout) };
        })
    }
}

impl<R: RawAllocator> Clone for NativeAllocator<R> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
        }
    }
}

impl<R: RawAllocator> fmt::Debug for NativeAllocator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeAllocator")
            .field("raw", &std::any::type_name::<R>())
            .finish()
    }
}

impl SegmentAllocator for Session {
    type Error = SessionError;

    fn allocate(&self, size: usize, align: usize) -> Result<Region, SessionError> {
        NativeAllocator::system().allocate(self, size, align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::TrackedAllocator;

    fn tracked() -> (Arc<TrackedAllocator>, NativeAllocator<TrackedAllocator>) {
        let raw = Arc::new(TrackedAllocator::new(SystemAllocator));
        (Arc::clone(&raw), NativeAllocator::new(raw))
    }

    #[test]
    fn close_frees_every_region() {
        let (raw, alloc) = tracked();
        let session = Session::confined();
        for size in [8, 64, 512] {
            alloc.allocate(&session, size, 8).unwrap();
        }
        assert_eq!(raw.live_allocations(), 3);
        session.close().unwrap();
        assert_eq!(raw.live_allocations(), 0);
        assert_eq!(raw.live_bytes(), 0);
    }

    #[test]
    fn closed_session_allocates_nothing() {
        let (raw, alloc) = tracked();
        let session = Session::shared();
        session.close().unwrap();
        assert!(alloc.allocate(&session, 16, 8).unwrap_err().is_closed());
        assert_eq!(raw.total_allocations(), 0);
    }

    #[test]
    fn invalid_alignment_allocates_nothing() {
        let (raw, alloc) = tracked();
        let session = Session::confined();
        assert_eq!(
            alloc.allocate(&session, 16, 6).unwrap_err(),
            SessionError::InvalidLayout { size: 16, align: 6 }
        );
        assert_eq!(raw.total_allocations(), 0);
    }

    #[test]
    fn zero_size_region_is_accessible_and_empty() {
        let session = Session::confined();
        let region = session.allocate(0, 32).unwrap();
        assert_eq!(region.byte_size(), 0);
        assert_eq!(region.address() % 32, 0);
        assert!(region.to_vec().unwrap().is_empty());
    }

    #[test]
    fn dropped_session_frees_its_regions() {
        let (raw, alloc) = tracked();
        {
            let session = Session::implicit();
            alloc.allocate(&session, 128, 16).unwrap();
            assert_eq!(raw.live_allocations(), 1);
        }
        assert_eq!(raw.live_allocations(), 0);
    }
}
