//! Raw memory sources for session-bound allocation.

#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use lifespan_core::SessionError;

/// Build a layout, mapping rejection to [`SessionError::InvalidLayout`].
pub(crate) fn layout_for(size: usize, align: usize) -> Result<Layout, SessionError> {
    Layout::from_size_align(size, align).map_err(|_| SessionError::InvalidLayout { size, align })
}

/// A source of raw, untyped memory.
///
/// Zero-size layouts must succeed with a well-aligned dangling pointer,
/// and releasing one must be a no-op.
pub trait RawAllocator: Send + Sync + 'static {
    /// Allocate a block described by `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, SessionError>;

    /// Return a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](RawAllocator::allocate)
    /// on this allocator with the same `layout`, and must not be released
    /// more than once.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // Alignment is a non-zero power of two, so the address is non-null.
    NonNull::new(ptr::without_provenance_mut(layout.align())).unwrap_or(NonNull::dangling())
}

/// The process's system allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, SessionError> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { System.alloc(layout) };
        NonNull::new(ptr).ok_or(SessionError::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY: guaranteed by the caller.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }
}

/// Wraps another raw allocator and counts what is live.
#[derive(Debug, Default)]
pub struct TrackedAllocator<A = SystemAllocator> {
    inner: A,
    live: AtomicUsize,
    live_bytes: AtomicUsize,
    total: AtomicU64,
}

impl<A: RawAllocator> TrackedAllocator<A> {
    /// Track allocations made through `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            live: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Blocks allocated and not yet released.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Bytes allocated and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Blocks allocated over the allocator's lifetime.
    pub fn total_allocations(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl<A: RawAllocator> RawAllocator for TrackedAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, SessionError> {
        let ptr = self.inner.allocate(layout)?;
        self.live.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(layout.size(), Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(layout.size(), Ordering::AcqRel);
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.release(ptr, layout) };
    }
}
