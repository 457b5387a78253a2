//! A thread-confined stack of nested allocation frames.
//!
//! A [`Stack`] owns a list of fixed-size blocks and a bump cursor
//! (`offset`) running across their logical concatenation. Each
//! [`push`](Stack::push) opens a [`Frame`]: a confined session that
//! carves slices out of the blocks starting at the cursor. Only the
//! topmost frame may allocate or close; closing it rewinds the cursor to
//! where the frame began, so the next frame reuses the same memory
//! without touching the system allocator.
//!
//! ```text
//! block 0               block 1               block 2
//! [F1 ....|F2 ...  pad ][F2 ..|F3 .....     ][ (not yet allocated)
//!                              ^pending_start ^offset
//! ```
//!
//! The blocks are allocated from a confined backing session owned by the
//! stack. Every frame session keeps the backing session alive, so block
//! memory outlives every open frame even if the stack handle is dropped
//! first.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use lifespan_core::SessionError;
use lifespan_session::{Region, Session};
use tracing::{debug, warn};

use crate::block::BlockList;
use crate::config::StackConfig;
use crate::error::StackError;
use crate::frame::Frame;

pub(crate) struct StackInner {
    config: StackConfig,
    session: Session,
    blocks: RefCell<BlockList>,
    offset: Cell<usize>,
    /// Start offset of the topmost open frame; `None` when no frame is
    /// open and the stack is closeable.
    pending_start: Cell<Option<usize>>,
    depth: Cell<usize>,
}

impl StackInner {
    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset.get()
    }

    pub(crate) fn pending_start(&self) -> Option<usize> {
        self.pending_start.get()
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Rewind to the state saved by a frame's push.
    pub(crate) fn restore(&self, offset: usize, pending_start: Option<usize>, depth: usize) {
        self.offset.set(offset);
        self.pending_start.set(pending_start);
        self.depth.set(depth);
    }

    /// Carve the next `size`-byte slice aligned to `align` and re-bind it
    /// to `frame_session`.
    ///
    /// Tries the block under the cursor first; if the slice does not fit,
    /// skips to the start of the next block (allocating it if needed) and
    /// retries.
    pub(crate) fn next_slice(
        &self,
        size: usize,
        align: usize,
        frame_session: &Session,
    ) -> Result<Region, StackError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(SessionError::InvalidLayout { size, align }.into());
        }
        let block_size = self.config.block_size;
        let mut blocks = self.blocks.borrow_mut();
        loop {
            let offset = self.offset.get();
            let index = offset / block_size;
            let within = offset % block_size;
            let block = blocks.get_or_allocate(index, &self.session)?;
            if let Some(start) = block.try_slice(within, size, align) {
                self.offset.set(offset + (start - within) + size);
                // SAFETY: the block belongs to the backing session, which
                // `frame_session` keeps alive until it closes; slices of
                // open frames never overlap because only the topmost
                // frame advances the cursor.
                let region = unsafe { block.region().reinterpret(start, size, align, frame_session.clone()) }?;
                return Ok(region);
            }
            let worst_case = size.checked_add(align - 1);
            if within == 0 || worst_case.is_none_or(|n| n > block_size) {
                return Err(StackError::AllocationTooLarge {
                    requested: size,
                    align,
                    block_size,
                });
            }
            self.offset.set(offset + (block_size - within));
        }
    }
}

impl Drop for StackInner {
    fn drop(&mut self) {
        if !self.session.is_alive() {
            return;
        }
        if self.pending_start.get().is_some() {
            warn!(
                session = %self.session.id(),
                depth = self.depth.get(),
                "stack dropped with frames open"
            );
            return;
        }
        if let Err(e) = self.session.close() {
            warn!(session = %self.session.id(), error = %e, "stack backing session did not close");
        }
    }
}

/// A thread-confined stack allocator.
///
/// `Stack` is neither `Send` nor `Sync`: it and its frames belong to the
/// thread that created it. Clones are handles to the same stack.
#[derive(Clone)]
pub struct Stack {
    inner: Rc<StackInner>,
}

impl Stack {
    /// A new, empty stack. No block is allocated until the first frame
    /// allocates.
    pub fn new(config: StackConfig) -> Result<Self, StackError> {
        config.validate()?;
        let session = Session::confined();
        debug!(
            session = %session.id(),
            block_size = config.block_size,
            capacity = ?config.capacity,
            "stack created"
        );
        Ok(Self {
            inner: Rc::new(StackInner {
                blocks: RefCell::new(BlockList::new(&config)),
                config,
                session,
                offset: Cell::new(0),
                pending_start: Cell::new(None),
                depth: Cell::new(0),
            }),
        })
    }

    /// A new unbounded stack with the given block size.
    pub fn with_block_size(block_size: usize) -> Result<Self, StackError> {
        Self::new(StackConfig::with_block_size(block_size))
    }

    /// Open a new topmost frame.
    ///
    /// The previous topmost frame (if any) can neither allocate nor close
    /// until the returned frame is closed.
    pub fn push(&self) -> Result<Frame, StackError> {
        self.inner.session.check_accessible()?;
        let frame = Frame::open(Rc::clone(&self.inner))?;
        self.inner.pending_start.set(Some(frame.start_offset()));
        self.inner.depth.set(frame.depth());
        Ok(frame)
    }

    /// Release every block. Fails with [`StackError::FramesOpen`] while a
    /// frame is open.
    pub fn close(&self) -> Result<(), StackError> {
        self.inner.session.check_accessible()?;
        if self.inner.pending_start.get().is_some() {
            return Err(StackError::FramesOpen);
        }
        self.inner.session.close()?;
        debug!(
            session = %self.inner.session.id(),
            blocks = self.block_count(),
            "stack closed"
        );
        Ok(())
    }

    /// Bump cursor across all blocks, in bytes.
    pub fn offset(&self) -> usize {
        self.inner.offset()
    }

    /// Start offset of the topmost open frame, if any.
    pub fn pending_start(&self) -> Option<usize> {
        self.inner.pending_start()
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.inner.depth()
    }

    /// Blocks allocated so far.
    pub fn block_count(&self) -> usize {
        self.inner.blocks.borrow().len()
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.inner.config.block_size
    }

    /// The configuration this stack was built with.
    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    /// Whether the stack has not been closed.
    pub fn is_open(&self) -> bool {
        self.inner.session.is_alive()
    }

    /// The backing session that owns the blocks.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("block_size", &self.block_size())
            .field("blocks", &self.block_count())
            .field("offset", &self.offset())
            .field("pending_start", &self.pending_start())
            .field("depth", &self.depth())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stack_is_empty_and_open() {
        let stack = Stack::with_block_size(64).unwrap();
        assert!(stack.is_open());
        assert_eq!(stack.offset(), 0);
        assert_eq!(stack.pending_start(), None);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.block_count(), 0);
        stack.close().unwrap();
        assert!(!stack.is_open());
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(matches!(
            Stack::with_block_size(0),
            Err(StackError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn push_on_closed_stack_fails() {
        let stack = Stack::new(StackConfig::default()).unwrap();
        stack.close().unwrap();
        assert!(stack.push().unwrap_err().is_closed());
        assert!(stack.close().unwrap_err().is_closed());
    }

    #[test]
    fn close_with_open_frame_fails() {
        let stack = Stack::with_block_size(40).unwrap();
        let frame = stack.push().unwrap();
        assert_eq!(stack.close(), Err(StackError::FramesOpen));
        frame.close().unwrap();
        stack.close().unwrap();
    }

    #[test]
    fn slices_skip_to_the_next_block() {
        let stack = Stack::with_block_size(40).unwrap();
        let frame = stack.push().unwrap();
        frame.allocate(30, 1).unwrap();
        assert_eq!(stack.offset(), 30);
        frame.allocate(16, 8).unwrap();
        assert_eq!(stack.offset(), 56);
        assert_eq!(stack.block_count(), 2);
        frame.close().unwrap();
        assert_eq!(stack.offset(), 0);
        assert_eq!(stack.block_count(), 2);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let stack = Stack::with_block_size(40).unwrap();
        let frame = stack.push().unwrap();
        frame.allocate(1, 1).unwrap();
        // 36 bytes fit an empty block, but not with 7 bytes of padding.
        assert_eq!(
            frame.allocate(36, 8).unwrap_err(),
            StackError::AllocationTooLarge {
                requested: 36,
                align: 8,
                block_size: 40,
            }
        );
        assert!(matches!(
            frame.allocate(41, 1),
            Err(StackError::AllocationTooLarge { requested: 41, .. })
        ));
        assert_eq!(
            frame.allocate(8, 3).unwrap_err(),
            StackError::Session(SessionError::InvalidLayout { size: 8, align: 3 })
        );
        frame.allocate(40, 1).unwrap();
    }

    #[test]
    fn capacity_exhaustion_is_out_of_capacity() {
        let stack = Stack::new(StackConfig::with_block_size(16).capacity(2)).unwrap();
        let frame = stack.push().unwrap();
        frame.allocate(16, 1).unwrap();
        frame.allocate(16, 1).unwrap();
        assert_eq!(
            frame.allocate(1, 1).unwrap_err(),
            StackError::OutOfCapacity { capacity: 2 }
        );
    }

    #[test]
    fn dropping_stack_with_no_frames_releases_blocks() {
        let stack = Stack::with_block_size(32).unwrap();
        let backing = stack.session().clone();
        {
            let frame = stack.push().unwrap();
            frame.allocate(8, 8).unwrap();
        }
        drop(stack);
        assert!(!backing.is_alive());
    }

    #[test]
    fn frames_keep_blocks_alive_after_stack_handle_drops() {
        let stack = Stack::with_block_size(32).unwrap();
        let backing = stack.session().clone();
        let frame = stack.push().unwrap();
        let mut region = frame.allocate(8, 8).unwrap();
        drop(stack);
        assert!(backing.is_alive());
        region.write_bytes(0, &[1; 8]).unwrap();
        assert_eq!(region.to_vec().unwrap(), vec![1; 8]);
        frame.close().unwrap();
        drop(frame);
        drop(region);
        assert!(!backing.is_alive());
    }
}
