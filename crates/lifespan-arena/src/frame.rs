//! Nested allocation frames of a [`Stack`](crate::Stack).

use std::fmt;
use std::rc::Rc;

use lifespan_session::{Region, SegmentAllocator, Session};
use tracing::{trace, warn};

use crate::error::StackError;
use crate::stack::StackInner;

/// One nested allocation scope of a stack.
///
/// A frame is a confined session whose regions are carved out of the
/// stack's blocks. It may allocate and close only while it is the
/// topmost open frame; closing it rewinds the stack to where the frame
/// began. Dropping the topmost frame closes it.
pub struct Frame {
    stack: Rc<StackInner>,
    session: Session,
    start_offset: usize,
    prev_pending: Option<usize>,
    depth: usize,
}

impl Frame {
    /// Snapshot the stack's cursor into a new frame. The caller marks the
    /// frame as pending.
    pub(crate) fn open(stack: Rc<StackInner>) -> Result<Self, StackError> {
        let session = Session::confined();
        session.keep_alive(stack.session())?;
        let frame = Self {
            start_offset: stack.offset(),
            prev_pending: stack.pending_start(),
            depth: stack.depth() + 1,
            session,
            stack,
        };
        trace!(
            session = %frame.session.id(),
            start = frame.start_offset,
            depth = frame.depth,
            "frame pushed"
        );
        Ok(frame)
    }

    /// The frame's own session. Its regions are invalid once it closes.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Stack offset at which this frame began.
    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// Nesting depth; the first frame pushed on a stack has depth 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this frame is open and is the topmost frame of its stack.
    pub fn is_top(&self) -> bool {
        self.session.is_alive()
            && self.stack.pending_start() == Some(self.start_offset)
            && self.stack.depth() == self.depth
    }

    fn check_top(&self) -> Result<(), StackError> {
        self.session.check_accessible()?;
        if !self.is_top() {
            return Err(StackError::NotTopFrame);
        }
        Ok(())
    }

    /// Carve `size` bytes aligned to `align` out of the stack.
    pub fn allocate(&self, size: usize, align: usize) -> Result<Region, StackError> {
        self.check_top()?;
        self.stack.next_slice(size, align, &self.session)
    }

    /// Close this frame and rewind the stack.
    pub fn close(&self) -> Result<(), StackError> {
        self.check_top()?;
        self.session.close()?;
        self.stack
            .restore(self.start_offset, self.prev_pending, self.depth - 1);
        trace!(session = %self.session.id(), depth = self.depth, "frame closed");
        Ok(())
    }
}

impl SegmentAllocator for Frame {
    type Error = StackError;

    fn allocate(&self, size: usize, align: usize) -> Result<Region, StackError> {
        Frame::allocate(self, size, align)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if !self.session.is_alive() {
            return;
        }
        if !self.is_top() {
            warn!(
                session = %self.session.id(),
                depth = self.depth,
                "frame dropped while not topmost; its memory stays reserved"
            );
            return;
        }
        if let Err(e) = self.close() {
            warn!(session = %self.session.id(), error = %e, "frame did not close on drop");
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("session", &self.session.id())
            .field("start_offset", &self.start_offset)
            .field("depth", &self.depth)
            .field("top", &self.is_top())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stack;

    #[test]
    fn only_the_top_frame_may_act() {
        let stack = Stack::with_block_size(64).unwrap();
        let f1 = stack.push().unwrap();
        let f2 = stack.push().unwrap();
        assert!(!f1.is_top());
        assert!(f2.is_top());
        assert_eq!(f1.allocate(8, 8).unwrap_err(), StackError::NotTopFrame);
        assert_eq!(f1.close().unwrap_err(), StackError::NotTopFrame);
        f2.close().unwrap();
        assert!(f1.is_top());
        f1.allocate(8, 8).unwrap();
        f1.close().unwrap();
    }

    #[test]
    fn back_to_back_pushes_are_ordered_by_depth() {
        let stack = Stack::with_block_size(64).unwrap();
        let f1 = stack.push().unwrap();
        let f2 = stack.push().unwrap();
        assert_eq!(f1.start_offset(), f2.start_offset());
        assert_eq!((f1.depth(), f2.depth()), (1, 2));
        assert_eq!(f1.close().unwrap_err(), StackError::NotTopFrame);
        f2.close().unwrap();
        f1.close().unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn closed_frame_regions_are_inaccessible() {
        let stack = Stack::with_block_size(64).unwrap();
        let frame = stack.push().unwrap();
        let mut region = frame.allocate(16, 8).unwrap();
        region.write_bytes(0, &[9; 16]).unwrap();
        assert_eq!(region.session(), frame.session());
        frame.close().unwrap();
        assert!(region.to_vec().unwrap_err().is_closed());
        assert!(frame.allocate(1, 1).unwrap_err().is_closed());
        assert!(frame.close().unwrap_err().is_closed());
    }

    #[test]
    fn next_frame_reuses_the_same_memory() {
        let stack = Stack::with_block_size(64).unwrap();
        let first = {
            let frame = stack.push().unwrap();
            frame.allocate(32, 8).unwrap().address()
        };
        let frame = stack.push().unwrap();
        assert_eq!(frame.allocate(32, 8).unwrap().address(), first);
        assert_eq!(stack.block_count(), 1);
    }

    #[test]
    fn dropping_top_frame_rewinds_the_stack() {
        let stack = Stack::with_block_size(64).unwrap();
        {
            let frame = stack.push().unwrap();
            frame.allocate(24, 8).unwrap();
            assert_eq!(stack.offset(), 24);
        }
        assert_eq!(stack.offset(), 0);
        assert_eq!(stack.pending_start(), None);
        stack.close().unwrap();
    }

    #[test]
    fn zeroed_allocation_through_the_trait() {
        let stack = Stack::with_block_size(64).unwrap();
        let frame = stack.push().unwrap();
        let mut dirty = frame.allocate(16, 8).unwrap();
        dirty.fill(0xAB).unwrap();
        frame.close().unwrap();
        let frame = stack.push().unwrap();
        let clean = SegmentAllocator::allocate_zeroed(&frame, 16, 8).unwrap();
        assert_eq!(clean.to_vec().unwrap(), vec![0; 16]);
    }

    #[test]
    fn frame_sessions_are_confined() {
        let stack = Stack::with_block_size(64).unwrap();
        let frame = stack.push().unwrap();
        let region = frame.allocate(8, 8).unwrap();
        let result = std::thread::spawn(move || region.to_vec()).join().unwrap();
        assert!(matches!(
            result,
            Err(lifespan_core::SessionError::WrongThread { .. })
        ));
    }
}
