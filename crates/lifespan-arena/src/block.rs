//! Fixed-size blocks and the lazily grown block list behind a stack.
//!
//! A [`Block`] is one `block_size`-byte region allocated from the stack's
//! backing session. A [`BlockList`] grows one block at a time, only when
//! the stack's cursor first reaches a block index that has no block yet,
//! and never frees a block individually: every block dies with the
//! backing session.

use lifespan_session::{Region, SegmentAllocator, Session};
use tracing::trace;

use crate::config::StackConfig;
use crate::error::StackError;

/// One fixed-size extent owned by a stack.
#[derive(Debug)]
pub struct Block {
    region: Region,
}

impl Block {
    fn allocate(session: &Session, size: usize) -> Result<Self, StackError> {
        let region = session.allocate(size, StackConfig::BLOCK_ALIGN)?;
        Ok(Self { region })
    }

    /// Base address.
    pub fn address(&self) -> usize {
        self.region.address()
    }

    /// Size in bytes.
    pub fn byte_size(&self) -> usize {
        self.region.byte_size()
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Offset within this block at which `size` bytes aligned to `align`
    /// (on the absolute address) fit, searching from `from`.
    pub(crate) fn try_slice(&self, from: usize, size: usize, align: usize) -> Option<usize> {
        let base = self.address();
        let aligned = base.checked_add(from)?.checked_add(align - 1)? & !(align - 1);
        let start = aligned - base;
        let end = start.checked_add(size)?;
        (end <= self.byte_size()).then_some(start)
    }
}

/// The growable sequence of blocks behind a stack.
#[derive(Debug)]
pub struct BlockList {
    blocks: Vec<Block>,
    block_size: usize,
    capacity: Option<u32>,
}

impl BlockList {
    /// An empty list; no memory is allocated until the first block is
    /// needed.
    pub fn new(config: &StackConfig) -> Self {
        Self {
            blocks: Vec::new(),
            block_size: config.block_size,
            capacity: config.capacity,
        }
    }

    /// The block at `index`, allocating it from `session` if the list has
    /// just grown to reach it.
    ///
    /// Blocks are only ever requested in order, so `index` is at most the
    /// current length.
    pub fn get_or_allocate(&mut self, index: usize, session: &Session) -> Result<&Block, StackError> {
        if index == self.blocks.len() {
            if let Some(capacity) = self.capacity {
                if index >= capacity as usize {
                    return Err(StackError::OutOfCapacity { capacity });
                }
            }
            let block = Block::allocate(session, self.block_size)?;
            trace!(index, block_size = self.block_size, "stack block allocated");
            self.blocks.push(block);
        }
        Ok(&self.blocks[index])
    }

    /// The block at `index`, if it exists.
    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Number of blocks allocated so far.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total bytes held across all blocks.
    pub fn memory_bytes(&self) -> usize {
        self.blocks.len() * self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_allocated_lazily() {
        let session = Session::confined();
        let mut list = BlockList::new(&StackConfig::with_block_size(64));
        assert!(list.is_empty());
        list.get_or_allocate(0, &session).unwrap();
        list.get_or_allocate(0, &session).unwrap();
        assert_eq!(list.len(), 1);
        list.get_or_allocate(1, &session).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.memory_bytes(), 128);
        session.close().unwrap();
    }

    #[test]
    fn capacity_is_enforced() {
        let session = Session::confined();
        let mut list = BlockList::new(&StackConfig::with_block_size(64).capacity(1));
        list.get_or_allocate(0, &session).unwrap();
        assert_eq!(
            list.get_or_allocate(1, &session).unwrap_err(),
            StackError::OutOfCapacity { capacity: 1 }
        );
    }

    #[test]
    fn blocks_are_16_byte_aligned() {
        let session = Session::confined();
        let mut list = BlockList::new(&StackConfig::with_block_size(40));
        let block = list.get_or_allocate(0, &session).unwrap();
        assert_eq!(block.address() % StackConfig::BLOCK_ALIGN, 0);
        assert_eq!(block.byte_size(), 40);
    }

    #[test]
    fn try_slice_aligns_and_bounds() {
        let session = Session::confined();
        let mut list = BlockList::new(&StackConfig::with_block_size(40));
        let block = list.get_or_allocate(0, &session).unwrap();
        assert_eq!(block.try_slice(1, 2, 2), Some(2));
        assert_eq!(block.try_slice(33, 8, 8), None);
        assert_eq!(block.try_slice(0, 40, 1), Some(0));
        assert_eq!(block.try_slice(0, 41, 1), None);
    }

    #[test]
    fn closed_session_cannot_grow_the_list() {
        let session = Session::confined();
        session.close().unwrap();
        let mut list = BlockList::new(&StackConfig::default());
        assert!(list.get_or_allocate(0, &session).unwrap_err().is_closed());
    }
}
