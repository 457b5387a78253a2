//! Per-thread stacks shared under one pool handle.
//!
//! A [`StackPool`] is `Send + Sync`; the stacks it hands frames out of
//! are not. Each thread that pushes through a pool gets its own lazily
//! created [`Stack`], kept in a thread-local registry keyed by
//! [`PoolId`]. The stack lives until the pool is dropped on that thread
//! or the thread exits, whichever comes first.

use std::cell::RefCell;

use indexmap::IndexMap;
use lifespan_core::PoolId;
use tracing::debug;

use crate::config::StackConfig;
use crate::error::StackError;
use crate::frame::Frame;
use crate::stack::Stack;

thread_local! {
    static STACKS: RefCell<IndexMap<PoolId, Stack>> = RefCell::new(IndexMap::new());
}

/// A factory of thread-local stacks sharing one configuration.
#[derive(Debug)]
pub struct StackPool {
    id: PoolId,
    config: StackConfig,
}

impl StackPool {
    /// A pool whose stacks are built from `config`.
    pub fn new(config: StackConfig) -> Result<Self, StackError> {
        config.validate()?;
        Ok(Self {
            id: PoolId::next(),
            config,
        })
    }

    /// Process-unique identity of this pool.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Configuration of every stack in the pool.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Push a frame on the calling thread's stack, creating the stack on
    /// first use (or again if it was closed).
    pub fn push(&self) -> Result<Frame, StackError> {
        self.with_stack(Stack::push)?
    }

    /// Run `f` against the calling thread's stack.
    pub fn with_stack<R>(&self, f: impl FnOnce(&Stack) -> R) -> Result<R, StackError> {
        let stack = STACKS
            .try_with(|stacks| self.stack_for_thread(&mut stacks.borrow_mut()))
            .map_err(|_| StackError::ThreadExiting)??;
        Ok(f(&stack))
    }

    /// Whether the calling thread has a live stack in this pool.
    pub fn has_thread_stack(&self) -> bool {
        STACKS
            .try_with(|stacks| {
                stacks
                    .borrow()
                    .get(&self.id)
                    .is_some_and(Stack::is_open)
            })
            .unwrap_or(false)
    }

    fn stack_for_thread(&self, stacks: &mut IndexMap<PoolId, Stack>) -> Result<Stack, StackError> {
        if let Some(stack) = stacks.get(&self.id) {
            if stack.is_open() {
                return Ok(stack.clone());
            }
        }
        let stack = Stack::new(self.config.clone())?;
        debug!(pool = %self.id, session = %stack.session().id(), "thread stack created");
        stacks.insert(self.id, stack.clone());
        Ok(stack)
    }
}

impl Drop for StackPool {
    fn drop(&mut self) {
        let removed = STACKS
            .try_with(|stacks| stacks.borrow_mut().shift_remove(&self.id))
            .ok()
            .flatten();
        // Dropped outside the borrow: closing the stack runs cleanups.
        drop(removed);
    }
}
