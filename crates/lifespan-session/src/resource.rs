//! Intrusive LIFO registry of close actions.
//!
//! A [`ResourceList`] is a singly linked list of boxed cleanup actions
//! guarded by one atomic head pointer. Registration prepends; closing
//! swaps the head for a `CLOSED` sentinel ("freezing" the list) and
//! hands the detached chain back as [`Cleanups`], which runs the actions
//! newest-first.
//!
//! Two modes share the node layout:
//!
//! - **Confined**: a single writer (the owner thread). Prepend is a plain
//!   load + store; freeze is one compare-exchange whose failure means the
//!   single-writer invariant was broken, which is fatal.
//! - **Shared**: any thread may prepend. Prepend is a CAS retry loop;
//!   freeze is an unconditional swap, which absorbs adds that were in
//!   flight when the session-level close race was won. Adds that start
//!   after the swap observe `CLOSED` and fail.
//!
//! # Safety
//!
//! Nodes are created with `Box::into_raw` and reclaimed with
//! `Box::from_raw` exactly once: by [`Cleanups`] (run or drop) after the
//! chain was detached by `freeze`, by `ResourceList`'s drop if it was
//! never frozen, or by `add` itself when the node was never published.
//! Once published, a node's `next` link is never written again.

#![allow(unsafe_code)]

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A deferred unit of work run when its session closes.
pub type CleanupAction = Box<dyn FnOnce() + Send + 'static>;

struct Node {
    action: CleanupAction,
    next: *mut Node,
}

/// Only its address is used; it is never dereferenced.
static CLOSED_LIST: u8 = 0;

fn closed() -> *mut Node {
    ptr::addr_of!(CLOSED_LIST).cast::<Node>().cast_mut()
}

/// Reclaim a node that was allocated by `add` but never published.
///
/// # Safety
///
/// `node` must come from `Box::into_raw` and must not be reachable from
/// any list.
unsafe fn reclaim(node: *mut Node) -> CleanupAction {
    // SAFETY: guaranteed by the caller.
    unsafe { Box::from_raw(node) }.action
}

/// Synchronisation regime of a [`ResourceList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListMode {
    /// Single writer; no CAS.
    Confined,
    /// Concurrent writers; CAS prepend.
    Shared,
}

/// Append-only LIFO list of cleanup actions owned by one session.
pub(crate) struct ResourceList {
    head: AtomicPtr<Node>,
    mode: ListMode,
}

impl ResourceList {
    pub(crate) fn new(mode: ListMode) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            mode,
        }
    }

    /// Register `action`. On a frozen list the action is handed back
    /// unrun so the caller can dispose of it.
    pub(crate) fn add(&self, action: CleanupAction) -> Result<(), CleanupAction> {
        let node = Box::into_raw(Box::new(Node {
            action,
            next: ptr::null_mut(),
        }));
        match self.mode {
            ListMode::Confined => {
                let prev = self.head.load(Ordering::Acquire);
                if prev == closed() {
                    // SAFETY: `node` was never published.
                    return Err(unsafe { reclaim(node) });
                }
                // SAFETY: `node` is still exclusively ours.
                unsafe { (*node).next = prev };
                self.head.store(node, Ordering::Release);
                Ok(())
            }
            ListMode::Shared => loop {
                let prev = self.head.load(Ordering::Acquire);
                if prev == closed() {
                    // SAFETY: `node` was never published; failed CAS
                    // attempts leave it unpublished.
                    return Err(unsafe { reclaim(node) });
                }
                // SAFETY: `node` is unpublished until the CAS succeeds.
                unsafe { (*node).next = prev };
                if self
                    .head
                    .compare_exchange_weak(prev, node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
            },
        }
    }

    /// Swap the head to the `CLOSED` sentinel and detach the chain.
    ///
    /// # Panics
    ///
    /// Panics if the list is already frozen, or (confined mode) if a
    /// concurrent add raced the freeze. Both mean a broken caller.
    pub(crate) fn freeze(&self) -> Cleanups {
        let head = match self.mode {
            ListMode::Confined => {
                let prev = self.head.load(Ordering::Acquire);
                assert!(prev != closed(), "cleanup list frozen twice");
                if self
                    .head
                    .compare_exchange(prev, closed(), Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    panic!("concurrent cleanup registration on a confined session");
                }
                prev
            }
            ListMode::Shared => {
                let prev = self.head.swap(closed(), Ordering::AcqRel);
                assert!(prev != closed(), "cleanup list frozen twice");
                prev
            }
        };
        Cleanups { head }
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.head.load(Ordering::Acquire) == closed()
    }
}

impl Drop for ResourceList {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if head != closed() {
            drop(Cleanups { head });
        }
    }
}

impl fmt::Debug for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceList")
            .field("mode", &self.mode)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// A frozen chain of cleanup actions, newest first.
///
/// [`Cleanups::run`] invokes every action exactly once; dropping an
/// unrun chain discards the actions without invoking them.
pub(crate) struct Cleanups {
    head: *mut Node,
}

// SAFETY: the chain is uniquely owned and every action is `Send`.
unsafe impl Send for Cleanups {}

impl Cleanups {
    pub(crate) fn empty() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Number of actions in the chain.
    pub(crate) fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            n += 1;
            // SAFETY: every node in a detached chain is live and owned by us.
            cur = unsafe { (*cur).next };
        }
        n
    }

    /// Run every action, most recently registered first.
    ///
    /// A panicking action does not stop the walk: the remaining actions
    /// still run, and the first panic is resumed afterwards.
    pub(crate) fn run(mut self) {
        let mut first_panic = None;
        let mut cur = std::mem::replace(&mut self.head, ptr::null_mut());
        while !cur.is_null() {
            // SAFETY: each node is visited once and was published by `add`.
            let node = unsafe { Box::from_raw(cur) };
            let Node { action, next } = *node;
            cur = next;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl Drop for Cleanups {
    fn drop(&mut self) {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: each node is visited once and is owned by this chain.
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, v: u32) -> CleanupAction {
        let log = Arc::clone(log);
        Box::new(move || log.lock().unwrap().push(v))
    }

    #[test]
    fn runs_in_reverse_registration_order() {
        for mode in [ListMode::Confined, ListMode::Shared] {
            let log = Arc::new(Mutex::new(Vec::new()));
            let list = ResourceList::new(mode);
            for v in 1..=3 {
                assert!(list.add(recorder(&log, v)).is_ok());
            }
            let chain = list.freeze();
            assert_eq!(chain.len(), 3);
            chain.run();
            assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
        }
    }

    #[test]
    fn add_after_freeze_hands_action_back() {
        let ran = Arc::new(AtomicUsize::new(0));
        let list = ResourceList::new(ListMode::Shared);
        list.freeze().run();
        assert!(list.is_frozen());

        let r = Arc::clone(&ran);
        let rejected = list
            .add(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        rejected();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "frozen twice")]
    fn double_freeze_is_fatal() {
        let list = ResourceList::new(ListMode::Confined);
        list.freeze().run();
        let _ = list.freeze();
    }

    #[test]
    fn dropping_unfrozen_list_discards_actions() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let list = ResourceList::new(ListMode::Shared);
            let r = Arc::clone(&ran);
            list.add(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .ok()
            .unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let list = Arc::new(ResourceList::new(ListMode::Shared));
        let ran = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let list = Arc::clone(&list);
                let ran = Arc::clone(&ran);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let ran = Arc::clone(&ran);
                        list.add(Box::new(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        }))
                        .ok()
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let chain = list.freeze();
        assert_eq!(chain.len(), 2000);
        chain.run();
        assert_eq!(ran.load(Ordering::SeqCst), 2000);
    }

    #[test]
    fn panicking_action_does_not_skip_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = ResourceList::new(ListMode::Confined);
        list.add(recorder(&log, 1)).ok().unwrap();
        list.add(Box::new(|| panic!("boom"))).ok().unwrap();
        list.add(recorder(&log, 3)).ok().unwrap();
        let chain = list.freeze();
        let result = panic::catch_unwind(AssertUnwindSafe(|| chain.run()));
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec![3, 1]);
    }

    #[test]
    fn empty_chain_runs_nothing() {
        let chain = Cleanups::empty();
        assert_eq!(chain.len(), 0);
        chain.run();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn cleanup_order_is_exact_reverse(values in proptest::collection::vec(any::<u32>(), 0..64)) {
                let log = Arc::new(Mutex::new(Vec::new()));
                let list = ResourceList::new(ListMode::Shared);
                for &v in &values {
                    prop_assert!(list.add(recorder(&log, v)).is_ok());
                }
                list.freeze().run();
                let mut expected = values.clone();
                expected.reverse();
                prop_assert_eq!(log.lock().unwrap().clone(), expected);
            }
        }
    }
}
