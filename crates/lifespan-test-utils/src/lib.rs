//! Test utilities for Lifespan development.
//!
//! Provides recorders for observing cleanup actions ([`CleanupLog`],
//! [`Counter`]) and thread fixtures for concurrency tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub use fixtures::{on_new_thread, run_concurrently};

/// Ordered log of values pushed by cleanup actions.
///
/// Clones share the same log. Hand out actions with
/// [`recorder`](CleanupLog::recorder) and assert on
/// [`entries`](CleanupLog::entries) after the session closes.
pub struct CleanupLog<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> CleanupLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An action that appends `value` when run.
    pub fn recorder(&self, value: T) -> impl FnOnce() + Send + 'static {
        let entries = Arc::clone(&self.entries);
        move || {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(value)
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> CleanupLog<T> {
    /// Snapshot of the values recorded so far, in run order.
    pub fn entries(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Clone for CleanupLog<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: Send + 'static> Default for CleanupLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug> Debug for CleanupLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CleanupLog").field(&self.entries).finish()
    }
}

/// Shared counter of how many actions ran.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    hits: Arc<AtomicUsize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// An action that bumps the counter once when run.
    pub fn incrementer(&self) -> impl FnOnce() + Send + 'static {
        let hits = Arc::clone(&self.hits);
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
