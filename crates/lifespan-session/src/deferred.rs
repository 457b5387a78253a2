//! Background closer that batches shared-session closes.
//!
//! Submitting threads send a [`PendingClose`] over an unbounded
//! crossbeam channel and block on a per-submission oneshot reply until
//! the worker has completed it. The worker drains up to `batch_size`
//! submissions at a time and completes them with one handshake via
//! [`close_batch`].
//!
//! Three situations bypass the queue and close inline on the submitting
//! thread: the closer has been stopped, the queue is deeper than
//! `high_water_mark`, or the submission comes from the worker thread
//! itself (a cleanup closing another session).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::closer::{close_batch, Closer, PendingClose};
use crate::config::{CloserConfig, ConfigError};

/// One queued submission.
struct Job {
    pending: PendingClose,
    /// Signalled once `pending` is complete. `None` for detached work.
    done: Option<Sender<()>>,
}

// ── Counters ────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    inline: AtomicU64,
    batches: AtomicU64,
    completed: AtomicU64,
}

/// Snapshot of a [`DeferredCloser`]'s activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloserMetrics {
    /// Submissions handed to the worker.
    pub queued: u64,
    /// Submissions completed on the submitting thread.
    pub inline: u64,
    /// Batches completed by the worker.
    pub batches: u64,
    /// Closes completed by the worker.
    pub completed: u64,
}

// ── DeferredCloser ──────────────────────────────────────────────

/// Closer backed by a dedicated worker thread.
///
/// ```
/// use std::sync::Arc;
/// use lifespan_session::{CloserConfig, DeferredCloser, Session};
///
/// let closer = Arc::new(DeferredCloser::start(CloserConfig::default()).unwrap());
/// let session = Session::builder().closer(closer.clone()).shared().unwrap();
/// session.close().unwrap();
/// assert!(!session.is_alive());
/// closer.stop();
/// ```
pub struct DeferredCloser {
    tx: RwLock<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    config: CloserConfig,
    counters: Arc<Counters>,
}

impl DeferredCloser {
    /// Validate `config` and spawn the worker thread.
    pub fn start(config: CloserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(Counters::default());
        let worker = thread::Builder::new()
            .name("lifespan-closer".into())
            .spawn({
                let counters = Arc::clone(&counters);
                let batch_size = config.batch_size;
                move || worker_loop(rx, batch_size, counters)
            })
            .map_err(|e| ConfigError::SpawnFailed {
                reason: e.to_string(),
            })?;
        let worker_id = worker.thread().id();
        debug!(
            batch_size = config.batch_size,
            high_water_mark = config.high_water_mark,
            "deferred closer started"
        );
        Ok(Self {
            tx: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            worker_id,
            config,
            counters,
        })
    }

    /// The configuration this closer was started with.
    pub fn config(&self) -> &CloserConfig {
        &self.config
    }

    /// Whether the worker is still accepting submissions.
    pub fn is_running(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Submissions waiting for the worker.
    pub fn queue_len(&self) -> usize {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Sender::len)
    }

    /// Activity counters.
    pub fn metrics(&self) -> CloserMetrics {
        CloserMetrics {
            queued: self.counters.queued.load(Ordering::Relaxed),
            inline: self.counters.inline.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting submissions, let the worker drain its queue, and
    /// join it. Later submissions close inline. Idempotent.
    ///
    /// Returns `false` if the worker thread panicked.
    pub fn stop(&self) -> bool {
        let tx = self
            .tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tx.is_none() {
            return true;
        }
        drop(tx);
        if thread::current().id() == self.worker_id {
            // The worker exits on its own once the queue is drained.
            return true;
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let joined = handle.map_or(true, |h| h.join().is_ok());
        debug!(joined, "deferred closer stopped");
        joined
    }

    fn close_inline(&self, pending: PendingClose) {
        self.counters.inline.fetch_add(1, Ordering::Relaxed);
        close_batch([pending]);
    }
}

impl Closer for DeferredCloser {
    fn close(&self, pending: PendingClose) {
        if thread::current().id() == self.worker_id {
            return self.close_inline(pending);
        }

        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            return self.close_inline(pending);
        };
        if tx.len() > self.config.high_water_mark {
            drop(guard);
            debug!(
                high_water_mark = self.config.high_water_mark,
                "close queue over high-water mark, closing inline"
            );
            return self.close_inline(pending);
        }

        let (done, reply) = if pending.is_detached() {
            (None, None)
        } else {
            let (done, reply) = crossbeam_channel::bounded(1);
            (Some(done), Some(reply))
        };
        let sent = tx.send(Job { pending, done });
        drop(guard);
        match sent {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(crossbeam_channel::SendError(job)) => {
                warn!("closer worker is gone, closing inline");
                return self.close_inline(job.pending);
            }
        }

        if let Some(reply) = reply {
            if reply.recv().is_err() {
                warn!("closer worker dropped a pending close");
            }
        }
    }
}

impl Drop for DeferredCloser {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DeferredCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCloser")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("metrics", &self.metrics())
            .finish()
    }
}

// ── Worker ──────────────────────────────────────────────────────

fn worker_loop(rx: Receiver<Job>, batch_size: usize, counters: Arc<Counters>) {
    let mut batch: SmallVec<[Job; 16]> = SmallVec::new();
    let mut replies: SmallVec<[Sender<()>; 16]> = SmallVec::new();

    while let Ok(first) = rx.recv() {
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }

        trace!(size = batch.len(), "closing batch");
        let completed = close_batch(batch.drain(..).map(|job| {
            if let Some(done) = job.done {
                replies.push(done);
            }
            job.pending
        }));

        counters.batches.fetch_add(1, Ordering::Relaxed);
        counters
            .completed
            .fetch_add(completed as u64, Ordering::Relaxed);
        for done in replies.drain(..) {
            let _ = done.send(());
        }
    }
    debug!("closer worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::sync::atomic::AtomicU32;

    fn start() -> Arc<DeferredCloser> {
        Arc::new(DeferredCloser::start(CloserConfig::default()).unwrap())
    }

    #[test]
    fn close_returns_after_cleanups_ran() {
        let closer = start();
        let ran = Arc::new(AtomicU32::new(0));
        let s = Session::builder().closer(closer.clone()).shared().unwrap();
        let r = Arc::clone(&ran);
        s.register_cleanup(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        s.close().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(closer.metrics().completed, 1);
        assert!(closer.stop());
    }

    #[test]
    fn stopped_closer_closes_inline() {
        let closer = start();
        assert!(closer.stop());
        assert!(!closer.is_running());
        let s = Session::builder().closer(closer.clone()).shared().unwrap();
        s.close().unwrap();
        assert_eq!(closer.metrics().inline, 1);
        assert!(closer.stop());
    }

    #[test]
    fn zero_high_water_mark_still_completes() {
        let closer = Arc::new(
            DeferredCloser::start(CloserConfig {
                batch_size: 4,
                high_water_mark: 0,
            })
            .unwrap(),
        );
        for _ in 0..16 {
            let s = Session::builder().closer(closer.clone()).shared().unwrap();
            s.close().unwrap();
        }
        let m = closer.metrics();
        assert_eq!(m.queued + m.inline, 16);
    }

    #[test]
    fn cleanup_closing_another_session_does_not_deadlock() {
        let closer = start();
        let inner = Session::builder().closer(closer.clone()).shared().unwrap();
        let outer = Session::builder().closer(closer.clone()).shared().unwrap();
        let nested = inner.clone();
        outer
            .register_cleanup(move || nested.close().unwrap())
            .unwrap();
        outer.close().unwrap();
        assert!(!inner.is_alive());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = DeferredCloser::start(CloserConfig {
            batch_size: 0,
            ..CloserConfig::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }
}
