//! Integration test: shared sessions under concurrent use.
//!
//! Many threads acquire, register cleanups on, and race to close the
//! same shared session. Exactly one close may win, every registered
//! cleanup must run exactly once, and no acquire may succeed after the
//! close has been observed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lifespan_session::{Session, SessionError};
use lifespan_test_utils::{run_concurrently, Counter};

const THREADS: usize = 100;

#[test]
fn concurrent_acquires_are_all_counted() {
    let session = Session::shared();
    let s = session.clone();
    let results = run_concurrently(THREADS, move |_| s.acquire());
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(session.acquire_count(), THREADS as u32);
    assert!(matches!(
        session.close(),
        Err(SessionError::StillAcquired { count, .. }) if count == THREADS as u32
    ));
    for _ in 0..THREADS {
        session.release();
    }
    session.close().unwrap();
}

#[test]
fn exactly_one_concurrent_close_wins() {
    for _ in 0..20 {
        let session = Session::shared();
        let ran = Counter::new();
        session.register_cleanup(ran.incrementer()).unwrap();
        let s = session.clone();
        let results = run_concurrently(8, move |_| s.close());
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        for r in &results {
            if let Err(e) = r {
                assert!(e.is_closed(), "unexpected error {e}");
            }
        }
        assert_eq!(ran.get(), 1);
    }
}

#[test]
fn cleanups_registered_from_many_threads_all_run() {
    let session = Session::shared();
    let sum = Arc::new(AtomicUsize::new(0));
    let s = session.clone();
    let sum_in = Arc::clone(&sum);
    run_concurrently(THREADS, move |i| {
        let sum = Arc::clone(&sum_in);
        s.register_cleanup(move || {
            sum.fetch_add(i, Ordering::SeqCst);
        })
        .unwrap();
    });
    assert_eq!(sum.load(Ordering::SeqCst), 0);
    session.close().unwrap();
    assert_eq!(sum.load(Ordering::SeqCst), (0..THREADS).sum::<usize>());
}

#[test]
fn registration_racing_close_runs_each_action_once() {
    let session = Session::shared();
    let total = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let s = session.clone();
            let total = Arc::clone(&total);
            thread::spawn(move || {
                let t = Arc::clone(&total);
                if s
                    .register_cleanup(move || {
                        t.fetch_add(i, Ordering::SeqCst);
                    })
                    .is_err()
                {
                    // Rejected actions are dropped unrun.
                    total.fetch_add(i, Ordering::SeqCst);
                }
            })
        })
        .collect();
    session.close().unwrap();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), (0..THREADS).sum::<usize>());
}

#[test]
fn no_acquire_succeeds_after_close_is_observed() {
    let session = Session::shared();
    let closed = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let s = session.clone();
            let closed = Arc::clone(&closed);
            thread::spawn(move || loop {
                let was_closed = closed.load(Ordering::SeqCst);
                match s.acquire() {
                    Ok(()) => {
                        assert!(!was_closed, "acquire succeeded after close");
                        s.release();
                        thread::yield_now();
                    }
                    Err(e) => {
                        assert!(e.is_closed());
                        assert!(!s.is_alive());
                        return;
                    }
                }
            })
        })
        .collect();
    loop {
        match session.close() {
            Ok(()) => break,
            Err(SessionError::StillAcquired { .. }) => thread::yield_now(),
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    closed.store(true, Ordering::SeqCst);
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn region_reads_never_observe_freed_memory() {
    let session = Session::shared();
    let mut region = lifespan_session::SegmentAllocator::allocate(&session, 64, 8).unwrap();
    region.fill(7).unwrap();
    let region = Arc::new(region);
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                while region.read_bytes(0, &mut buf).is_ok() {
                    assert!(buf.iter().all(|&b| b == 7));
                }
            })
        })
        .collect();
    thread::yield_now();
    session.close().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}
