//! Thread fixtures for concurrency tests.

use std::sync::{Arc, Barrier};
use std::thread;

/// Run `f(i)` on `threads` threads that all start together, and collect
/// the results in thread-index order.
///
/// # Panics
///
/// Re-raises a panic from any of the threads.
pub fn run_concurrently<F, T>(threads: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let f = Arc::clone(&f);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| match h.join() {
            Ok(v) => v,
            Err(payload) => std::panic::resume_unwind(payload),
        })
        .collect()
}

/// Run `f` on a fresh thread and return its result.
pub fn on_new_thread<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match thread::spawn(f).join() {
        Ok(v) => v,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_are_in_index_order() {
        assert_eq!(run_concurrently(4, |i| i * 10), vec![0, 10, 20, 30]);
    }

    #[test]
    fn new_thread_is_a_different_thread() {
        let here = thread::current().id();
        assert_ne!(on_new_thread(|| thread::current().id()), here);
    }
}
