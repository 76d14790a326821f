use std::thread;

/// A poison pill that surfaces worker-task panics to the owning thread.
///
/// Sent into the background generation worker; if the worker panics, the
/// pill is dropped during unwinding and re-raises on the thread that ends
/// up dropping it, instead of the failure being silently swallowed while
/// callers wait on streams that will never produce.
pub(crate) struct Pill {}

impl Pill {
    pub(crate) fn new() -> Self {
        Self {}
    }
}

impl Drop for Pill {
    fn drop(&mut self) {
        if thread::panicking() {
            panic!("generation worker panicked - propagating to parent thread");
        }
    }
}
