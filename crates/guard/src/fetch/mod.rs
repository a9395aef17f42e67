//! Fetcher boundary: the adapters that bring untrusted bytes to the
//! pipeline, and the shared plumbing between them.
//!
//! Fetchers distinguish three outcomes. Bytes for the pipeline; a policy
//! *denial* (SSRF, caps, disabled network) that becomes an ordinary BLOCK
//! result; and a `GuardError` for bad input (path escape, malformed URL),
//! which callers surface as an RPC error without running the pipeline.

pub mod file;
pub mod repo;
pub mod web;

use std::sync::{Condvar, Mutex};

pub use web::{HttpReply, HttpTransport};

/// Result of a fetch attempt that passed input validation.
#[derive(Debug)]
pub enum FetchOutcome {
    Bytes(Vec<u8>),
    Denied { reason: &'static str },
}

/// Process-wide cap on concurrent fetches. Excess requests wait their
/// turn; nothing is rejected.
pub struct FetchGate {
    limit: usize,
    active: Mutex<usize>,
    freed: Condvar,
}

impl FetchGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            active: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> FetchPermit<'_> {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *active >= self.limit {
            active = match self.freed.wait(active) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *active += 1;
        FetchPermit { gate: self }
    }
}

pub struct FetchPermit<'a> {
    gate: &'a FetchGate,
}

impl Drop for FetchPermit<'_> {
    fn drop(&mut self) {
        let mut active = match self.gate.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *active = active.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn gate_bounds_concurrency() {
        let gate = Arc::new(FetchGate::new(2));
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let peak = peak.clone();
                let active = active.clone();
                std::thread::spawn(move || {
                    let _permit = gate.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
