//! Hop-by-hop identifier allocation.
//!
//! Concurrent senders share one `AtomicU32` and each takes the next value
//! with `fetch_add`, so no lock is held while allocating. The counter wraps
//! at 2^32. Seeding it randomly per session keeps a reconnected session
//! from reusing ids a peer may still associate with the old one.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic, wrapping 32-bit id counter.
#[derive(Debug)]
pub(crate) struct RequestIdAllocator {
    next: AtomicU32,
}

impl RequestIdAllocator {
    /// Start from a random seed.
    pub(crate) fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub(crate) fn with_seed(seed: u32) -> Self {
        Self {
            next: AtomicU32::new(seed),
        }
    }

    /// Take the next id. Never blocks.
    #[inline]
    pub(crate) fn next(&self) -> u32 {
        // fetch_add wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
