//! Header recycling.
//!
//! Every call needs a header value. Headers own heap buffers (method names,
//! error text), so codecs keep a small free list of them instead of
//! allocating fresh ones per call.
//!
//! The free list is guarded by a plain mutex that is only ever `try_lock`ed:
//! a contended pool hands out a new header rather than making the caller
//! wait.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use tern_protocol::Header;

/// Default number of idle headers kept per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Free list of reusable headers.
#[derive(Debug)]
pub struct HeaderPool<H: Header> {
    free: Mutex<Vec<H>>,
    capacity: usize,
}

impl<H: Header> HeaderPool<H> {
    /// Create a pool that keeps up to [`DEFAULT_POOL_CAPACITY`] idle headers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool that keeps up to `capacity` idle headers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a header in its zero state.
    ///
    /// The header goes back to the pool, reset, when the guard is dropped.
    pub fn acquire(&self) -> Pooled<'_, H> {
        let header = self
            .free
            .try_lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();
        Pooled { header, pool: self }
    }

    /// Number of idle headers currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.try_lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, mut header: H) {
        header.reset();
        if let Ok(mut free) = self.free.try_lock() {
            if free.len() < self.capacity {
                free.push(header);
            }
        }
    }
}

impl<H: Header> Default for HeaderPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// A header borrowed from a [`HeaderPool`].
pub struct Pooled<'a, H: Header> {
    header: H,
    pool: &'a HeaderPool<H>,
}

impl<H: Header> Deref for Pooled<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.header
    }
}

impl<H: Header> DerefMut for Pooled<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.header
    }
}

impl<H: Header> Drop for Pooled<'_, H> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.header));
    }
}
