// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reusable scratch buffers for staging intermediate images.
//!
//! A [`ScratchPool`] owns two slots. A [`Lease`] takes one slot's buffer and
//! gives it back on drop, so consecutive conversions reuse the same
//! allocation. Buffers only grow.
//!
//! Conversions use a per-thread pool reachable via [`acquire`], [`try_acquire`],
//! [`lease`] and [`reset`]. They take buffers with [`lease`]: while a
//! conversion waits on a `rayon` parallel section, work stealing may start
//! further conversions on the same thread, so slots can run out on valid
//! input. Those leases are detached allocations instead.
//!
//! ```
//! use pixconv::scratch::ScratchPool;
//! let pool = ScratchPool::new();
//! let mut a = pool.acquire();
//! let b = pool.acquire();
//! assert!(pool.try_acquire().is_none());
//! a.resize(1024).fill(7);
//! drop(a);
//! assert!(pool.acquire().high_water() >= 1024);
//! # drop(b);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace};

/// Number of leases a pool can hand out at once.
pub const SLOTS: usize = 2;

#[derive(Default)]
struct PoolState {
    /// `None` while the slot is leased.
    buffers: [Option<Vec<u8>>; SLOTS],

    /// Bumped by `reset`, so leases taken before it don't return stale buffers.
    generation: u64,
}

/// A pool of [`SLOTS`] growable scratch buffers.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct ScratchPool {
    state: Arc<Mutex<PoolState>>,
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ScratchPool")
            .field("available", &state.buffers.iter().filter(|b| b.is_some()).count())
            .field("generation", &state.generation)
            .finish()
    }
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                buffers: [Some(Vec::new()), Some(Vec::new())],
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The state is always consistent between statements; a panic elsewhere can't corrupt it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leases a free slot, or returns `None` if both are in use.
    pub fn try_acquire(&self) -> Option<Lease> {
        let mut state = self.lock();
        let generation = state.generation;
        let (slot, buf) = state
            .buffers
            .iter_mut()
            .enumerate()
            .find_map(|(i, b)| b.take().map(|b| (i, b)))?;
        trace!(slot, capacity = buf.capacity(), "leased scratch buffer");
        Some(Lease {
            pool: Some(Arc::clone(&self.state)),
            slot: Some(slot),
            generation,
            len: 0,
            buf,
        })
    }

    /// Leases a free slot.
    ///
    /// # Panics
    ///
    /// If both slots are already leased.
    pub fn acquire(&self) -> Lease {
        match self.try_acquire() {
            Some(lease) => lease,
            None => {
                error!("scratch pool exhausted: more than {SLOTS} concurrent leases");
                panic!("scratch pool exhausted: more than {SLOTS} concurrent leases");
            }
        }
    }

    /// Leases a free slot, or returns a detached buffer if both are in use.
    ///
    /// A detached lease starts empty and frees its buffer on drop.
    pub fn lease(&self) -> Lease {
        self.try_acquire().unwrap_or_else(|| {
            debug!("scratch pool busy; allocating a detached buffer");
            Lease {
                pool: None,
                slot: None,
                generation: 0,
                len: 0,
                buf: Vec::new(),
            }
        })
    }

    /// Drops all pooled buffers. Outstanding leases stay valid but their
    /// buffers are freed rather than returned when they drop.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.buffers = [Some(Vec::new()), Some(Vec::new())];
        debug!(generation = state.generation, "reset scratch pool");
    }

    /// Returns the number of slots not currently leased.
    pub fn available(&self) -> usize {
        self.lock().buffers.iter().filter(|b| b.is_some()).count()
    }
}

/// A leased scratch buffer, returned to its pool on drop.
///
/// Dereferences to the bytes requested by the latest [`Lease::resize`].
pub struct Lease {
    /// `None` for detached leases.
    pool: Option<Arc<Mutex<PoolState>>>,
    slot: Option<usize>,
    generation: u64,
    len: usize,
    buf: Vec<u8>,
}

impl Lease {
    /// Makes `len` bytes available and returns them.
    ///
    /// Bytes beyond the previous high-water mark are zeroed; others keep
    /// whatever a previous user left behind.
    pub fn resize(&mut self, len: usize) -> &mut [u8] {
        if len > self.buf.len() {
            debug!(
                slot = ?self.slot,
                from = self.buf.len(),
                to = len,
                "growing scratch buffer"
            );
            self.buf.resize(len, 0);
        }
        self.len = len;
        &mut self.buf[..len]
    }

    /// Returns the largest size ever requested of this slot's buffer.
    #[inline]
    pub fn high_water(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Returns true if the buffer goes back to a pool on drop.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for Lease {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for Lease {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let (Some(pool), Some(slot)) = (&self.pool, self.slot) else {
            return;
        };
        let mut state = pool.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == self.generation {
            state.buffers[slot] = Some(std::mem::take(&mut self.buf));
        }
    }
}

thread_local! {
    static CURRENT: ScratchPool = ScratchPool::new();
}

/// Returns a handle to this thread's pool.
pub fn current() -> ScratchPool {
    CURRENT.with(ScratchPool::clone)
}

/// Leases from this thread's pool; see [`ScratchPool::acquire`].
pub fn acquire() -> Lease {
    CURRENT.with(ScratchPool::acquire)
}

/// Leases from this thread's pool; see [`ScratchPool::try_acquire`].
pub fn try_acquire() -> Option<Lease> {
    CURRENT.with(ScratchPool::try_acquire)
}

/// Leases from this thread's pool; see [`ScratchPool::lease`].
pub fn lease() -> Lease {
    CURRENT.with(ScratchPool::lease)
}

/// Resets this thread's pool; see [`ScratchPool::reset`].
pub fn reset() {
    CURRENT.with(ScratchPool::reset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_distinct_leases() {
        let pool = ScratchPool::new();
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a.resize(16).fill(1);
        b.resize(16).fill(2);
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!(&a[..], &[1; 16]);
        assert_eq!(&b[..], &[2; 16]);
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    #[should_panic(expected = "scratch pool exhausted")]
    fn third_lease_panics() {
        let pool = ScratchPool::new();
        let _a = pool.acquire();
        let _b = pool.acquire();
        let _c = pool.acquire();
    }

    #[test]
    fn busy_pool_hands_out_detached_leases() {
        let pool = ScratchPool::new();
        let a = pool.lease();
        let b = pool.lease();
        assert!(a.is_pooled() && b.is_pooled());
        let mut c = pool.lease();
        assert!(!c.is_pooled());
        assert_eq!(c.resize(100).len(), 100);
        drop(c);
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.lease().is_pooled());
        drop(b);
    }

    #[test]
    fn sequential_reuse_keeps_allocation() {
        let pool = ScratchPool::new();
        let mut lease = pool.acquire();
        let ptr = lease.resize(4096).as_ptr();
        drop(lease);

        let mut lease = pool.acquire();
        assert_eq!(lease.len(), 0);
        assert_eq!(lease.high_water(), 4096);
        assert_eq!(lease.resize(1000).as_ptr(), ptr);
        assert_eq!(lease.resize(4096).as_ptr(), ptr);
        assert_eq!(lease.high_water(), 4096);
        assert_eq!(lease.len(), 4096);
    }

    #[test]
    fn high_water_never_decreases() {
        let pool = ScratchPool::new();
        let mut sizes = Vec::new();
        for len in [100, 10, 1000, 5, 0, 999] {
            let mut lease = pool.acquire();
            lease.resize(len);
            assert_eq!(lease.len(), len);
            sizes.push(lease.high_water());
        }
        assert_eq!(sizes, vec![100, 100, 1000, 1000, 1000, 1000]);
    }

    #[test]
    fn reset_starts_from_empty() {
        let pool = ScratchPool::new();
        let mut lease = pool.acquire();
        lease.resize(256);
        drop(lease);
        pool.reset();
        assert_eq!(pool.acquire().high_water(), 0);
    }

    #[test]
    fn reset_with_outstanding_lease() {
        let pool = ScratchPool::new();
        let mut a = pool.acquire();
        let _b = pool.acquire();
        a.resize(64);
        pool.reset();
        assert_eq!(pool.available(), 2);
        let fresh = pool.acquire();
        drop(a);
        // The old lease's buffer is discarded, not returned to a slot.
        assert_eq!(pool.available(), 1);
        assert_eq!(fresh.high_water(), 0);
    }

    #[test]
    fn thread_local_pools_are_independent() {
        reset();
        let _a = acquire();
        let _b = acquire();
        assert!(try_acquire().is_none());
        std::thread::spawn(|| {
            let _a = acquire();
            let _b = acquire();
        })
        .join()
        .unwrap();
        assert_eq!(current().available(), 0);
    }
}
