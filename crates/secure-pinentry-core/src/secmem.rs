//! Locked, zero-on-release memory for secrets.
//!
//! This module provides the storage used for every PIN or passphrase that
//! passes through the server:
//! - A bounded [`SecureMemory`] pool that accounts for all live secret bytes
//! - [`SecureBuffer`], an owning byte buffer drawn from that pool
//! - Memory locking via `memsec::mlock` to keep buffer pages out of swap
//! - Zeroing via `zeroize` before the storage is returned to the allocator
//!
//! # Security
//!
//! A buffer can only be released by dropping it, and `Drop` always zeroes
//! the full capacity first. Early returns, cancellations and errors therefore
//! cannot skip the wipe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};
use zeroize::Zeroize;

/// Default size of the secure memory pool in bytes.
pub const DEFAULT_POOL_SIZE: usize = 16384;

/// Errors that can occur when allocating or resizing secure memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecMemError {
    /// The pool does not have enough room left.
    #[error("secure memory exhausted: requested {requested} bytes, {available} available")]
    PoolExhausted { requested: usize, available: usize },

    /// The system allocator refused the request.
    #[error("failed to allocate {0} bytes of secure memory")]
    AllocationFailed(usize),

    /// Growth would exceed the configured ceiling.
    #[error("requested {requested} bytes exceeds the limit of {limit} bytes")]
    LimitExceeded { requested: usize, limit: usize },

    /// A length larger than the buffer capacity was requested.
    #[error("length {len} exceeds buffer capacity {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },
}

struct Pool {
    size: usize,
    in_use: AtomicUsize,
    live: AtomicUsize,
}

/// Handle to a bounded pool of secure memory.
///
/// Cloning the handle shares the same pool.
///
/// # Example
///
/// ```
/// use secure_pinentry_core::secmem::SecureMemory;
///
/// let memory = SecureMemory::new(4096);
/// let mut buffer = memory.allocate(64).unwrap();
/// buffer.extend_from_slice(b"1234").unwrap();
/// assert_eq!(buffer.as_bytes(), b"1234");
/// assert_eq!(memory.in_use(), 64);
///
/// drop(buffer);
/// assert_eq!(memory.in_use(), 0);
/// ```
#[derive(Clone)]
pub struct SecureMemory {
    pool: Arc<Pool>,
}

impl SecureMemory {
    /// Create a pool that can hand out at most `pool_size` bytes at once.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: Arc::new(Pool {
                size: pool_size,
                in_use: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Total size of the pool.
    pub fn pool_size(&self) -> usize {
        self.pool.size
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.pool.in_use.load(Ordering::SeqCst)
    }

    /// Bytes still available for allocation.
    pub fn available(&self) -> usize {
        self.pool.size.saturating_sub(self.in_use())
    }

    /// Number of buffers that have not been dropped yet.
    pub fn live_buffers(&self) -> usize {
        self.pool.live.load(Ordering::SeqCst)
    }

    /// Allocate a zero-filled buffer with room for `capacity` bytes.
    ///
    /// The buffer starts with a logical length of zero.
    pub fn allocate(&self, capacity: usize) -> Result<SecureBuffer, SecMemError> {
        self.reserve(capacity)?;

        let mut storage = Vec::new();
        if storage.try_reserve_exact(capacity).is_err() {
            self.release(capacity);
            return Err(SecMemError::AllocationFailed(capacity));
        }
        storage.resize(capacity, 0);

        let mut buffer = SecureBuffer {
            bytes: storage.into_boxed_slice(),
            len: 0,
            locked: false,
            pool: Arc::clone(&self.pool),
        };
        buffer.try_lock_memory();
        self.pool.live.fetch_add(1, Ordering::SeqCst);

        trace!(capacity, in_use = self.in_use(), "Allocated secure buffer");
        Ok(buffer)
    }

    fn reserve(&self, amount: usize) -> Result<(), SecMemError> {
        let size = self.pool.size;
        self.pool
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(amount).filter(|total| *total <= size)
            })
            .map(|_| ())
            .map_err(|used| SecMemError::PoolExhausted {
                requested: amount,
                available: size.saturating_sub(used),
            })
    }

    fn release(&self, amount: usize) {
        self.pool.in_use.fetch_sub(amount, Ordering::SeqCst);
    }
}

impl Default for SecureMemory {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl std::fmt::Debug for SecureMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureMemory")
            .field("pool_size", &self.pool_size())
            .field("in_use", &self.in_use())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

/// Compute the capacity a buffer should grow to.
///
/// Doubles `current` until it holds at least `min`, then caps the result at
/// `max`. Fails when the capped size still cannot hold `min`. A request that
/// already fits returns `current` unchanged.
pub fn grown_capacity(current: usize, min: usize, max: usize) -> Result<usize, SecMemError> {
    if min <= current {
        return Ok(current);
    }

    let exceeded = SecMemError::LimitExceeded {
        requested: min,
        limit: max,
    };
    let mut target = current.max(1);
    while target < min {
        target = target.checked_mul(2).ok_or_else(|| exceeded.clone())?;
    }

    let capped = target.min(max);
    if capped < min {
        Err(exceeded)
    } else {
        Ok(capped)
    }
}

/// An owning byte buffer backed by secure memory.
///
/// The buffer has a fixed capacity and a logical length that never exceeds
/// it. Only the first `len()` bytes are considered content.
pub struct SecureBuffer {
    bytes: Box<[u8]>,
    len: usize,
    locked: bool,
    pool: Arc<Pool>,
}

impl SecureBuffer {
    fn try_lock_memory(&mut self) {
        if self.bytes.is_empty() {
            return;
        }

        let ptr = self.bytes.as_mut_ptr();
        let size = self.bytes.len();

        // Safety: the region is owned by this buffer and unlocked on drop
        let result = unsafe { memsec::mlock(ptr, size) };

        if result {
            self.locked = true;
        } else {
            // Common without CAP_IPC_LOCK or with a small RLIMIT_MEMLOCK
            debug!(size, "Failed to lock secure buffer memory");
        }
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical content is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer pages are locked in memory.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The logical content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The whole allocated storage, for writers that fill the buffer first
    /// and call [`set_len`](Self::set_len) afterwards.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Set the logical length.
    pub fn set_len(&mut self, len: usize) -> Result<(), SecMemError> {
        if len > self.capacity() {
            return Err(SecMemError::CapacityExceeded {
                len,
                capacity: self.capacity(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Append bytes without growing the buffer.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<(), SecMemError> {
        let end = self.len + data.len();
        if end > self.capacity() {
            return Err(SecMemError::CapacityExceeded {
                len: end,
                capacity: self.capacity(),
            });
        }
        self.bytes[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    /// Zero the whole storage and reset the length.
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.len = 0;
    }

    /// Move the content into a larger buffer from the same pool.
    ///
    /// The old storage is zeroed and released once the copy is done. A
    /// capacity not larger than the current one is a no-op.
    pub fn resize(&mut self, new_capacity: usize) -> Result<(), SecMemError> {
        if new_capacity <= self.capacity() {
            return Ok(());
        }

        let memory = SecureMemory {
            pool: Arc::clone(&self.pool),
        };
        let mut replacement = memory.allocate(new_capacity)?;
        replacement.bytes[..self.len].copy_from_slice(self.as_bytes());
        replacement.len = self.len;

        std::mem::swap(self, &mut replacement);
        Ok(())
    }

    /// Grow so that at least `min` bytes fit, following [`grown_capacity`].
    ///
    /// Returns the new capacity.
    pub fn grow(&mut self, min: usize, max: usize) -> Result<usize, SecMemError> {
        let target = grown_capacity(self.capacity(), min, max)?;
        self.resize(target)?;
        debug!(capacity = target, "Grew secure buffer");
        Ok(target)
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("bytes", &"[REDACTED]")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("locked", &self.locked)
            .finish()
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        let capacity = self.bytes.len();
        self.bytes.zeroize();
        self.len = 0;

        if self.locked {
            // Safety: unlocking the region locked in try_lock_memory
            unsafe {
                memsec::munlock(self.bytes.as_mut_ptr(), capacity);
            }
        }

        self.pool.in_use.fetch_sub(capacity, Ordering::SeqCst);
        self.pool.live.fetch_sub(1, Ordering::SeqCst);
        trace!(capacity, "Released secure buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_accounts_against_pool() {
        let memory = SecureMemory::new(1024);
        let buffer = memory.allocate(256).unwrap();

        assert_eq!(buffer.capacity(), 256);
        assert!(buffer.is_empty());
        assert_eq!(memory.in_use(), 256);
        assert_eq!(memory.available(), 768);
        assert_eq!(memory.live_buffers(), 1);
    }

    #[test]
    fn drop_returns_memory_to_pool() {
        let memory = SecureMemory::new(1024);
        let buffer = memory.allocate(512).unwrap();
        drop(buffer);

        assert_eq!(memory.in_use(), 0);
        assert_eq!(memory.live_buffers(), 0);
    }

    #[test]
    fn allocate_beyond_pool_fails() {
        let memory = SecureMemory::new(1024);
        let _held = memory.allocate(1000).unwrap();

        let err = memory.allocate(100).unwrap_err();
        assert_eq!(
            err,
            SecMemError::PoolExhausted {
                requested: 100,
                available: 24
            }
        );
        assert_eq!(memory.in_use(), 1000);
    }

    #[test]
    fn new_buffer_is_zero_filled() {
        let memory = SecureMemory::new(64);
        let mut buffer = memory.allocate(16).unwrap();
        assert!(buffer.storage_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn extend_respects_capacity() {
        let memory = SecureMemory::new(64);
        let mut buffer = memory.allocate(4).unwrap();

        buffer.extend_from_slice(b"12").unwrap();
        buffer.extend_from_slice(b"34").unwrap();
        assert_eq!(buffer.as_bytes(), b"1234");

        let err = buffer.extend_from_slice(b"5").unwrap_err();
        assert_eq!(err, SecMemError::CapacityExceeded { len: 5, capacity: 4 });
        assert_eq!(buffer.as_bytes(), b"1234");
    }

    #[test]
    fn set_len_cannot_exceed_capacity() {
        let memory = SecureMemory::new(64);
        let mut buffer = memory.allocate(8).unwrap();

        buffer.storage_mut()[..3].copy_from_slice(b"abc");
        buffer.set_len(3).unwrap();
        assert_eq!(buffer.as_bytes(), b"abc");

        assert!(buffer.set_len(9).is_err());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn clear_zeroes_storage() {
        let memory = SecureMemory::new(64);
        let mut buffer = memory.allocate(8).unwrap();
        buffer.extend_from_slice(b"secret").unwrap();

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.storage_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn grown_capacity_doubles_until_minimum_fits() {
        assert_eq!(grown_capacity(2048, 2049, 8192), Ok(4096));
        assert_eq!(grown_capacity(2048, 5000, 8192), Ok(8192));
        assert_eq!(grown_capacity(2048, 100, 8192), Ok(2048));
    }

    #[test]
    fn grown_capacity_is_capped_by_maximum() {
        assert_eq!(grown_capacity(2048, 3000, 3500), Ok(3500));
        assert_eq!(
            grown_capacity(2048, 9000, 8192),
            Err(SecMemError::LimitExceeded {
                requested: 9000,
                limit: 8192
            })
        );
        assert!(grown_capacity(8192, 8193, 8192).is_err());
    }

    #[test]
    fn grown_capacity_from_zero() {
        assert_eq!(grown_capacity(0, 3, 16), Ok(4));
    }

    #[test]
    fn grow_preserves_content_and_releases_old_storage() {
        let memory = SecureMemory::new(16384);
        let mut buffer = memory.allocate(2048).unwrap();
        buffer.extend_from_slice(b"1234").unwrap();

        let capacity = buffer.grow(2049, 8192).unwrap();

        assert_eq!(capacity, 4096);
        assert_eq!(buffer.capacity(), 4096);
        assert_eq!(buffer.as_bytes(), b"1234");
        assert_eq!(memory.in_use(), 4096);
        assert_eq!(memory.live_buffers(), 1);
    }

    #[test]
    fn grow_fails_when_pool_cannot_hold_both_buffers() {
        let memory = SecureMemory::new(6000);
        let mut buffer = memory.allocate(2048).unwrap();
        buffer.extend_from_slice(b"99").unwrap();

        // 2048 + 4096 > 6000 while the copy is in flight
        let err = buffer.grow(2049, 8192).unwrap_err();
        assert!(matches!(err, SecMemError::PoolExhausted { .. }));
        assert_eq!(buffer.capacity(), 2048);
        assert_eq!(buffer.as_bytes(), b"99");
        assert_eq!(memory.in_use(), 2048);
    }

    #[test]
    fn zero_capacity_buffer() {
        let memory = SecureMemory::new(16);
        let buffer = memory.allocate(0).unwrap();
        assert_eq!(buffer.capacity(), 0);
        assert!(!buffer.is_locked());
    }

    #[test]
    fn debug_redacts_content() {
        let memory = SecureMemory::new(64);
        let mut buffer = memory.allocate(16).unwrap();
        buffer.extend_from_slice(b"hunter2").unwrap();

        let debug_output = format!("{:?}", buffer);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
    }

    #[test]
    fn cloned_handles_share_the_pool() {
        let memory = SecureMemory::new(100);
        let other = memory.clone();
        let _buffer = other.allocate(60).unwrap();

        assert_eq!(memory.in_use(), 60);
        assert!(memory.allocate(50).is_err());
    }
}
