//! Normal and temporary memory pools
//!
//! The environment hands the loader two allocators. The normal pool backs
//! allocations that outlive a call (cached container headers, decompressed
//! components handed to the caller). The temporary pool backs scratch buffers
//! that live for a single load and are always released before it returns.

use crate::error::{BootError, Result};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::trace;

/// An allocator the loader draws buffers from
pub trait MemoryPool: Send + Sync {
    /// Allocate `len` zeroed bytes
    fn allocate(&self, len: usize) -> Result<Vec<u8>>;

    /// Return a buffer obtained from [`MemoryPool::allocate`]
    fn release(&self, buffer: Vec<u8>);
}

/// Allocation counters for a [`BudgetPool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: u64,
    pub releases: u64,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
}

impl PoolStats {
    /// Number of buffers handed out and not yet released
    pub fn outstanding(&self) -> u64 {
        self.allocations - self.releases
    }
}

/// Heap-backed pool with an optional byte budget
pub struct BudgetPool {
    name: &'static str,
    limit: Option<usize>,
    stats: Mutex<PoolStats>,
}

impl BudgetPool {
    pub fn new(name: &'static str, limit: Option<usize>) -> Self {
        BudgetPool {
            name,
            limit,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    pub fn unbounded(name: &'static str) -> Self {
        Self::new(name, None)
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl MemoryPool for BudgetPool {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        let mut stats = self.stats.lock();

        let in_use = stats.bytes_in_use.checked_add(len).ok_or_else(|| {
            BootError::OutOfResources(format!("{} pool: size overflow", self.name))
        })?;
        if let Some(limit) = self.limit {
            if in_use > limit {
                return Err(BootError::OutOfResources(format!(
                    "{} pool: {} bytes requested, {} of {} in use",
                    self.name, len, stats.bytes_in_use, limit
                )));
            }
        }

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|e| {
            BootError::OutOfResources(format!("{} pool: {}", self.name, e))
        })?;
        buffer.resize(len, 0);

        stats.allocations += 1;
        stats.bytes_in_use = in_use;
        stats.peak_bytes = stats.peak_bytes.max(in_use);
        trace!(pool = self.name, len, "allocated");
        Ok(buffer)
    }

    fn release(&self, buffer: Vec<u8>) {
        let mut stats = self.stats.lock();
        stats.releases += 1;
        stats.bytes_in_use = stats.bytes_in_use.saturating_sub(buffer.len());
        trace!(pool = self.name, len = buffer.len(), "released");
    }
}

/// The pair of pools supplied by the environment
#[derive(Clone)]
pub struct MemoryPools {
    pub normal: Arc<dyn MemoryPool>,
    pub temporary: Arc<dyn MemoryPool>,
}

impl MemoryPools {
    pub fn new(normal: Arc<dyn MemoryPool>, temporary: Arc<dyn MemoryPool>) -> Self {
        MemoryPools { normal, temporary }
    }

    /// Two heap pools with the given byte budgets
    pub fn with_limits(normal: Option<usize>, temporary: Option<usize>) -> Self {
        MemoryPools {
            normal: Arc::new(BudgetPool::new("normal", normal)),
            temporary: Arc::new(BudgetPool::new("temporary", temporary)),
        }
    }
}

impl Default for MemoryPools {
    fn default() -> Self {
        Self::with_limits(None, None)
    }
}

/// A temporary-pool buffer released exactly once when dropped
pub struct ScratchBuffer<'p> {
    pool: &'p dyn MemoryPool,
    buffer: Vec<u8>,
}

impl<'p> ScratchBuffer<'p> {
    pub fn allocate(pool: &'p dyn MemoryPool, len: usize) -> Result<Self> {
        let buffer = pool.allocate(len)?;
        Ok(ScratchBuffer { pool, buffer })
    }
}

impl Deref for ScratchBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

/// Where decompressed output lands
///
/// A caller either lends a buffer (`Borrowed`) or lets the loader allocate
/// one from the normal pool (`Owned`), whose ownership passes to the caller
/// on success.
#[derive(Debug)]
pub enum Destination<'d> {
    Owned(Vec<u8>),
    Borrowed(&'d mut [u8]),
}

impl<'d> Destination<'d> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Destination::Owned(buffer) => buffer,
            Destination::Borrowed(buffer) => buffer,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Destination::Owned(buffer) => buffer,
            Destination::Borrowed(buffer) => buffer,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Destination::Owned(_))
    }

    /// Take the owned buffer, if the loader allocated one
    pub fn into_owned(self) -> Option<Vec<u8>> {
        match self {
            Destination::Owned(buffer) => Some(buffer),
            Destination::Borrowed(_) => None,
        }
    }

    /// Give an owned buffer back to `pool`; borrowed buffers are left alone
    pub(crate) fn release_to(self, pool: &dyn MemoryPool) {
        if let Destination::Owned(buffer) = self {
            pool.release(buffer);
        }
    }
}
