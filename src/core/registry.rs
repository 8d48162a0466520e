//! Registry of authenticated container headers
//!
//! Each container's header+directory region is copied out of storage and
//! authenticated at most once per boot session; later lookups hit the cached
//! copy. The table has a fixed capacity and only grows by appending. The one
//! removal, [`RegistryGuard::unregister_last`], rolls back a registration
//! whose authentication failed.
//!
//! The table sits behind a mutex. A caller resolving a container holds the
//! [`RegistryGuard`] across the whole miss path (lookup, fetch, authenticate,
//! append or roll back), so no other caller can observe a row that has not
//! been authenticated yet.

use crate::error::{BootError, Result};
use crate::header::{ContainerHeader, CONTAINER_HEADER_LEN};
use crate::memory::MemoryPool;
use crate::storage::BootMedium;
use crate::tag::Tag;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info};

/// Default number of containers a registry holds
pub const DEFAULT_CAPACITY: usize = 8;

/// Index of a registered container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryHandle(usize);

impl RegistryHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A registered container
#[derive(Debug)]
pub struct RegisteredContainer {
    pub signature: Tag,
    /// Storage address of the container start
    pub storage_base: u64,
    /// Copy of the header+directory region, exactly `data_offset` bytes
    cached_header: Vec<u8>,
}

impl RegisteredContainer {
    pub fn header_region(&self) -> &[u8] {
        &self.cached_header
    }
}

#[derive(Debug)]
struct Table {
    capacity: usize,
    rows: Vec<RegisteredContainer>,
}

/// Process-wide container registry for one boot session
#[derive(Debug)]
pub struct ContainerRegistry {
    table: Mutex<Option<Table>>,
}

impl ContainerRegistry {
    /// A registry ready to hold up to `capacity` containers
    pub fn new(capacity: usize) -> Self {
        let registry = Self::uninitialized();
        registry.initialize(capacity);
        registry
    }

    /// A registry that rejects every operation with `NotReady` until
    /// [`ContainerRegistry::initialize`] is called
    pub fn uninitialized() -> Self {
        ContainerRegistry {
            table: Mutex::new(None),
        }
    }

    /// Set up the table. Re-initializing an already initialized registry has
    /// no effect.
    pub fn initialize(&self, capacity: usize) {
        let mut table = self.table.lock();
        if table.is_none() {
            debug!(capacity, "Container registry initialized");
            *table = Some(Table {
                capacity,
                rows: Vec::with_capacity(capacity),
            });
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.table.lock().is_some()
    }

    /// Lock the table for a sequence of operations
    pub fn lock(&self) -> Result<RegistryGuard<'_>> {
        MutexGuard::try_map(self.table.lock(), Option::as_mut)
            .map(|table| RegistryGuard { table })
            .map_err(|_| BootError::NotReady)
    }

    pub fn len(&self) -> usize {
        self.table.lock().as_ref().map_or(0, |t| t.rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().as_ref().map_or(0, |t| t.capacity)
    }

    pub fn contains(&self, signature: Tag) -> bool {
        self.lock()
            .map(|guard| guard.find(signature).is_some())
            .unwrap_or(false)
    }

    /// Signatures of all registered containers, in registration order
    pub fn signatures(&self) -> Vec<Tag> {
        self.table
            .lock()
            .as_ref()
            .map(|t| t.rows.iter().map(|r| r.signature).collect())
            .unwrap_or_default()
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Exclusive access to an initialized registry
pub struct RegistryGuard<'r> {
    table: MappedMutexGuard<'r, Table>,
}

impl<'r> RegistryGuard<'r> {
    fn table(&self) -> &Table {
        &self.table
    }

    fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    /// Copy the header+directory region of the container at `base` and append it
    ///
    /// Reads the fixed header first to learn `data_offset`, then copies exactly
    /// that many bytes into a buffer from `pool`. A header whose signature is
    /// not `expected` is `CorruptHeader`, whatever else is registered. The row
    /// is not authenticated; the caller authenticates it and calls
    /// [`RegistryGuard::unregister_last`] on failure.
    pub fn register(
        &mut self,
        medium: &dyn BootMedium,
        pool: &dyn MemoryPool,
        expected: Tag,
        base: u64,
    ) -> Result<RegistryHandle> {
        {
            let table = self.table();
            if table.rows.len() >= table.capacity {
                return Err(BootError::OutOfResources(format!(
                    "container registry is full ({} entries)",
                    table.capacity
                )));
            }
        }

        let header = ContainerHeader::from_bytes(medium.slice(base, CONTAINER_HEADER_LEN)?)?;
        if header.signature != expected {
            return Err(BootError::CorruptHeader(format!(
                "flash region for {} holds container {}",
                expected, header.signature
            )));
        }
        if self.find(header.signature).is_some() {
            return Err(BootError::DuplicateContainer(header.signature));
        }

        let len = header.data_offset as usize;
        let source = medium.slice(base, len).map_err(|_| {
            BootError::CorruptHeader(format!(
                "container {} data offset {} runs past the boot medium",
                header.signature, len
            ))
        })?;
        let mut cached_header = pool.allocate(len)?;
        cached_header.copy_from_slice(source);

        let table = self.table_mut();
        table.rows.push(RegisteredContainer {
            signature: header.signature,
            storage_base: base,
            cached_header,
        });
        let handle = RegistryHandle(table.rows.len() - 1);
        info!(
            signature = %header.signature,
            base = format_args!("0x{:x}", base),
            len,
            "Registered container"
        );
        Ok(handle)
    }

    /// Remove the most recently registered container and release its buffer
    pub fn unregister_last(&mut self, pool: &dyn MemoryPool) -> Result<()> {
        let row = self
            .table_mut()
            .rows
            .pop()
            .ok_or_else(|| BootError::NotFound("container registry is empty".to_string()))?;
        info!(signature = %row.signature, "Unregistered container");
        pool.release(row.cached_header);
        Ok(())
    }

    /// Find a registered container; the first match wins
    pub fn find(&self, signature: Tag) -> Option<RegistryHandle> {
        self.table()
            .rows
            .iter()
            .position(|row| row.signature == signature)
            .map(RegistryHandle)
    }

    pub fn get(&self, handle: RegistryHandle) -> Option<&RegisteredContainer> {
        self.table().rows.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.table().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
