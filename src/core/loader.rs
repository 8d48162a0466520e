//! Component loader: locate, authenticate, decompress, deliver
//!
//! A load moves through a fixed sequence of stages and stops at the first
//! failure; nothing is retried internally.
//!
//! ```text
//! Start ─► ContainerResolved ─► DirectoryResolved ─┐
//!   │                                              ├─► PayloadValidated ─► Authenticated ─► Decompressed ─► Done
//!   └──────────── flat (typed) lookup ─────────────┘
//! ```
//!
//! Components are addressed either inside a container ([`ComponentId::ByContainer`])
//! or directly through the flash map by type ([`ComponentId::ByType`]). Container
//! headers are authenticated once and cached in the [`ContainerRegistry`]; the
//! component payload itself is copied into a scratch buffer, authenticated there,
//! and decoded from that copy.

use crate::auth::{AuthEngine, Authenticator, HashStore, SoftwareAuth};
use crate::compression::{DecoderSet, Decompressor};
use crate::config::LoaderConfig;
use crate::directory::{find_entry, header_span_length, DirectoryWalker};
use crate::error::{BootError, Result};
use crate::header::{
    align_up, AuthType, CompressedHeader, ContainerHeader, AUTH_DATA_ALIGN, COMPRESSED_HEADER_LEN,
};
use crate::memory::{Destination, MemoryPools, ScratchBuffer};
use crate::registry::{ContainerRegistry, RegisteredContainer, RegistryGuard, RegistryHandle};
use crate::storage::{BootMedium, FlashLocator, Region};
use crate::tag::Tag;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Extra bytes added to every scratch allocation
const SCRATCH_PADDING: usize = 16;

/// Components addressed directly through the flash map
///
/// Equality and hashing go by flash signature, so `Region(SG1A)` and
/// `Stage1A` name the same component.
#[derive(Debug, Clone, Copy)]
pub enum ComponentType {
    Stage1A,
    Stage1B,
    Stage2,
    Payload,
    FirmwareUpdate,
    /// Any other flash-map region
    Region(Tag),
}

impl ComponentType {
    /// Flash-map signature the component is stored under
    pub fn flash_signature(self) -> Tag {
        match self {
            ComponentType::Stage1A => Tag::new(b"SG1A"),
            ComponentType::Stage1B => Tag::new(b"SG1B"),
            ComponentType::Stage2 => Tag::new(b"SG02"),
            ComponentType::Payload => Tag::new(b"PYLD"),
            ComponentType::FirmwareUpdate => Tag::new(b"FWUP"),
            ComponentType::Region(tag) => tag,
        }
    }

    pub fn from_flash_signature(signature: Tag) -> Self {
        match signature.as_bytes() {
            b"SG1A" => ComponentType::Stage1A,
            b"SG1B" => ComponentType::Stage1B,
            b"SG02" => ComponentType::Stage2,
            b"PYLD" => ComponentType::Payload,
            b"FWUP" => ComponentType::FirmwareUpdate,
            _ => ComponentType::Region(signature),
        }
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.flash_signature() == other.flash_signature()
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.flash_signature().hash(state);
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flash_signature())
    }
}

/// Which component to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    /// Component `name` inside the container signed as `container`
    ByContainer { container: Tag, name: Tag },
    /// Stand-alone component located by its flash signature
    ByType { component_type: ComponentType },
}

impl ComponentId {
    pub fn in_container(container: Tag, name: Tag) -> Self {
        ComponentId::ByContainer { container, name }
    }

    pub fn by_type(component_type: ComponentType) -> Self {
        ComponentId::ByType { component_type }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::ByContainer { container, name } => write!(f, "{}/{}", container, name),
            ComponentId::ByType { component_type } => write!(f, "flash:{}", component_type),
        }
    }
}

/// Progress of a single load, reported through tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Start,
    ContainerResolved,
    DirectoryResolved,
    PayloadValidated,
    Authenticated,
    Decompressed,
    Done,
}

/// A decompressed component handed to the caller
#[derive(Debug)]
pub struct LoadedComponent<'d> {
    buffer: Destination<'d>,
    len: usize,
}

impl<'d> LoadedComponent<'d> {
    /// The decompressed bytes, exactly `len()` long
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.len]
    }

    /// Decompressed length reported by the decoder
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the loader allocated the buffer
    pub fn is_owned(&self) -> bool {
        self.buffer.is_owned()
    }

    /// Take the bytes as a vector, copying if the caller lent the buffer
    ///
    /// An owned buffer leaves pool accounting here: the normal pool keeps
    /// counting it as in use. Use [`ComponentLoader::release`] for buffers
    /// that should go back to the pool.
    pub fn into_vec(self) -> Vec<u8> {
        let len = self.len;
        match self.buffer {
            Destination::Owned(mut buffer) => {
                buffer.truncate(len);
                buffer
            }
            Destination::Borrowed(buffer) => buffer[..len].to_vec(),
        }
    }
}

/// One row of a container directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentInfo {
    pub name: Tag,
    /// Offset relative to the container payload area
    pub offset: u32,
    pub size: u32,
    pub auth_type: u8,
    pub hash_size: u8,
}

/// Where a component lives and how it must be authenticated
#[derive(Debug)]
struct ResolvedComponent {
    region: Region,
    auth_type: u8,
    expected_digest: Option<Vec<u8>>,
}

/// Loads authenticated components from a boot medium
pub struct ComponentLoader {
    medium: Arc<dyn BootMedium>,
    locator: Arc<dyn FlashLocator>,
    registry: Arc<ContainerRegistry>,
    engine: Arc<dyn AuthEngine>,
    decoder: Arc<dyn Decompressor>,
    pools: MemoryPools,
    hash_store: HashStore,
    verified_boot: bool,
    minimum_svn: u8,
}

impl ComponentLoader {
    /// Build a loader with software crypto and the standard decoders
    pub fn new(
        medium: Arc<dyn BootMedium>,
        locator: Arc<dyn FlashLocator>,
        config: &LoaderConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ComponentLoader {
            medium,
            locator,
            registry: Arc::new(ContainerRegistry::new(config.registry_capacity)),
            engine: Arc::new(SoftwareAuth),
            decoder: Arc::new(DecoderSet::standard()),
            pools: config.memory_pools(),
            hash_store: config.hash_store()?,
            verified_boot: config.verified_boot,
            minimum_svn: config.minimum_svn,
        })
    }

    /// Share an existing registry, e.g. one owned by the boot session
    pub fn with_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_auth_engine(mut self, engine: Arc<dyn AuthEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_decompressor(mut self, decoder: Arc<dyn Decompressor>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_pools(mut self, pools: MemoryPools) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_hash_store(mut self, hash_store: HashStore) -> Self {
        self.hash_store = hash_store;
        self
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    pub fn pools(&self) -> &MemoryPools {
        &self.pools
    }

    pub fn verified_boot(&self) -> bool {
        self.verified_boot
    }

    /// Resolve a component's storage region without loading it
    ///
    /// In container mode this authenticates the container header if it is not
    /// cached yet.
    pub fn locate_component_region(&self, id: &ComponentId) -> Result<Region> {
        self.resolve(id).map(|resolved| resolved.region)
    }

    /// Authenticate and decompress a component
    ///
    /// With `dest` the output is written into the caller's buffer, which must
    /// hold the decompressed size; otherwise a buffer is allocated from the
    /// normal pool and handed to the caller.
    pub fn load_component<'d>(
        &self,
        id: &ComponentId,
        dest: Option<&'d mut [u8]>,
    ) -> Result<LoadedComponent<'d>> {
        self.stage(id, LoadStage::Start);
        let resolved = self.resolve(id)?;

        let size = usize::try_from(resolved.region.size).map_err(|_| {
            BootError::OutOfResources(format!("{} is too large to load", id))
        })?;
        let stored = self.medium.slice(resolved.region.base, size)?;

        let header = CompressedHeader::from_bytes(stored)?;
        let signed_len = header
            .signed_len()
            .filter(|&len| len <= size)
            .ok_or_else(|| {
                BootError::Unsupported(format!(
                    "{} declares {} compressed bytes but only {} are stored",
                    id, header.compressed_size, size
                ))
            })?;
        let info = self
            .decoder
            .probe(&header, &stored[COMPRESSED_HEADER_LEN..signed_len])?;
        self.stage(id, LoadStage::PayloadValidated);

        if let Some(buffer) = dest.as_deref() {
            if buffer.len() < info.decompressed_len {
                return Err(BootError::BufferTooSmall {
                    required: info.decompressed_len,
                    provided: buffer.len(),
                });
            }
        }

        let copy_len = align_up(size, AUTH_DATA_ALIGN)
            .ok_or_else(|| BootError::OutOfResources(format!("{} is too large to load", id)))?;
        let scratch_len = copy_len
            .checked_add(info.scratch_len)
            .and_then(|len| len.checked_add(SCRATCH_PADDING))
            .ok_or_else(|| {
                BootError::OutOfResources(format!("{} scratch size overflows", id))
            })?;
        let mut scratch = ScratchBuffer::allocate(self.pools.temporary.as_ref(), scratch_len)?;
        let (copy, work) = scratch.split_at_mut(copy_len);
        copy[..size].copy_from_slice(stored);
        let copy: &[u8] = copy;

        let tag_start = align_up(signed_len, AUTH_DATA_ALIGN).unwrap_or(usize::MAX);
        let auth_tag = copy.get(tag_start..size).unwrap_or(&[]);
        self.authenticator().authenticate(
            &copy[..signed_len],
            resolved.auth_type,
            auth_tag,
            resolved.expected_digest.as_deref(),
        )?;
        self.check_svn(id, header.svn)?;
        self.stage(id, LoadStage::Authenticated);

        let mut destination = match dest {
            Some(buffer) => Destination::Borrowed(buffer),
            None => Destination::Owned(self.pools.normal.allocate(info.decompressed_len)?),
        };
        let decoded = self.decoder.decode(
            &header,
            &copy[COMPRESSED_HEADER_LEN..signed_len],
            destination.as_mut_slice(),
            &mut work[..info.scratch_len],
        );
        let len = match decoded {
            Ok(len) => len,
            Err(e) => {
                warn!(component = %id, error = %e, "Decompression failed");
                destination.release_to(self.pools.normal.as_ref());
                return Err(e);
            }
        };
        self.stage(id, LoadStage::Decompressed);

        info!(component = %id, len, "Component loaded");
        self.stage(id, LoadStage::Done);
        Ok(LoadedComponent {
            buffer: destination,
            len,
        })
    }

    /// Return a loaded component's buffer to the normal pool
    pub fn release(&self, component: LoadedComponent<'_>) {
        component.buffer.release_to(self.pools.normal.as_ref());
    }

    /// Directory of an authenticated container
    pub fn list_components(&self, container: Tag) -> Result<Vec<ComponentInfo>> {
        let mut guard = self.registry.lock()?;
        let handle = self.resolve_container(&mut guard, container)?;
        let row = registered(&guard, handle)?;

        let components = DirectoryWalker::new(row.header_region())?
            .map(|entry| {
                entry.map(|entry| ComponentInfo {
                    name: entry.name(),
                    offset: entry.offset(),
                    size: entry.size(),
                    auth_type: entry.auth_type(),
                    hash_size: entry.entry().hash_size,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(container = %container, count = components.len(), "Listed components");
        Ok(components)
    }

    fn resolve(&self, id: &ComponentId) -> Result<ResolvedComponent> {
        match *id {
            ComponentId::ByContainer { container, name } => {
                self.resolve_in_container(id, container, name)
            }
            ComponentId::ByType { component_type } => self.resolve_flat(id, component_type),
        }
    }

    fn resolve_in_container(
        &self,
        id: &ComponentId,
        container: Tag,
        name: Tag,
    ) -> Result<ResolvedComponent> {
        let mut guard = self.registry.lock()?;
        let handle = self.resolve_container(&mut guard, container)?;
        self.stage(id, LoadStage::ContainerResolved);

        let row = registered(&guard, handle)?;
        let region = row.header_region();
        let header = ContainerHeader::from_bytes(region)?;
        let entry = find_entry(region, name).ok_or_else(|| {
            BootError::NotFound(format!("component {} not in container {}", name, container))
        })?;

        let end = entry.offset().checked_add(entry.size());
        if end.map_or(true, |end| end > header.data_size) {
            return Err(BootError::CorruptHeader(format!(
                "component {} at 0x{:x}+0x{:x} lies outside the {} byte payload area of {}",
                name,
                entry.offset(),
                entry.size(),
                header.data_size,
                container
            )));
        }

        let base = row.storage_base + u64::from(header.data_offset) + u64::from(entry.offset());
        let resolved = ResolvedComponent {
            region: Region::new(base, u64::from(entry.size())),
            auth_type: entry.auth_type(),
            expected_digest: Some(entry.hash_data().to_vec()),
        };
        self.stage(id, LoadStage::DirectoryResolved);
        Ok(resolved)
    }

    fn resolve_flat(
        &self,
        id: &ComponentId,
        component_type: ComponentType,
    ) -> Result<ResolvedComponent> {
        let signature = component_type.flash_signature();
        let region = self.locator.locate_region(signature)?;
        let auth_type = if self.verified_boot {
            AuthType::Sha256
        } else {
            AuthType::None
        };
        trace!(component = %id, base = region.base, size = region.size, "Flat component located");
        self.stage(id, LoadStage::DirectoryResolved);
        Ok(ResolvedComponent {
            region,
            auth_type: auth_type as u8,
            expected_digest: self.hash_store.digest(signature).map(<[u8]>::to_vec),
        })
    }

    /// Find a cached container, or fetch, authenticate and register it
    ///
    /// The caller's guard covers the whole miss path, so a failed
    /// authentication is rolled back before anyone else can see the row.
    fn resolve_container(
        &self,
        guard: &mut RegistryGuard<'_>,
        signature: Tag,
    ) -> Result<RegistryHandle> {
        if let Some(handle) = guard.find(signature) {
            trace!(container = %signature, "Registry hit");
            return Ok(handle);
        }

        debug!(container = %signature, "Registry miss");
        let region = self.locator.locate_region(signature)?;
        let handle = guard.register(
            self.medium.as_ref(),
            self.pools.normal.as_ref(),
            signature,
            region.base,
        )?;

        let outcome = match guard.get(handle) {
            Some(row) => self.authenticate_container(row, signature, region),
            None => Err(BootError::NotFound(format!(
                "container {} vanished during registration",
                signature
            ))),
        };

        if let Err(e) = outcome {
            warn!(container = %signature, error = %e, "Container rejected");
            guard.unregister_last(self.pools.normal.as_ref())?;
            return Err(e);
        }
        Ok(handle)
    }

    fn authenticate_container(
        &self,
        row: &RegisteredContainer,
        signature: Tag,
        region: Region,
    ) -> Result<()> {
        let bytes = row.header_region();
        let header = ContainerHeader::from_bytes(bytes)?;
        let extent = u64::from(header.data_offset) + u64::from(header.data_size);
        if extent > region.size {
            return Err(BootError::CorruptHeader(format!(
                "container {} spans {} bytes but its region is {}",
                signature, extent, region.size
            )));
        }

        let span = header_span_length(bytes)? as usize;
        let tag_start = align_up(span, AUTH_DATA_ALIGN).unwrap_or(usize::MAX);
        let auth_tag = bytes.get(tag_start..).unwrap_or(&[]);

        self.authenticator().authenticate(
            &bytes[..span],
            header.auth_type,
            auth_tag,
            self.hash_store.digest(signature),
        )?;
        self.check_svn(&signature, header.svn)?;

        info!(container = %signature, span, svn = header.svn, "Container authenticated");
        Ok(())
    }

    fn check_svn(&self, what: &dyn fmt::Display, svn: u8) -> Result<()> {
        if svn < self.minimum_svn {
            return Err(BootError::SecurityViolation(format!(
                "{} has security version {}, minimum is {}",
                what, svn, self.minimum_svn
            )));
        }
        Ok(())
    }

    fn authenticator(&self) -> Authenticator<'_> {
        Authenticator::new(self.engine.as_ref(), &self.hash_store, self.verified_boot)
    }

    fn stage(&self, id: &ComponentId, stage: LoadStage) {
        debug!(component = %id, ?stage, "Load stage");
    }
}

fn registered<'g>(
    guard: &'g RegistryGuard<'_>,
    handle: RegistryHandle,
) -> Result<&'g RegisteredContainer> {
    guard
        .get(handle)
        .ok_or_else(|| BootError::NotFound(format!("registry slot {}", handle.index())))
}
