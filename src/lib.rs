//! # Bootcart - Verified Component Loading for Pre-Boot Firmware
//!
//! `bootcart` loads named components out of signed containers on a boot
//! medium. Nothing read from storage is trusted until it has been
//! authenticated:
//!
//! - **Container registry**: each container header is fetched and authenticated
//!   once per boot session, then served from a cached copy
//! - **Directory walk**: variable-length component entries are walked in order,
//!   never indexed, and never read past the container's data offset
//! - **Authenticate, then decompress**: the compressed span is copied into
//!   scratch memory, checked there (SHA-256/384 or Ed25519), and only then
//!   handed to the LZ4 / Zstd decoder
//! - **Verified boot**: with the policy enabled, unauthenticated components are
//!   rejected outright
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bootcart::{ComponentId, LoaderBuilder, Result, Tag};
//!
//! # fn main() -> Result<()> {
//! let loader = LoaderBuilder::new()
//!     .image("firmware.bin")
//!     .flash_map("flash.toml")
//!     .build()?;
//!
//! let id = ComponentId::in_container(Tag::new(b"IPFW"), Tag::new(b"PYBK"));
//! let component = loader.load_component(&id, None)?;
//! println!("loaded {} bytes", component.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Caller-supplied buffers
//!
//! ```rust,no_run
//! use bootcart::{BootError, ComponentId, ComponentType, LoaderBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let loader = LoaderBuilder::new()
//!     .image("firmware.bin")
//!     .flash_map("flash.toml")
//!     .config("loader.toml")
//!     .build()?;
//!
//! let mut buffer = vec![0u8; 64 * 1024];
//! let id = ComponentId::by_type(ComponentType::Stage2);
//! match loader.load_component(&id, Some(&mut buffer[..])) {
//!     Ok(stage2) => println!("stage 2 is {} bytes", stage2.len()),
//!     Err(BootError::BufferTooSmall { required, .. }) => println!("need {} bytes", required),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    auth, compression, config, directory, error, header, loader, memory, registry, storage, tag,
};

pub use crate::core::{
    auth::{AuthEngine, Authenticator, HashAlgorithm, HashStore, SignatureAlgorithm, SoftwareAuth},
    compression::{compress, CompressionMethod, DecodeInfo, DecoderSet, Decompressor},
    config::{LoaderConfig, PoolLimits},
    directory::{find_entry, header_span_length, DirectoryWalker, EntryRef},
    error::{BootError, Result},
    header::{AuthType, ComponentEntry, CompressedHeader, ContainerHeader},
    loader::{ComponentId, ComponentInfo, ComponentLoader, ComponentType, LoadStage, LoadedComponent},
    memory::{BudgetPool, Destination, MemoryPool, MemoryPools, PoolStats},
    registry::{ContainerRegistry, RegistryHandle},
    storage::{BootMedium, FlashLocator, FlashMap, MappedImage, MemoryImage, Region},
    tag::Tag,
};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for a [`ComponentLoader`] over an image file on disk
///
/// # Examples
///
/// ```rust,no_run
/// use bootcart::LoaderBuilder;
///
/// # fn main() -> bootcart::Result<()> {
/// let loader = LoaderBuilder::new()
///     .image("firmware.bin")
///     .flash_map("flash.toml")
///     .verified_boot(false)  // development images only
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct LoaderBuilder {
    image: Option<PathBuf>,
    flash_map: Option<PathBuf>,
    config: Option<PathBuf>,
    verified_boot: Option<bool>,
}

impl LoaderBuilder {
    /// Create a new LoaderBuilder with default settings
    pub fn new() -> Self {
        LoaderBuilder {
            image: None,
            flash_map: None,
            config: None,
            verified_boot: None,
        }
    }

    /// Boot medium image, memory-mapped read-only
    pub fn image<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.image = Some(path.into());
        self
    }

    /// Flash map TOML resolving signatures to regions
    pub fn flash_map<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.flash_map = Some(path.into());
        self
    }

    /// Loader configuration TOML; defaults apply when omitted
    pub fn config<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config = Some(path.into());
        self
    }

    /// Override the configured verified-boot policy
    pub fn verified_boot(mut self, enabled: bool) -> Self {
        self.verified_boot = Some(enabled);
        self
    }

    pub fn build(self) -> Result<ComponentLoader> {
        let image = self
            .image
            .ok_or_else(|| BootError::Config("image path is required".to_string()))?;
        let flash_map = self
            .flash_map
            .ok_or_else(|| BootError::Config("flash map path is required".to_string()))?;

        let mut config = match &self.config {
            Some(path) => LoaderConfig::load(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(enabled) = self.verified_boot {
            config.verified_boot = enabled;
        }

        let medium = MappedImage::open(&image)?;
        let locator = FlashMap::load(&flash_map)?;
        info!(
            image = %image.display(),
            len = medium.len(),
            regions = locator.regions().len(),
            verified_boot = config.verified_boot,
            "Opened boot medium"
        );

        ComponentLoader::new(Arc::new(medium), Arc::new(locator), &config)
    }
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
