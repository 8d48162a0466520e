//! Boot medium access and flash-map region lookup

use crate::error::{BootError, Result};
use crate::tag::Tag;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A byte range on the boot medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub base: u64,
    pub size: u64,
}

impl Region {
    pub fn new(base: u64, size: u64) -> Self {
        Region { base, size }
    }

    pub fn end(&self) -> Option<u64> {
        self.base.checked_add(self.size)
    }
}

/// Storage-mapped boot medium
///
/// Reads are plain slices of the mapped address space and never fail part
/// way; a range outside the medium is reported as `NotFound`.
pub trait BootMedium: Send + Sync {
    fn bytes(&self) -> &[u8];

    fn slice(&self, base: u64, len: usize) -> Result<&[u8]> {
        let bytes = self.bytes();
        let start = usize::try_from(base).ok();
        let range = start.and_then(|s| s.checked_add(len).map(|e| s..e));
        match range {
            Some(range) if range.end <= bytes.len() => Ok(&bytes[range]),
            _ => Err(BootError::NotFound(format!(
                "range 0x{:x}+0x{:x} is outside the {} byte boot medium",
                base,
                len,
                bytes.len()
            ))),
        }
    }

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// Boot medium held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    data: Vec<u8>,
}

impl MemoryImage {
    pub fn new(data: Vec<u8>) -> Self {
        MemoryImage { data }
    }

    /// Mutable access, used to simulate flash tampering
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl BootMedium for MemoryImage {
    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Boot medium backed by a memory-mapped image file
pub struct MappedImage {
    map: Mmap,
    path: PathBuf,
}

impl MappedImage {
    /// Map an image file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and the image is not modified while
        // the boot session holds it.
        let map = unsafe { Mmap::map(&file)? };
        Ok(MappedImage {
            map,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BootMedium for MappedImage {
    fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Resolves a flash signature to its region on the boot medium
pub trait FlashLocator: Send + Sync {
    fn locate_region(&self, signature: Tag) -> Result<Region>;
}

/// One row of a [`FlashMap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashRegion {
    pub signature: Tag,
    pub base: u64,
    pub size: u64,
}

/// Signature → region table
///
/// ```toml
/// [[region]]
/// signature = "IPFW"
/// base = 0x1000
/// size = 0x8000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashMap {
    #[serde(default, rename = "region")]
    regions: Vec<FlashRegion>,
}

impl FlashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the region for `signature`
    pub fn insert(&mut self, signature: Tag, region: Region) {
        self.regions.retain(|r| r.signature != signature);
        self.regions.push(FlashRegion {
            signature,
            base: region.base,
            size: region.size,
        });
    }

    pub fn regions(&self) -> &[FlashRegion] {
        &self.regions
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let map: FlashMap = toml::from_str(text)?;
        let mut seen = std::collections::HashSet::new();
        for region in &map.regions {
            if !seen.insert(region.signature) {
                return Err(BootError::Config(format!(
                    "flash map lists {} more than once",
                    region.signature
                )));
            }
        }
        Ok(map)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

impl FlashLocator for FlashMap {
    fn locate_region(&self, signature: Tag) -> Result<Region> {
        self.regions
            .iter()
            .find(|r| r.signature == signature)
            .map(|r| Region::new(r.base, r.size))
            .ok_or_else(|| BootError::NotFound(format!("no flash region for {}", signature)))
    }
}
