//! Firmware image builder shared by the integration tests

#![allow(dead_code)]

use bootcart::{
    compress, AuthEngine, AuthType, BudgetPool, ComponentEntry, ComponentLoader, CompressedHeader,
    CompressionMethod, ContainerHeader, DecodeInfo, DecoderSet, Decompressor, FlashLocator,
    FlashMap, HashAlgorithm, HashStore, LoaderConfig, MemoryImage, MemoryPool, MemoryPools, Region,
    Result, SignatureAlgorithm, SoftwareAuth, Tag,
};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256, Sha384};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn tag(bytes: &[u8; 4]) -> Tag {
    Tag::new(bytes)
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn rogue_key() -> SigningKey {
    SigningKey::from_bytes(&[13u8; 32])
}

/// Hash store trusting [`signing_key`]
pub fn trusting_store() -> HashStore {
    let mut store = HashStore::new();
    store.trust_public_key(&signing_key().verifying_key().to_bytes());
    store
}

/// Compressible test data
pub fn sample_data(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i / 7) as u8) ^ (i % 3) as u8)
        .collect()
}

fn pad_to_align(bytes: &mut Vec<u8>) {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
}

/// Authentication tag and directory hash for a signed span
fn auth_material(span: &[u8], auth: AuthType, key: &SigningKey) -> (Vec<u8>, Vec<u8>) {
    match auth {
        AuthType::None => (Vec::new(), Vec::new()),
        AuthType::Sha256 => (Vec::new(), Sha256::digest(span).to_vec()),
        AuthType::Sha384 => (Vec::new(), Sha384::digest(span).to_vec()),
        AuthType::Ed25519 => {
            let mut tag = key.verifying_key().to_bytes().to_vec();
            tag.extend_from_slice(&key.sign(span).to_bytes());
            (tag, Vec::new())
        }
    }
}

/// A component to be packed into a container or a flat region
#[derive(Clone)]
pub struct Component {
    pub name: Tag,
    pub data: Vec<u8>,
    pub method: CompressionMethod,
    pub auth: AuthType,
    pub svn: u8,
    pub key: SigningKey,
    /// Raw auth byte written to the directory entry instead of `auth`
    pub entry_auth_byte: Option<u8>,
    /// Decoder signature written instead of the method's
    pub decoder_signature: Option<Tag>,
    /// Replace the compressed bytes with garbage before signing
    pub mangle_payload: bool,
}

impl Component {
    pub fn new(name: &[u8; 4], data: &[u8]) -> Self {
        Component {
            name: Tag::new(name),
            data: data.to_vec(),
            method: CompressionMethod::Lz4,
            auth: AuthType::Ed25519,
            svn: 0,
            key: signing_key(),
            entry_auth_byte: None,
            decoder_signature: None,
            mangle_payload: false,
        }
    }

    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    pub fn svn(mut self, svn: u8) -> Self {
        self.svn = svn;
        self
    }

    pub fn key(mut self, key: SigningKey) -> Self {
        self.key = key;
        self
    }

    pub fn entry_auth_byte(mut self, value: u8) -> Self {
        self.entry_auth_byte = Some(value);
        self
    }

    pub fn decoder_signature(mut self, signature: Tag) -> Self {
        self.decoder_signature = Some(signature);
        self
    }

    pub fn mangled(mut self) -> Self {
        self.mangle_payload = true;
        self
    }

    /// Stored bytes (`[compressed header][compressed][pad][tag]`) and the
    /// digest a directory entry carries for hash authentication
    pub fn encode(&self) -> (Vec<u8>, Vec<u8>) {
        let mut compressed = compress(&self.data, self.method).unwrap();
        if self.mangle_payload {
            compressed.iter_mut().for_each(|b| *b = 0xFF);
        }
        let header = CompressedHeader {
            signature: self
                .decoder_signature
                .unwrap_or_else(|| self.method.signature()),
            compressed_size: compressed.len() as u32,
            decompressed_size: self.data.len() as u32,
            version: 1,
            svn: self.svn,
            attribute: 0,
        };

        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&compressed);
        let (auth_tag, hash) = auth_material(&bytes, self.auth, &self.key);
        pad_to_align(&mut bytes);
        bytes.extend_from_slice(&auth_tag);
        (bytes, hash)
    }
}

/// A container of components
#[derive(Clone)]
pub struct Container {
    pub signature: Tag,
    pub svn: u8,
    pub auth: AuthType,
    pub key: SigningKey,
    pub components: Vec<Component>,
    /// Overrides the entry count written to the header
    pub count_override: Option<u8>,
}

/// Serialized container plus the header digest used for hash authentication
pub struct BuiltContainer {
    pub bytes: Vec<u8>,
    pub header_digest: Vec<u8>,
    pub data_offset: usize,
    /// Offset of each component relative to `data_offset`
    pub offsets: Vec<u32>,
    pub sizes: Vec<u32>,
}

impl Container {
    pub fn new(signature: &[u8; 4]) -> Self {
        Container {
            signature: Tag::new(signature),
            svn: 0,
            auth: AuthType::Ed25519,
            key: signing_key(),
            components: Vec::new(),
            count_override: None,
        }
    }

    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    pub fn svn(mut self, svn: u8) -> Self {
        self.svn = svn;
        self
    }

    pub fn key(mut self, key: SigningKey) -> Self {
        self.key = key;
        self
    }

    pub fn component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn count_override(mut self, count: u8) -> Self {
        self.count_override = Some(count);
        self
    }

    pub fn build(&self) -> BuiltContainer {
        let mut payload = Vec::new();
        let mut directory = Vec::new();
        let mut offsets = Vec::new();
        let mut sizes = Vec::new();

        for component in &self.components {
            pad_to_align(&mut payload);
            let (stored, hash) = component.encode();
            let entry = ComponentEntry {
                name: component.name,
                offset: payload.len() as u32,
                size: stored.len() as u32,
                attribute: 0,
                alignment: 2,
                auth_type: component
                    .entry_auth_byte
                    .unwrap_or(component.auth as u8),
                hash_size: hash.len() as u8,
            };
            offsets.push(entry.offset);
            sizes.push(entry.size);
            directory.extend_from_slice(&entry.to_bytes());
            directory.extend_from_slice(&hash);
            payload.extend_from_slice(&stored);
        }

        let span = 16 + directory.len();
        let tag_len = if self.auth == AuthType::Ed25519 { 96 } else { 0 };
        let data_offset = span.div_ceil(4) * 4 + tag_len;

        let mut header = ContainerHeader::new(self.signature);
        header.svn = self.svn;
        header.auth_type = self.auth as u8;
        header.count = self
            .count_override
            .unwrap_or(self.components.len() as u8);
        header.data_offset = data_offset as u16;
        header.data_size = payload.len() as u32;

        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&directory);
        let (auth_tag, header_digest) = auth_material(&bytes, self.auth, &self.key);
        pad_to_align(&mut bytes);
        bytes.extend_from_slice(&auth_tag);
        assert_eq!(bytes.len(), data_offset);
        bytes.extend_from_slice(&payload);

        BuiltContainer {
            bytes,
            header_digest,
            data_offset,
            offsets,
            sizes,
        }
    }
}

/// Boot medium under construction plus its flash map
pub struct ImageBuilder {
    bytes: Vec<u8>,
    map: FlashMap,
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            bytes: vec![0xFF; 0x100],
            map: FlashMap::new(),
        }
    }

    /// Place `data` at the next 16-byte boundary and map it as `signature`
    pub fn add(&mut self, signature: Tag, data: &[u8]) -> Region {
        while self.bytes.len() % 16 != 0 {
            self.bytes.push(0xFF);
        }
        let region = Region::new(self.bytes.len() as u64, data.len() as u64);
        self.bytes.extend_from_slice(data);
        self.map.insert(signature, region);
        region
    }

    pub fn add_container(&mut self, container: &Container) -> (Region, BuiltContainer) {
        let built = container.build();
        let region = self.add(container.signature, &built.bytes);
        (region, built)
    }

    /// Map `signature` to an existing region
    pub fn alias(&mut self, signature: Tag, region: Region) {
        self.map.insert(signature, region);
    }

    pub fn finish(self) -> (MemoryImage, FlashMap) {
        (MemoryImage::new(self.bytes), self.map)
    }
}

/// Pools whose statistics stay observable from the test
pub struct TrackedPools {
    pub normal: Arc<BudgetPool>,
    pub temporary: Arc<BudgetPool>,
}

impl TrackedPools {
    pub fn new() -> Self {
        Self::with_limits(None, None)
    }

    pub fn with_limits(normal: Option<usize>, temporary: Option<usize>) -> Self {
        TrackedPools {
            normal: Arc::new(BudgetPool::new("normal", normal)),
            temporary: Arc::new(BudgetPool::new("temporary", temporary)),
        }
    }

    pub fn pools(&self) -> MemoryPools {
        let normal: Arc<dyn MemoryPool> = self.normal.clone();
        let temporary: Arc<dyn MemoryPool> = self.temporary.clone();
        MemoryPools::new(normal, temporary)
    }
}

/// Loader over `medium` trusting [`signing_key`]
pub fn loader(
    medium: MemoryImage,
    locator: Arc<dyn FlashLocator>,
    config: &LoaderConfig,
) -> ComponentLoader {
    ComponentLoader::new(Arc::new(medium), locator, config)
        .unwrap()
        .with_hash_store(trusting_store())
}

/// Flash locator that counts lookups
pub struct CountingLocator {
    inner: FlashMap,
    calls: AtomicUsize,
}

impl CountingLocator {
    pub fn new(inner: FlashMap) -> Self {
        CountingLocator {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FlashLocator for CountingLocator {
    fn locate_region(&self, signature: Tag) -> Result<Region> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.locate_region(signature)
    }
}

/// Auth engine that counts primitive invocations
#[derive(Default)]
pub struct CountingAuth {
    pub sha256: AtomicUsize,
    pub sha384: AtomicUsize,
    pub signatures: AtomicUsize,
}

impl AuthEngine for CountingAuth {
    fn digest(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        match algorithm {
            HashAlgorithm::Sha256 => self.sha256.fetch_add(1, Ordering::SeqCst),
            HashAlgorithm::Sha384 => self.sha384.fetch_add(1, Ordering::SeqCst),
        };
        SoftwareAuth.digest(algorithm, data)
    }

    fn verify_signature(
        &self,
        data: &[u8],
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        SoftwareAuth.verify_signature(data, algorithm, public_key, signature)
    }
}

/// Decompressor that counts calls to `decode`
pub struct CountingDecoder {
    inner: DecoderSet,
    decodes: AtomicUsize,
}

impl CountingDecoder {
    pub fn new() -> Self {
        CountingDecoder {
            inner: DecoderSet::standard(),
            decodes: AtomicUsize::new(0),
        }
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl Decompressor for CountingDecoder {
    fn probe(&self, header: &CompressedHeader, compressed: &[u8]) -> Result<DecodeInfo> {
        self.inner.probe(header, compressed)
    }

    fn decode(
        &self,
        header: &CompressedHeader,
        compressed: &[u8],
        dest: &mut [u8],
        scratch: &mut [u8],
    ) -> Result<usize> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(header, compressed, dest, scratch)
    }
}
