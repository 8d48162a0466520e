//! Signature-dispatched decompression of component payloads
//!
//! Each stored component begins with a [`CompressedHeader`] whose signature
//! selects the decoder:
//! - `LZ4 `: LZ4 block format
//! - `ZSTD`: Zstandard frame
//! - `LZDM`: stored without compression
//!
//! Decoding is split in two steps so sizes are known before any memory is
//! committed: [`Decompressor::probe`] reports the destination and scratch
//! sizes, [`Decompressor::decode`] does the work.

use crate::error::{BootError, Result};
use crate::header::CompressedHeader;
use crate::tag::Tag;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const LZ4_SIGNATURE: Tag = Tag::new(b"LZ4 ");
pub const ZSTD_SIGNATURE: Tag = Tag::new(b"ZSTD");
pub const STORED_SIGNATURE: Tag = Tag::new(b"LZDM");

/// Sizes reported by a decoder before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeInfo {
    /// Bytes the decoded output occupies
    pub decompressed_len: usize,
    /// Working memory the decoder needs during `decode`
    pub scratch_len: usize,
}

/// Decompression method for component payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored uncompressed
    None,
    /// LZ4 block compression (fast, moderate ratio)
    Lz4,
    /// Zstd compression (slower, better ratio)
    Zstd,
}

impl CompressionMethod {
    pub fn from_signature(signature: Tag) -> Option<Self> {
        match signature {
            s if s == STORED_SIGNATURE => Some(CompressionMethod::None),
            s if s == LZ4_SIGNATURE => Some(CompressionMethod::Lz4),
            s if s == ZSTD_SIGNATURE => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }

    pub fn signature(self) -> Tag {
        match self {
            CompressionMethod::None => STORED_SIGNATURE,
            CompressionMethod::Lz4 => LZ4_SIGNATURE,
            CompressionMethod::Zstd => ZSTD_SIGNATURE,
        }
    }
}

/// A single decoding algorithm
pub trait Codec: Send + Sync {
    fn probe(&self, header: &CompressedHeader, compressed: &[u8]) -> Result<DecodeInfo>;

    /// Decode `compressed` into `dest`, returning the number of bytes written
    fn decode(&self, compressed: &[u8], dest: &mut [u8], scratch: &mut [u8]) -> Result<usize>;
}

/// Decoder capability consumed by the loader
pub trait Decompressor: Send + Sync {
    fn probe(&self, header: &CompressedHeader, compressed: &[u8]) -> Result<DecodeInfo>;

    fn decode(
        &self,
        header: &CompressedHeader,
        compressed: &[u8],
        dest: &mut [u8],
        scratch: &mut [u8],
    ) -> Result<usize>;
}

struct Lz4Codec;

impl Codec for Lz4Codec {
    fn probe(&self, header: &CompressedHeader, _compressed: &[u8]) -> Result<DecodeInfo> {
        Ok(DecodeInfo {
            decompressed_len: header.decompressed_size as usize,
            scratch_len: 0,
        })
    }

    fn decode(&self, compressed: &[u8], dest: &mut [u8], _scratch: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(compressed, dest)
            .map_err(|e| BootError::Unsupported(format!("LZ4 decompression failed: {}", e)))
    }
}

struct ZstdCodec;

impl Codec for ZstdCodec {
    fn probe(&self, header: &CompressedHeader, _compressed: &[u8]) -> Result<DecodeInfo> {
        Ok(DecodeInfo {
            decompressed_len: header.decompressed_size as usize,
            scratch_len: 0,
        })
    }

    fn decode(&self, compressed: &[u8], dest: &mut [u8], _scratch: &mut [u8]) -> Result<usize> {
        zstd::bulk::decompress_to_buffer(compressed, dest)
            .map_err(|e| BootError::Unsupported(format!("Zstd decompression failed: {}", e)))
    }
}

struct StoredCodec;

impl Codec for StoredCodec {
    fn probe(&self, header: &CompressedHeader, _compressed: &[u8]) -> Result<DecodeInfo> {
        if header.compressed_size != header.decompressed_size {
            return Err(BootError::Unsupported(format!(
                "stored payload declares {} bytes but holds {}",
                header.decompressed_size, header.compressed_size
            )));
        }
        Ok(DecodeInfo {
            decompressed_len: header.decompressed_size as usize,
            scratch_len: 0,
        })
    }

    fn decode(&self, compressed: &[u8], dest: &mut [u8], _scratch: &mut [u8]) -> Result<usize> {
        let out = dest.get_mut(..compressed.len()).ok_or_else(|| {
            BootError::Unsupported("stored payload larger than destination".to_string())
        })?;
        out.copy_from_slice(compressed);
        Ok(compressed.len())
    }
}

/// Table of codecs keyed by compressed-header signature
#[derive(Clone)]
pub struct DecoderSet {
    codecs: HashMap<Tag, Arc<dyn Codec>>,
}

impl DecoderSet {
    /// An empty set; every signature is unsupported
    pub fn empty() -> Self {
        DecoderSet {
            codecs: HashMap::new(),
        }
    }

    /// LZ4, Zstd and stored payloads
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(LZ4_SIGNATURE, Arc::new(Lz4Codec));
        set.register(ZSTD_SIGNATURE, Arc::new(ZstdCodec));
        set.register(STORED_SIGNATURE, Arc::new(StoredCodec));
        set
    }

    pub fn register(&mut self, signature: Tag, codec: Arc<dyn Codec>) {
        self.codecs.insert(signature, codec);
    }

    pub fn supports(&self, signature: Tag) -> bool {
        self.codecs.contains_key(&signature)
    }

    fn codec(&self, signature: Tag) -> Result<&Arc<dyn Codec>> {
        self.codecs
            .get(&signature)
            .ok_or_else(|| BootError::Unsupported(format!("no decoder for {}", signature)))
    }
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl Decompressor for DecoderSet {
    fn probe(&self, header: &CompressedHeader, compressed: &[u8]) -> Result<DecodeInfo> {
        let info = self.codec(header.signature)?.probe(header, compressed)?;
        debug!(
            decoder = %header.signature,
            compressed = compressed.len(),
            decompressed = info.decompressed_len,
            scratch = info.scratch_len,
            "Probed payload"
        );
        Ok(info)
    }

    fn decode(
        &self,
        header: &CompressedHeader,
        compressed: &[u8],
        dest: &mut [u8],
        scratch: &mut [u8],
    ) -> Result<usize> {
        let written = self
            .codec(header.signature)?
            .decode(compressed, dest, scratch)?;
        if written != header.decompressed_size as usize {
            return Err(BootError::Unsupported(format!(
                "{} payload decoded to {} bytes, header declares {}",
                header.signature, written, header.decompressed_size
            )));
        }
        Ok(written)
    }
}

/// Compress `data` with `method`; used by image tooling and tests
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Lz4 => Ok(lz4_flex::block::compress(data)),
        CompressionMethod::Zstd => zstd::bulk::compress(data, 3)
            .map_err(|e| BootError::Unsupported(format!("Zstd compression failed: {}", e))),
    }
}
