use crate::error::{BootError, Result};
use crate::tag::Tag;

/// Serialized size of [`ContainerHeader`]
pub const CONTAINER_HEADER_LEN: usize = 16;

/// Serialized size of the fixed part of a directory entry (hash excluded)
pub const COMPONENT_ENTRY_LEN: usize = 16;

/// Serialized size of [`CompressedHeader`]
pub const COMPRESSED_HEADER_LEN: usize = 16;

/// Authentication tags start at the signed span rounded up to this boundary
pub const AUTH_DATA_ALIGN: usize = 4;

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Container header, the first 16 bytes of every container
///
/// The header is followed by `count` directory entries, each carrying a
/// variable-length hash, so the header+directory region can only be sized by
/// walking it (see [`crate::directory`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Container signature, unique within a boot medium
    pub signature: Tag,
    pub version: u8,
    /// Security version number
    pub svn: u8,
    /// Offset from the container start to the component payload area.
    /// Also the length of the header+directory region.
    pub data_offset: u16,
    /// Length of the component payload area
    pub data_size: u32,
    /// Authentication applied to the header+directory region
    pub auth_type: u8,
    pub image_type: u8,
    pub flags: u8,
    /// Number of directory entries
    pub count: u8,
}

impl ContainerHeader {
    pub fn new(signature: Tag) -> Self {
        ContainerHeader {
            signature,
            version: 1,
            svn: 0,
            data_offset: CONTAINER_HEADER_LEN as u16,
            data_size: 0,
            auth_type: AuthType::None as u8,
            image_type: 0,
            flags: 0,
            count: 0,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; CONTAINER_HEADER_LEN] {
        let mut bytes = [0u8; CONTAINER_HEADER_LEN];
        bytes[0..4].copy_from_slice(self.signature.as_bytes());
        bytes[4] = self.version;
        bytes[5] = self.svn;
        bytes[6..8].copy_from_slice(&self.data_offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.data_size.to_le_bytes());
        bytes[12] = self.auth_type;
        bytes[13] = self.image_type;
        bytes[14] = self.flags;
        bytes[15] = self.count;
        bytes
    }

    /// Deserialize header from bytes
    ///
    /// Only the fixed 16 bytes are read; the directory that follows is not
    /// examined here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONTAINER_HEADER_LEN {
            return Err(BootError::CorruptHeader(format!(
                "container header needs {} bytes, got {}",
                CONTAINER_HEADER_LEN,
                bytes.len()
            )));
        }

        let header = ContainerHeader {
            signature: Tag::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: bytes[4],
            svn: bytes[5],
            data_offset: read_u16(bytes, 6),
            data_size: read_u32(bytes, 8),
            auth_type: bytes[12],
            image_type: bytes[13],
            flags: bytes[14],
            count: bytes[15],
        };

        if (header.data_offset as usize) < CONTAINER_HEADER_LEN {
            return Err(BootError::CorruptHeader(format!(
                "container {} data offset {} is inside its own header",
                header.signature, header.data_offset
            )));
        }

        Ok(header)
    }
}

/// Fixed part of a component directory entry
///
/// On storage the entry is immediately followed by `hash_size` bytes of hash
/// data, which are not part of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentEntry {
    pub name: Tag,
    /// Offset of the stored component relative to `data_offset`
    pub offset: u32,
    /// Stored size, authentication tag included
    pub size: u32,
    pub attribute: u8,
    pub alignment: u8,
    pub auth_type: u8,
    pub hash_size: u8,
}

impl ComponentEntry {
    pub fn to_bytes(&self) -> [u8; COMPONENT_ENTRY_LEN] {
        let mut bytes = [0u8; COMPONENT_ENTRY_LEN];
        bytes[0..4].copy_from_slice(self.name.as_bytes());
        bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes[12] = self.attribute;
        bytes[13] = self.alignment;
        bytes[14] = self.auth_type;
        bytes[15] = self.hash_size;
        bytes
    }

    /// Decode the fixed entry fields. Callers guarantee 16 readable bytes.
    pub(crate) fn from_fixed(bytes: &[u8; COMPONENT_ENTRY_LEN]) -> Self {
        ComponentEntry {
            name: Tag::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]),
            offset: read_u32(bytes, 4),
            size: read_u32(bytes, 8),
            attribute: bytes[12],
            alignment: bytes[13],
            auth_type: bytes[14],
            hash_size: bytes[15],
        }
    }
}

/// Header preceding every stored component payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedHeader {
    /// Decoder selector, e.g. `LZ4 `
    pub signature: Tag,
    pub compressed_size: u32,
    pub decompressed_size: u32,
    pub version: u16,
    pub svn: u8,
    pub attribute: u8,
}

impl CompressedHeader {
    pub fn to_bytes(&self) -> [u8; COMPRESSED_HEADER_LEN] {
        let mut bytes = [0u8; COMPRESSED_HEADER_LEN];
        bytes[0..4].copy_from_slice(self.signature.as_bytes());
        bytes[4..8].copy_from_slice(&self.compressed_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.decompressed_size.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.version.to_le_bytes());
        bytes[14] = self.svn;
        bytes[15] = self.attribute;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMPRESSED_HEADER_LEN {
            return Err(BootError::Unsupported(format!(
                "payload of {} bytes cannot hold a compressed header",
                bytes.len()
            )));
        }

        Ok(CompressedHeader {
            signature: Tag::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]),
            compressed_size: read_u32(bytes, 4),
            decompressed_size: read_u32(bytes, 8),
            version: read_u16(bytes, 12),
            svn: bytes[14],
            attribute: bytes[15],
        })
    }

    /// Length of the signed span: this header plus the compressed bytes
    pub fn signed_len(&self) -> Option<usize> {
        COMPRESSED_HEADER_LEN.checked_add(self.compressed_size as usize)
    }
}

/// Authentication algorithm declared by a container or directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthType {
    None = 0,
    Sha256 = 1,
    Sha384 = 2,
    Ed25519 = 3,
}

/// The three verification shapes an [`AuthType`] can take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Hash,
    Signature,
}

impl AuthType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AuthType::None),
            1 => Some(AuthType::Sha256),
            2 => Some(AuthType::Sha384),
            3 => Some(AuthType::Ed25519),
            _ => None,
        }
    }

    pub fn kind(self) -> AuthKind {
        match self {
            AuthType::None => AuthKind::None,
            AuthType::Sha256 | AuthType::Sha384 => AuthKind::Hash,
            AuthType::Ed25519 => AuthKind::Signature,
        }
    }
}
