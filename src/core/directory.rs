//! Sequential walk over a container's component directory
//!
//! Directory entries are variable length: each fixed 16-byte entry is followed
//! by `hash_size` bytes of hash data. Entries cannot be indexed; they are
//! visited in order by [`DirectoryWalker`], which never reads past the
//! container's `data_offset`.
//!
//! ```text
//! 0            16             32+h0          48+h0+h1
//! ┌────────────┬──────────────┬──────┬───────┬──────┬─────┬─────┐
//! │ header     │ entry 0      │ hash │ entry │ hash │ pad │ tag │
//! └────────────┴──────────────┴──────┴───────┴──────┴─────┴─────┘
//!                                            span ──┘         └── data_offset
//! ```

use crate::error::{BootError, Result};
use crate::header::{ComponentEntry, ContainerHeader, COMPONENT_ENTRY_LEN, CONTAINER_HEADER_LEN};
use crate::tag::Tag;

/// A directory entry borrowed from a cached header+directory region
#[derive(Debug, Clone, Copy)]
pub struct EntryRef<'a> {
    entry: ComponentEntry,
    hash: &'a [u8],
    index: usize,
    position: usize,
}

impl<'a> EntryRef<'a> {
    pub fn entry(&self) -> &ComponentEntry {
        &self.entry
    }

    pub fn name(&self) -> Tag {
        self.entry.name
    }

    pub fn offset(&self) -> u32 {
        self.entry.offset
    }

    pub fn size(&self) -> u32 {
        self.entry.size
    }

    pub fn auth_type(&self) -> u8 {
        self.entry.auth_type
    }

    /// Hash data stored right after the entry, `hash_size` bytes long
    pub fn hash_data(&self) -> &'a [u8] {
        self.hash
    }

    /// Position of the entry in the directory (0-based)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset of the entry inside the header+directory region
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Lazy iterator over the entries of a header+directory region
///
/// Yields `Err(CorruptHeader)` once and then stops if an entry would run past
/// the container's `data_offset`.
pub struct DirectoryWalker<'a> {
    region: &'a [u8],
    limit: usize,
    position: usize,
    index: usize,
    count: usize,
    done: bool,
}

impl<'a> DirectoryWalker<'a> {
    /// Start a walk over `region`, which begins with a container header
    pub fn new(region: &'a [u8]) -> Result<Self> {
        let header = ContainerHeader::from_bytes(region)?;
        let data_offset = header.data_offset as usize;
        if region.len() < data_offset {
            return Err(BootError::CorruptHeader(format!(
                "container {} region is {} bytes but data offset is {}",
                header.signature,
                region.len(),
                data_offset
            )));
        }

        Ok(DirectoryWalker {
            region,
            limit: data_offset,
            position: CONTAINER_HEADER_LEN,
            index: 0,
            count: header.count as usize,
            done: false,
        })
    }

    /// Offset just past the last entry visited so far
    pub fn position(&self) -> usize {
        self.position
    }

    fn corrupt(&mut self, reason: String) -> Option<Result<EntryRef<'a>>> {
        self.done = true;
        Some(Err(BootError::CorruptHeader(reason)))
    }
}

impl<'a> Iterator for DirectoryWalker<'a> {
    type Item = Result<EntryRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.count {
            return None;
        }

        let start = self.position;
        let fixed_end = match start.checked_add(COMPONENT_ENTRY_LEN) {
            Some(end) if end <= self.limit => end,
            _ => {
                return self.corrupt(format!(
                    "entry {} at offset {} runs past data offset {}",
                    self.index, start, self.limit
                ))
            }
        };

        let fixed: &[u8; COMPONENT_ENTRY_LEN] = match self.region[start..fixed_end].try_into() {
            Ok(fixed) => fixed,
            Err(_) => return self.corrupt(format!("entry {} is truncated", self.index)),
        };
        let entry = ComponentEntry::from_fixed(fixed);

        let end = match fixed_end.checked_add(entry.hash_size as usize) {
            Some(end) if end <= self.limit => end,
            _ => {
                return self.corrupt(format!(
                    "hash of entry {} ({} bytes) runs past data offset {}",
                    self.index, entry.hash_size, self.limit
                ))
            }
        };

        let item = EntryRef {
            entry,
            hash: &self.region[fixed_end..end],
            index: self.index,
            position: start,
        };
        self.position = end;
        self.index += 1;
        Some(Ok(item))
    }
}

/// Walk every entry and return the length of the header plus directory
///
/// This is the only structural check made before the region is
/// authenticated, and it determines the exact span that authentication covers.
pub fn header_span_length(region: &[u8]) -> Result<u32> {
    let mut walker = DirectoryWalker::new(region)?;
    for entry in walker.by_ref() {
        entry?;
    }
    u32::try_from(walker.position())
        .map_err(|_| BootError::CorruptHeader("directory span overflows u32".to_string()))
}

/// Find the entry named `name`
///
/// Returns a reference into `region`, not a copy. A malformed directory ends
/// the search.
pub fn find_entry(region: &[u8], name: Tag) -> Option<EntryRef<'_>> {
    DirectoryWalker::new(region)
        .ok()?
        .map_while(|entry| entry.ok())
        .find(|entry| entry.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::AuthType;

    fn build_region(entries: &[(&[u8; 4], u8)], tail: usize) -> Vec<u8> {
        let mut directory = Vec::new();
        for (i, (name, hash_size)) in entries.iter().enumerate() {
            let entry = ComponentEntry {
                name: Tag::new(name),
                offset: (i as u32) * 0x100,
                size: 0x80 + i as u32,
                attribute: 0,
                alignment: 0,
                auth_type: if *hash_size == 0 {
                    AuthType::None as u8
                } else {
                    AuthType::Sha256 as u8
                },
                hash_size: *hash_size,
            };
            directory.extend_from_slice(&entry.to_bytes());
            directory.extend(std::iter::repeat(0xA0 + i as u8).take(*hash_size as usize));
        }

        let mut header = ContainerHeader::new(Tag::new(b"IPFW"));
        header.count = entries.len() as u8;
        header.data_offset = (CONTAINER_HEADER_LEN + directory.len() + tail) as u16;

        let mut region = header.to_bytes().to_vec();
        region.extend_from_slice(&directory);
        region.resize(header.data_offset as usize, 0);
        region
    }

    #[test]
    fn test_span_of_two_entries() {
        let region = build_region(&[(b"PYBK", 32), (b"CFGD", 0)], 8);
        let span = header_span_length(&region).unwrap();
        assert_eq!(span as usize, CONTAINER_HEADER_LEN + 16 + 32 + 16);
        assert!(span as usize <= region.len());
    }

    #[test]
    fn test_span_may_end_exactly_at_data_offset() {
        let region = build_region(&[(b"PYBK", 32)], 0);
        assert_eq!(header_span_length(&region).unwrap() as usize, region.len());
    }

    #[test]
    fn test_empty_directory() {
        let region = build_region(&[], 0);
        assert_eq!(
            header_span_length(&region).unwrap() as usize,
            CONTAINER_HEADER_LEN
        );
    }

    #[test]
    fn test_find_second_entry_skips_first_hash() {
        let region = build_region(&[(b"PYBK", 32), (b"CFGD", 0)], 0);
        let entry = find_entry(&region, Tag::new(b"CFGD")).unwrap();
        assert_eq!(entry.index(), 1);
        assert_eq!(entry.offset(), 0x100);
        assert_eq!(entry.size(), 0x81);
        assert!(entry.hash_data().is_empty());
        assert_eq!(entry.position(), CONTAINER_HEADER_LEN + 16 + 32);
    }

    #[test]
    fn test_find_returns_hash_slice() {
        let region = build_region(&[(b"PYBK", 32), (b"CFGD", 0)], 0);
        let entry = find_entry(&region, Tag::new(b"PYBK")).unwrap();
        assert_eq!(entry.hash_data().len(), 32);
        assert!(entry.hash_data().iter().all(|&b| b == 0xA0));
    }

    #[test]
    fn test_find_missing() {
        let region = build_region(&[(b"PYBK", 32)], 0);
        assert!(find_entry(&region, Tag::new(b"NOPE")).is_none());
    }

    #[test]
    fn test_count_too_large_is_corrupt() {
        let mut region = build_region(&[(b"PYBK", 32)], 4);
        region[15] = 5;
        assert!(matches!(
            header_span_length(&region),
            Err(BootError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_hash_size_past_data_offset_is_corrupt() {
        let mut region = build_region(&[(b"PYBK", 32)], 0);
        // hash_size byte of entry 0
        region[CONTAINER_HEADER_LEN + 15] = 200;
        assert!(matches!(
            header_span_length(&region),
            Err(BootError::CorruptHeader(_))
        ));
        assert!(find_entry(&region, Tag::new(b"PYBK")).is_none());
    }

    #[test]
    fn test_region_shorter_than_data_offset() {
        let region = build_region(&[(b"PYBK", 0)], 16);
        let truncated = &region[..region.len() - 1];
        assert!(matches!(
            header_span_length(truncated),
            Err(BootError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_walker_stops_after_error() {
        let mut region = build_region(&[(b"PYBK", 0), (b"CFGD", 0)], 0);
        region[15] = 3;
        let results: Vec<_> = DirectoryWalker::new(&region).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
    }
}
