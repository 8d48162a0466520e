#![no_main]
use bootcart::{find_entry, header_span_length, ContainerHeader, DirectoryWalker, Tag};
use libfuzzer_sys::fuzz_target;

// Arbitrary header+directory bytes must never panic or read past data_offset
fuzz_target!(|data: &[u8]| {
    if let Ok(span) = header_span_length(data) {
        if let Ok(header) = ContainerHeader::from_bytes(data) {
            assert!(span as usize <= header.data_offset as usize);
        }
    }

    if let Ok(walker) = DirectoryWalker::new(data) {
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let end = entry.position() + 16 + entry.hash_data().len();
                    assert!(end <= data.len());
                }
                Err(_) => break,
            }
        }
    }

    let _ = find_entry(data, Tag::new(b"PYBK"));
});
