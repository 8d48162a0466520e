#![no_main]
use arbitrary::Arbitrary;
use bootcart::{
    ComponentId, ComponentLoader, ComponentType, FlashMap, LoaderConfig, MemoryImage, Region, Tag,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
struct Input {
    verified_boot: bool,
    flat: bool,
    buffer_len: Option<u16>,
    image: Vec<u8>,
}

// Whatever the image holds, a load either fails cleanly or returns exactly
// the decoder-reported bytes
fuzz_target!(|input: Input| {
    let len = input.image.len() as u64;
    let mut map = FlashMap::new();
    map.insert(Tag::new(b"IPFW"), Region::new(0, len));
    map.insert(Tag::new(b"SG02"), Region::new(0, len));

    let config = LoaderConfig {
        verified_boot: input.verified_boot,
        ..Default::default()
    };
    let loader = match ComponentLoader::new(
        Arc::new(MemoryImage::new(input.image)),
        Arc::new(map),
        &config,
    ) {
        Ok(loader) => loader,
        Err(_) => return,
    };

    let id = if input.flat {
        ComponentId::by_type(ComponentType::Stage2)
    } else {
        ComponentId::in_container(Tag::new(b"IPFW"), Tag::new(b"PYBK"))
    };

    let mut buffer = vec![0u8; input.buffer_len.unwrap_or(0) as usize];
    let dest = input.buffer_len.map(|_| buffer.as_mut_slice());
    if let Ok(loaded) = loader.load_component(&id, dest) {
        assert!(loaded.as_bytes().len() == loaded.len());
    }
});
