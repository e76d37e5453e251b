#![no_main]
use libfuzzer_sys::fuzz_target;
use light_compressor::{LZ4StreamReader, ZstdStreamReader};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let compressed = reference_compress(data);
    let mut decompressed = Vec::new();
    LZ4StreamReader::new(Cursor::new(compressed))
        .read_to_end(&mut decompressed)
        .expect("Failed to decompress data compressed by the C lz4 implementation");
    assert!(data == decompressed.as_slice(), "LZ4 decompression result did not match the original input");

    let compressed = zstd::encode_all(data, 3).expect("Failed to compress with zstd");
    let mut decompressed = Vec::new();
    ZstdStreamReader::new(Cursor::new(compressed))
        .expect("Failed to create zstd reader")
        .read_to_end(&mut decompressed)
        .expect("Failed to decompress data compressed by the C zstd implementation");
    assert!(data == decompressed.as_slice(), "ZSTD decompression result did not match the original input");
});

// compress data using the reference lz4 implementation
fn reference_compress(data: &[u8]) -> Vec<u8> {
    let mut input = Cursor::new(data);
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(Vec::new()).unwrap();
    std::io::copy(&mut input, &mut encoder).unwrap();
    let (output, result) = encoder.finish();
    result.unwrap();
    output
}
