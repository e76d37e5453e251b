#![no_main]
use libfuzzer_sys::fuzz_target;
use light_compressor::{define_reader, LZ4StreamReader, StreamRead, ZstdStreamReader, AUTO_DETECT};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    // we deliberately ignore errors here because random bytes from fuzzer
    // are not valid compressed data and so are expected to trigger non-fatal errors
    let mut output = Vec::new();
    let _ = LZ4StreamReader::new(Cursor::new(data)).read_to_end(&mut output);

    output.clear();
    if let Ok(mut reader) = ZstdStreamReader::new(Cursor::new(data)) {
        let _ = reader.read_to_end(&mut output);
    }

    if let Ok(mut reader) = define_reader(Cursor::new(data), AUTO_DETECT) {
        while let Ok(chunk) = reader.read_chunk(4096) {
            if chunk.is_empty() {
                break;
            }
        }
    }
});
