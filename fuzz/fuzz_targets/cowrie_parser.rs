#![no_main]

use libfuzzer_sys::fuzz_target;
use trapwire_core::pipeline::SourceParser;
use trapwire_ingest::parser::CowrieParser;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let parser = CowrieParser::new();
        let _ = parser.parse(line);
    }
});
